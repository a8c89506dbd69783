//! Soft-priority scheduling of the two event streams feeding the primary
//! graph.
//!
//! High-priority events (evaluator conclusions looped back) always take the
//! lock. Low-priority events (fresh datasource observations) yield while a
//! high-priority event completed within the cooldown window, so deduced
//! changes are never stuck behind a backlog of observations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use faultline_monitoring::metrics::EngineMetrics;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace};

use crate::domain::events::{EntityEvent, Priority};
use crate::CoreError;

/// The single mutation path both streams funnel into
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Apply one event to the primary graph
    async fn handle_event(&self, event: EntityEvent, priority: Priority) -> Result<(), CoreError>;
}

/// Senders for the two streams
#[derive(Clone)]
pub struct EventSenders {
    /// Evaluator conclusions
    pub high: UnboundedSender<EntityEvent>,
    /// Datasource observations
    pub low: UnboundedSender<EntityEvent>,
}

/// Merges the high and low priority streams
pub struct PriorityEventCoordinator {
    lock: Mutex<()>,
    last_high: SyncMutex<Option<Instant>>,
    cooldown: Duration,
    retry: Duration,
}

/// Running consumer loops
pub struct CoordinatorHandle {
    high: JoinHandle<()>,
    low: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Wait for both loops to end, which happens once every sender of their
    /// stream is dropped and the queue is drained
    pub async fn join(self) {
        for (name, handle) in [("high", self.high), ("low", self.low)] {
            if let Err(e) = handle.await {
                error!(stream = name, error = %e, "Consumer loop ended abnormally");
            }
        }
    }

    /// Stop both loops without draining
    pub fn abort(&self) {
        self.high.abort();
        self.low.abort();
    }
}

impl PriorityEventCoordinator {
    /// Create a coordinator
    pub fn new(cooldown: Duration, retry: Duration) -> Arc<Self> {
        Arc::new(Self {
            lock: Mutex::new(()),
            last_high: SyncMutex::new(None),
            cooldown,
            retry,
        })
    }

    /// Create the two streams
    pub fn channels() -> (
        EventSenders,
        UnboundedReceiver<EntityEvent>,
        UnboundedReceiver<EntityEvent>,
    ) {
        let (high, high_rx) = unbounded_channel();
        let (low, low_rx) = unbounded_channel();
        (EventSenders { high, low }, high_rx, low_rx)
    }

    /// Start one consumer loop per stream
    pub fn start(
        self: &Arc<Self>,
        handler: Arc<dyn EventHandler>,
        high: UnboundedReceiver<EntityEvent>,
        low: UnboundedReceiver<EntityEvent>,
    ) -> CoordinatorHandle {
        info!(
            cooldown_ms = self.cooldown.as_millis() as u64,
            retry_ms = self.retry.as_millis() as u64,
            "Priority coordinator started"
        );
        CoordinatorHandle {
            high: tokio::spawn(Arc::clone(self).run_high(Arc::clone(&handler), high)),
            low: tokio::spawn(Arc::clone(self).run_low(handler, low)),
        }
    }

    fn high_recently_active(&self) -> bool {
        let last_high = *self.last_high.lock();
        last_high.map(|at| at.elapsed() < self.cooldown).unwrap_or(false)
    }

    async fn run_high(
        self: Arc<Self>,
        handler: Arc<dyn EventHandler>,
        mut events: UnboundedReceiver<EntityEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let _guard = self.lock.lock().await;
            apply(handler.as_ref(), event, Priority::High).await;
            *self.last_high.lock() = Some(Instant::now());
        }
        debug!("High priority stream closed");
    }

    async fn run_low(
        self: Arc<Self>,
        handler: Arc<dyn EventHandler>,
        mut events: UnboundedReceiver<EntityEvent>,
    ) {
        while let Some(event) = events.recv().await {
            loop {
                let guard = self.lock.lock().await;
                if self.high_recently_active() {
                    drop(guard);
                    trace!("Low priority event yielding");
                    sleep(self.retry).await;
                    continue;
                }
                apply(handler.as_ref(), event, Priority::Low).await;
                break;
            }
        }
        debug!("Low priority stream closed");
    }
}

async fn apply(handler: &dyn EventHandler, event: EntityEvent, priority: Priority) {
    let subject = event.subject();
    match handler.handle_event(event, priority).await {
        Ok(()) => EngineMetrics::record_event_applied(priority.as_str()),
        Err(e) => error!(
            priority = priority.as_str(),
            subject = %subject,
            error = %e,
            "Event handling failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_graph::Vertex;

    struct Recorder {
        seen: SyncMutex<Vec<(String, Priority)>>,
        delay: Duration,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(
            &self,
            event: EntityEvent,
            priority: Priority,
        ) -> Result<(), CoreError> {
            sleep(self.delay).await;
            if event.subject() == "boom" {
                return Err(CoreError::Other("boom".to_string()));
            }
            self.seen.lock().push((event.subject(), priority));
            Ok(())
        }
    }

    fn event(id: &str) -> EntityEvent {
        EntityEvent::update_entity(Vertex::new(id))
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_priority_overtakes_low_backlog() {
        let recorder = Arc::new(Recorder {
            seen: SyncMutex::new(Vec::new()),
            delay: Duration::from_millis(10),
        });
        let coordinator =
            PriorityEventCoordinator::new(Duration::from_millis(300), Duration::from_millis(5));
        let (senders, high_rx, low_rx) = PriorityEventCoordinator::channels();
        let handle = coordinator.start(recorder.clone(), high_rx, low_rx);

        for i in 0..20 {
            senders.low.send(event(&format!("low-{}", i))).unwrap();
        }
        sleep(Duration::from_millis(25)).await;
        senders.high.send(event("high")).unwrap();
        drop(senders);
        handle.join().await;

        let seen = recorder.seen.lock().clone();
        assert_eq!(seen.len(), 21);
        let position = seen.iter().position(|(id, _)| id == "high").unwrap();
        // Only the low items done or in flight when it arrived precede it
        assert_eq!(position, 3);
        assert_eq!(seen[position].1, Priority::High);
    }

    #[tokio::test]
    async fn test_handler_errors_do_not_stop_the_stream() {
        let recorder = Arc::new(Recorder {
            seen: SyncMutex::new(Vec::new()),
            delay: Duration::ZERO,
        });
        let coordinator =
            PriorityEventCoordinator::new(Duration::from_millis(1), Duration::from_millis(1));
        let (senders, high_rx, low_rx) = PriorityEventCoordinator::channels();
        let handle = coordinator.start(recorder.clone(), high_rx, low_rx);

        senders.low.send(event("boom")).unwrap();
        senders.low.send(event("after")).unwrap();
        drop(senders);
        handle.join().await;
        assert_eq!(recorder.seen.lock().clone(), vec![("after".to_string(), Priority::Low)]);
    }
}
