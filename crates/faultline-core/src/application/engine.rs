//! The primary graph and everything wired around it.
//!
//! [`FaultlineEngine`] is the single mutation path of the primary graph.
//! Each event is applied by the [`EventProcessor`], every resulting delta is
//! replicated to the evaluator workers and acknowledged, and only then is
//! the event appended to the event log. Deduced alarm changes and external
//! workflow triggers are published on the message bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use faultline_graph::{category, GraphDelta, PropertyGraph, Vertex};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::action_executor::DEDUCED_ALARM_TYPE;
use super::coordinator::{CoordinatorHandle, EventHandler, EventSenders, PriorityEventCoordinator};
use super::processor::{EventProcessor, ProcessOutcome};
use super::replicator::GraphReplicator;
use super::template_loader::TemplateLoader;
use crate::config::EngineConfig;
use crate::domain::events::{EntityEvent, Priority};
use crate::domain::messaging::{event_types, MessageBus};
use crate::domain::repository::{ActiveActionStore, EventLog, SnapshotStore, TemplateStore};
use crate::CoreError;

/// Storage and transport collaborators of an engine
#[derive(Clone)]
pub struct EngineRepositories {
    /// Applied events
    pub event_log: Arc<dyn EventLog>,
    /// Graph snapshots
    pub snapshots: Arc<dyn SnapshotStore>,
    /// Template documents and status
    pub templates: Arc<dyn TemplateStore>,
    /// Triggers holding each active action
    pub actions: Arc<dyn ActiveActionStore>,
    /// Notification transport
    pub bus: Arc<dyn MessageBus>,
}

type Receivers = (UnboundedReceiver<EntityEvent>, UnboundedReceiver<EntityEvent>);

/// Primary graph, evaluator workers and the streams feeding them
pub struct FaultlineEngine {
    config: EngineConfig,
    processor: EventProcessor,
    replicator: Arc<GraphReplicator>,
    templates: TemplateLoader,
    repositories: EngineRepositories,
    coordinator: Arc<PriorityEventCoordinator>,
    senders: EventSenders,
    receivers: Mutex<Option<Receivers>>,
    running: Mutex<Option<CoordinatorHandle>>,
    // Deltas committed by the event being handled, in commit order
    pending: Arc<Mutex<Vec<GraphDelta>>>,
    since_snapshot: AtomicU64,
}

impl FaultlineEngine {
    /// Build an engine from its repositories, restoring the primary graph
    /// from the latest snapshot and the events recorded after it.
    ///
    /// Workers receive the restored graph and the active templates with
    /// evaluation disabled, then evaluate everything once. The resulting
    /// steps wait in the high-priority stream until [`start`](Self::start).
    pub async fn create_with_repositories(
        config: EngineConfig,
        repositories: EngineRepositories,
    ) -> Result<Arc<Self>, CoreError> {
        let primary = PropertyGraph::new("primary");
        let processor = EventProcessor::new(primary.clone());
        let replayed = restore(&processor, &repositories).await?;

        let (senders, high_rx, low_rx) = PriorityEventCoordinator::channels();
        let replicator = Arc::new(GraphReplicator::spawn(
            &primary,
            config.workers,
            Arc::clone(&repositories.actions),
            senders.high.clone(),
            config.ack_timeout(),
        ));
        let templates =
            TemplateLoader::new(Arc::clone(&repositories.templates), replicator.clone());
        let loaded = templates.load_active().await?;

        let pending = Arc::new(Mutex::new(Vec::new()));
        let buffer = Arc::clone(&pending);
        primary.subscribe(
            "replication-buffer",
            move |delta| {
                if !delta.is_noop() {
                    buffer.lock().push(delta.clone());
                }
                Ok(())
            },
            true,
        );

        let steps = replicator.enable_evaluations().await?;
        info!(
            workers = replicator.worker_count(),
            vertices = primary.num_vertices(),
            replayed,
            templates = loaded,
            steps,
            "Engine initialized"
        );

        let coordinator = PriorityEventCoordinator::new(
            config.high_priority_cooldown(),
            config.low_priority_retry(),
        );
        Ok(Arc::new(Self {
            config,
            processor,
            replicator,
            templates,
            repositories,
            coordinator,
            senders,
            receivers: Mutex::new(Some((high_rx, low_rx))),
            running: Mutex::new(None),
            pending,
            since_snapshot: AtomicU64::new(0),
        }))
    }

    /// Start consuming both streams
    pub fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        let (high, low) = self
            .receivers
            .lock()
            .take()
            .ok_or_else(|| CoreError::ConfigurationError("engine already started".to_string()))?;
        let handler: Arc<dyn EventHandler> = self.clone();
        let handle = self.coordinator.start(handler, high, low);
        *self.running.lock() = Some(handle);
        Ok(())
    }

    /// Stop the consumers and the workers
    pub async fn shutdown(&self) {
        let running = self.running.lock().take();
        if let Some(handle) = running {
            handle.abort();
        }
        self.replicator.shutdown().await;
        self.processor.graph().clear_subscribers();
        info!("Engine stopped");
    }

    /// Stream senders; datasources feed `low`
    pub fn senders(&self) -> EventSenders {
        self.senders.clone()
    }

    /// The primary graph
    pub fn graph(&self) -> &PropertyGraph {
        self.processor.graph()
    }

    /// Template lifecycle
    pub fn templates(&self) -> &TemplateLoader {
        &self.templates
    }

    /// The evaluator workers
    pub fn replicator(&self) -> &GraphReplicator {
        &self.replicator
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Queue removal of tombstones older than the retention window
    pub fn prune_tombstones(&self) -> Result<usize, CoreError> {
        let events = self
            .processor
            .prune_tombstones(self.config.tombstone_retention(), Utc::now());
        let count = events.len();
        for event in events {
            self.senders
                .low
                .send(event)
                .map_err(|_| CoreError::ChannelClosed("low priority stream".to_string()))?;
        }
        if count > 0 {
            debug!(count, "Tombstones queued for removal");
        }
        Ok(count)
    }

    /// Run the tombstone sweep periodically while the engine is alive
    pub fn spawn_prune_sweep(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticks = interval(every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if let Err(e) = engine.prune_tombstones() {
                    warn!(error = %e, "Tombstone sweep stopped");
                    break;
                }
            }
        })
    }

    /// Store a snapshot of the primary graph now
    pub async fn take_snapshot(&self) -> Result<(), CoreError> {
        let last_event_id = self.repositories.event_log.last_event_id().await?;
        let snapshot = self.processor.graph().snapshot(last_event_id);
        self.repositories.snapshots.create(&snapshot).await?;
        self.since_snapshot.store(0, Ordering::Relaxed);
        info!(
            last_event_id = ?last_event_id,
            vertices = snapshot.vertices.len(),
            edges = snapshot.edges.len(),
            "Graph snapshot stored"
        );
        Ok(())
    }

    async fn persist(&self, event: &EntityEvent) -> Result<(), CoreError> {
        let id = self.repositories.event_log.create(event).await?;
        let count = self.since_snapshot.fetch_add(1, Ordering::Relaxed) + 1;
        let every = self.config.snapshot_interval_events;
        if every > 0 && count >= every {
            let snapshot = self.processor.graph().snapshot(Some(id));
            self.repositories.snapshots.create(&snapshot).await?;
            self.since_snapshot.store(0, Ordering::Relaxed);
            debug!(last_event_id = id, "Periodic graph snapshot stored");
        }
        Ok(())
    }

    async fn publish(&self, event_type: &str, payload: Value) {
        if let Err(e) = self
            .repositories
            .bus
            .publish(&self.config.notifications_topic, event_type, payload)
            .await
        {
            warn!(event_type, error = %e, "Notification not published");
        }
    }
}

#[async_trait]
impl EventHandler for FaultlineEngine {
    async fn handle_event(&self, event: EntityEvent, priority: Priority) -> Result<(), CoreError> {
        let outcome = self.processor.process_event(&event);
        let deltas = std::mem::take(&mut *self.pending.lock());
        let outcome = outcome?;

        let mut fault = None;
        for delta in &deltas {
            if let Err(e) = self.replicator.replicate(delta).await {
                fault = Some(e);
            }
        }

        for delta in &deltas {
            if let Some((event_type, payload)) = deduced_alarm_notification(delta) {
                self.publish(event_type, payload).await;
            }
        }

        match outcome {
            ProcessOutcome::Applied if !deltas.is_empty() => self.persist(&event).await?,
            ProcessOutcome::Applied => {}
            ProcessOutcome::Dropped(reason) => {
                debug!(
                    priority = priority.as_str(),
                    subject = %event.subject(),
                    reason,
                    "Event dropped"
                );
            }
            ProcessOutcome::External(payload) => {
                self.publish(event_types::EXECUTE_EXTERNAL, payload).await;
            }
        }

        match fault {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// Load the latest snapshot and replay the events recorded after it
async fn restore(
    processor: &EventProcessor,
    repositories: &EngineRepositories,
) -> Result<usize, CoreError> {
    let snapshot = repositories.snapshots.latest().await?;
    let after = match &snapshot {
        Some(snapshot) => {
            processor.graph().load_snapshot(snapshot)?;
            snapshot.last_event_id
        }
        None => None,
    };

    let events = repositories.event_log.query(after).await?;
    let replayed = events.len();
    for stored in events {
        if let Err(e) = processor.process_event(&stored.event) {
            error!(event_id = stored.id, error = %e, "Replayed event failed");
        }
    }
    if snapshot.is_some() || replayed > 0 {
        info!(
            from_snapshot = snapshot.is_some(),
            after = ?after,
            replayed,
            "Primary graph restored"
        );
    }
    Ok(replayed)
}

fn is_deduced_alarm(vertex: &Vertex) -> bool {
    vertex.category() == Some(category::ALARM) && vertex.entity_type() == Some(DEDUCED_ALARM_TYPE)
}

fn active_deduced_alarm(element: Option<&faultline_graph::GraphElement>) -> Option<&Vertex> {
    element
        .and_then(|e| e.as_vertex())
        .filter(|v| is_deduced_alarm(v) && !v.is_deleted())
}

/// Bus notification for a delta that raised or retracted a deduced alarm
pub fn deduced_alarm_notification(delta: &GraphDelta) -> Option<(&'static str, Value)> {
    let before = active_deduced_alarm(delta.before.as_ref());
    let after = active_deduced_alarm(delta.after.as_ref());
    match (before, after) {
        (None, Some(alarm)) => Some((event_types::DEDUCED_ALARM_ACTIVATED, alarm_payload(alarm))),
        (Some(alarm), None) => Some((event_types::DEDUCED_ALARM_DEACTIVATED, alarm_payload(alarm))),
        _ => None,
    }
}

fn alarm_payload(alarm: &Vertex) -> Value {
    json!({
        "id": alarm.id,
        "properties": alarm.properties,
    })
}
