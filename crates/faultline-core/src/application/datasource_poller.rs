//! Pulls entities from a datasource driver into the low-priority stream.
//!
//! Driver calls that fail are retried with exponential backoff. A datasource
//! that keeps failing past its time-to-live is abandoned: the call reports
//! the fault through the fault handler and a spawned poller stops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::domain::datasource::{DatasourceDriver, RawEvent, SyncMode, Transformer};
use crate::domain::events::EntityEvent;
use crate::CoreError;

/// Called with the driver name and the error once a datasource is abandoned
pub type FaultHandler = Arc<dyn Fn(&str, &CoreError) + Send + Sync>;

/// Backoff and give-up policy for driver calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// First retry delay
    pub backoff: Duration,
    /// Upper bound of the retry delay
    pub backoff_max: Duration,
    /// How long a call may keep failing
    pub ttl: Duration,
}

impl RetryPolicy {
    /// Policy from the engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            backoff: config.datasource_backoff(),
            backoff_max: config.datasource_backoff_max(),
            ttl: config.datasource_ttl(),
        }
    }
}

/// Drives one datasource
pub struct DatasourcePoller {
    driver: Arc<dyn DatasourceDriver>,
    transformer: Arc<dyn Transformer>,
    sink: UnboundedSender<EntityEvent>,
    policy: RetryPolicy,
    on_fault: Option<FaultHandler>,
}

impl DatasourcePoller {
    /// Create a poller sending into `sink`, normally the low-priority sender
    pub fn new(
        driver: Arc<dyn DatasourceDriver>,
        transformer: Arc<dyn Transformer>,
        sink: UnboundedSender<EntityEvent>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            driver,
            transformer,
            sink,
            policy,
            on_fault: None,
        }
    }

    /// Install the handler invoked when the datasource is abandoned
    pub fn with_fault_handler(mut self, handler: FaultHandler) -> Self {
        self.on_fault = Some(handler);
        self
    }

    /// Name of the underlying driver
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// First full load after start
    pub async fn init_snapshot(&self) -> Result<usize, CoreError> {
        let raw = self
            .with_retry("get_all", || self.driver.get_all(SyncMode::InitSnapshot))
            .await?;
        self.emit(raw)
    }

    /// Periodic full load
    pub async fn snapshot(&self) -> Result<usize, CoreError> {
        let raw = self
            .with_retry("get_all", || self.driver.get_all(SyncMode::Snapshot))
            .await?;
        self.emit(raw)
    }

    /// Incremental poll
    pub async fn poll_changes(&self) -> Result<usize, CoreError> {
        let raw = self
            .with_retry("get_changes", || self.driver.get_changes(SyncMode::Update))
            .await?;
        self.emit(raw)
    }

    /// Handle a pushed notification. Notification types the driver does not
    /// declare are ignored.
    pub async fn push(&self, payload: Value, event_type: &str) -> Result<usize, CoreError> {
        if !self.driver.get_event_types().iter().any(|t| t == event_type) {
            debug!(datasource = self.name(), event_type, "Ignoring undeclared notification type");
            return Ok(0);
        }
        let enriched = self.driver.enrich_event(payload, event_type).await?;
        self.emit(enriched.into_vec())
    }

    /// Run an initial snapshot, then periodic snapshots and change polls
    /// until the sink closes or the datasource is abandoned
    pub fn spawn(
        self: Arc<Self>,
        snapshot_every: Duration,
        changes_every: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            match self.init_snapshot().await {
                Err(CoreError::DriverFault(_)) | Err(CoreError::ChannelClosed(_)) => {
                    info!(datasource = self.name(), "Datasource poller stopped");
                    return;
                }
                Err(e) => error!(datasource = self.name(), error = %e, "Initial snapshot failed"),
                Ok(_) => {}
            }
            let mut snapshots = interval(snapshot_every);
            let mut changes = interval(changes_every);
            snapshots.set_missed_tick_behavior(MissedTickBehavior::Skip);
            changes.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Both intervals fire immediately; the initial snapshot covers that
            snapshots.tick().await;
            changes.tick().await;

            while !self.sink.is_closed() {
                let result = tokio::select! {
                    _ = snapshots.tick() => self.snapshot().await,
                    _ = changes.tick() => self.poll_changes().await,
                };
                match result {
                    Err(CoreError::ChannelClosed(_)) | Err(CoreError::DriverFault(_)) => break,
                    Err(e) => warn!(datasource = self.name(), error = %e, "Datasource poll failed"),
                    Ok(_) => {}
                }
            }
            info!(datasource = self.name(), "Datasource poller stopped");
        })
    }

    async fn with_retry<F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<Vec<RawEvent>, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<RawEvent>, CoreError>>,
    {
        let started = Instant::now();
        let mut delay = self.policy.backoff;
        let mut attempt = 1u32;
        loop {
            match call().await {
                Ok(events) => return Ok(events),
                Err(e) => {
                    if started.elapsed() + delay > self.policy.ttl {
                        let fault = CoreError::DriverFault(format!(
                            "{} {} failed after {} attempts: {}",
                            self.name(),
                            operation,
                            attempt,
                            e
                        ));
                        error!(
                            datasource = self.name(),
                            operation,
                            attempt,
                            error = %e,
                            "Abandoning datasource"
                        );
                        if let Some(handler) = &self.on_fault {
                            handler(self.name(), &fault);
                        }
                        return Err(fault);
                    }
                    warn!(
                        datasource = self.name(),
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Driver call failed, retrying"
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(self.policy.backoff_max);
                    attempt += 1;
                }
            }
        }
    }

    fn emit(&self, raw: Vec<RawEvent>) -> Result<usize, CoreError> {
        let mut sent = 0;
        for event in &raw {
            let converted = match self.transformer.transform(event) {
                Ok(converted) => converted,
                Err(e) => {
                    warn!(datasource = self.name(), error = %e, "Skipping untransformable event");
                    continue;
                }
            };
            for entity_event in converted {
                self.sink
                    .send(entity_event)
                    .map_err(|_| CoreError::ChannelClosed("low priority stream".to_string()))?;
                sent += 1;
            }
        }
        debug!(datasource = self.name(), raw = raw.len(), sent, "Datasource events forwarded");
        Ok(sent)
    }
}
