//! Synchronous replication of primary graph changes to evaluator workers.
//!
//! Each worker owns a private replica of the primary graph and a
//! [`ScenarioEvaluator`] subscribed to it. Deltas travel over one FIFO
//! channel per worker, so every replica applies them in the primary's commit
//! order, and [`GraphReplicator::replicate`] returns only once every worker
//! acknowledged the delta or the acknowledgement timeout passed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use faultline_dsl::Scenario;
use faultline_graph::{GraphDelta, PropertyGraph};
use faultline_monitoring::metrics::EngineMetrics;
use futures::future::join_all;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::evaluator::ScenarioEvaluator;
use crate::domain::events::EntityEvent;
use crate::domain::repository::ActiveActionStore;
use crate::CoreError;

/// Messages a worker consumes, in order
pub enum ReplicaMessage {
    /// Apply a primary delta to the replica
    Delta {
        /// The change
        delta: GraphDelta,
        /// Completed once the replica and its evaluator processed it
        ack: oneshot::Sender<Result<(), CoreError>>,
    },
    /// Install or replace a template's scenarios
    InstallTemplate {
        /// Template name
        template: String,
        /// Compiled scenarios
        scenarios: Vec<Arc<Scenario>>,
        /// Completed with the number of emitted steps
        ack: oneshot::Sender<usize>,
    },
    /// Uninstall a template and retract its actions
    RemoveTemplate {
        /// Template name
        template: String,
        /// Completed with the number of emitted steps
        ack: oneshot::Sender<usize>,
    },
    /// Turn actions on and evaluate everything once
    EnableEvaluations {
        /// Completed with the number of emitted steps
        ack: oneshot::Sender<usize>,
    },
    /// Drain and stop the worker
    Shutdown,
}

/// Something that installs compiled scenarios where they are evaluated
#[async_trait]
pub trait ScenarioInstaller: Send + Sync {
    /// Install or replace a template's scenarios
    async fn install_template(
        &self,
        template: &str,
        scenarios: Vec<Arc<Scenario>>,
    ) -> Result<usize, CoreError>;

    /// Uninstall a template, retracting the actions it holds
    async fn remove_template(&self, template: &str) -> Result<usize, CoreError>;
}

struct Worker {
    index: usize,
    sender: UnboundedSender<ReplicaMessage>,
    replica: PropertyGraph,
    evaluator: Arc<ScenarioEvaluator>,
    applied: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Fans primary deltas out to the evaluator workers
pub struct GraphReplicator {
    workers: Vec<Worker>,
    ack_timeout: Duration,
}

impl GraphReplicator {
    /// Fork `primary` once per worker and start the worker loops. Workers
    /// start with evaluation disabled.
    pub fn spawn(
        primary: &PropertyGraph,
        workers: usize,
        store: Arc<dyn ActiveActionStore>,
        loopback: UnboundedSender<EntityEvent>,
        ack_timeout: Duration,
    ) -> Self {
        let workers = (0..workers.max(1))
            .map(|index| {
                let replica = primary.fork(&format!("replica-{}", index));
                let evaluator = Arc::new(ScenarioEvaluator::new(
                    &format!("worker-{}", index),
                    Arc::clone(&store),
                    loopback.clone(),
                ));
                evaluator.attach(&replica);

                let applied = Arc::new(AtomicU64::new(0));
                let counter = Arc::clone(&applied);
                replica.subscribe(
                    "applied-counter",
                    move |_| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    },
                    true,
                );

                let (sender, receiver) = unbounded_channel();
                let handle = tokio::spawn(run_worker(
                    index,
                    replica.clone(),
                    Arc::clone(&evaluator),
                    receiver,
                ));
                Worker {
                    index,
                    sender,
                    replica,
                    evaluator,
                    applied,
                    handle: Mutex::new(Some(handle)),
                }
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), "Evaluator workers started");
        Self { workers, ack_timeout }
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The replica graph of a worker
    pub fn replica(&self, index: usize) -> Option<&PropertyGraph> {
        self.workers.get(index).map(|w| &w.replica)
    }

    /// The evaluator of a worker
    pub fn evaluator(&self, index: usize) -> Option<&Arc<ScenarioEvaluator>> {
        self.workers.get(index).map(|w| &w.evaluator)
    }

    /// Graph notifications seen by a worker's replica
    pub fn applied_count(&self, index: usize) -> u64 {
        self.workers
            .get(index)
            .map(|w| w.applied.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Worker that owns a template, stable for a given name and worker count
    pub fn worker_for(&self, template: &str) -> usize {
        let digest = Sha256::digest(template.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % self.workers.len() as u64) as usize
    }

    /// Push a delta to every worker and wait for all acknowledgements.
    ///
    /// A worker that fails or does not answer in time is reported as a
    /// replication fault; the other workers are unaffected.
    pub async fn replicate(&self, delta: &GraphDelta) -> Result<(), CoreError> {
        let mut pending = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let (ack, receiver) = oneshot::channel();
            let message = ReplicaMessage::Delta {
                delta: delta.clone(),
                ack,
            };
            if worker.sender.send(message).is_err() {
                pending.push((worker.index, None));
            } else {
                pending.push((worker.index, Some(receiver)));
            }
        }

        let waits = pending.into_iter().map(|(index, receiver)| async move {
            let outcome = match receiver {
                None => Err(CoreError::ChannelClosed(format!("worker {} is not running", index))),
                Some(receiver) => match timeout(self.ack_timeout, receiver).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(CoreError::ChannelClosed(format!(
                        "worker {} dropped the ack",
                        index
                    ))),
                    Err(_) => Err(CoreError::ReplicationFault(format!(
                        "worker {} did not acknowledge within {:?}",
                        index, self.ack_timeout
                    ))),
                },
            };
            (index, outcome)
        });

        let mut faults = Vec::new();
        for (index, outcome) in join_all(waits).await {
            if let Err(e) = outcome {
                EngineMetrics::record_replication_fault(index);
                error!(
                    worker = index,
                    element = %delta.identity(),
                    error = %e,
                    "Replication fault"
                );
                faults.push(index);
            }
        }

        if faults.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ReplicationFault(format!(
                "{} not acknowledged by workers {:?}",
                delta.identity(),
                faults
            )))
        }
    }

    /// Turn evaluation on in every worker
    pub async fn enable_evaluations(&self) -> Result<usize, CoreError> {
        let mut total = 0;
        for worker in &self.workers {
            let (ack, receiver) = oneshot::channel();
            self.send(worker, ReplicaMessage::EnableEvaluations { ack })?;
            total += self.await_ack(worker, receiver).await?;
        }
        Ok(total)
    }

    fn send(&self, worker: &Worker, message: ReplicaMessage) -> Result<(), CoreError> {
        worker
            .sender
            .send(message)
            .map_err(|_| {
                CoreError::ChannelClosed(format!("worker {} is not running", worker.index))
            })
    }

    async fn await_ack(
        &self,
        worker: &Worker,
        receiver: oneshot::Receiver<usize>,
    ) -> Result<usize, CoreError> {
        receiver
            .await
            .map_err(|_| {
                CoreError::ChannelClosed(format!("worker {} dropped the ack", worker.index))
            })
    }

    /// Stop every worker after it drained its queue
    pub async fn shutdown(&self) {
        for worker in &self.workers {
            let _ = worker.sender.send(ReplicaMessage::Shutdown);
        }
        for worker in &self.workers {
            let handle = worker.handle.lock().take();
            let Some(handle) = handle else {
                continue;
            };
            if let Err(e) = handle.await {
                warn!(worker = worker.index, error = %e, "Worker task ended abnormally");
            }
        }
        info!("Evaluator workers stopped");
    }
}

#[async_trait]
impl ScenarioInstaller for GraphReplicator {
    async fn install_template(
        &self,
        template: &str,
        scenarios: Vec<Arc<Scenario>>,
    ) -> Result<usize, CoreError> {
        let worker = &self.workers[self.worker_for(template)];
        let (ack, receiver) = oneshot::channel();
        self.send(
            worker,
            ReplicaMessage::InstallTemplate {
                template: template.to_string(),
                scenarios,
                ack,
            },
        )?;
        self.await_ack(worker, receiver).await
    }

    async fn remove_template(&self, template: &str) -> Result<usize, CoreError> {
        let worker = &self.workers[self.worker_for(template)];
        let (ack, receiver) = oneshot::channel();
        self.send(
            worker,
            ReplicaMessage::RemoveTemplate {
                template: template.to_string(),
                ack,
            },
        )?;
        self.await_ack(worker, receiver).await
    }
}

async fn run_worker(
    index: usize,
    replica: PropertyGraph,
    evaluator: Arc<ScenarioEvaluator>,
    mut receiver: UnboundedReceiver<ReplicaMessage>,
) {
    debug!(worker = index, "Worker loop started");
    while let Some(message) = receiver.recv().await {
        match message {
            ReplicaMessage::Delta { delta, ack } => {
                let result = replica.apply_delta(&delta).map_err(CoreError::from);
                let _ = ack.send(result);
            }
            ReplicaMessage::InstallTemplate { template, scenarios, ack } => {
                let _ = ack.send(evaluator.install_template(&template, scenarios, &replica));
            }
            ReplicaMessage::RemoveTemplate { template, ack } => {
                let _ = ack.send(evaluator.remove_template(&template));
            }
            ReplicaMessage::EnableEvaluations { ack } => {
                let _ = ack.send(evaluator.enable_evaluations(&replica));
            }
            ReplicaMessage::Shutdown => break,
        }
    }
    // Subscribers hold handles to the replica
    replica.clear_subscribers();
    debug!(worker = index, "Worker loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::action_executor::tests::TestActionStore;
    use faultline_graph::{labels, props, Edge, Vertex};
    use pretty_assertions::assert_eq;

    fn replicator(
        primary: &PropertyGraph,
        workers: usize,
    ) -> (GraphReplicator, UnboundedReceiver<EntityEvent>) {
        let (tx, rx) = unbounded_channel();
        let replicator = GraphReplicator::spawn(
            primary,
            workers,
            Arc::new(TestActionStore::default()),
            tx,
            Duration::from_secs(5),
        );
        (replicator, rx)
    }

    #[tokio::test]
    async fn test_replicas_follow_primary() {
        let primary = PropertyGraph::new("primary");
        primary.add_vertex(Vertex::new("h1").with_property(props::CATEGORY, "RESOURCE"));
        let (replicator, _rx) = replicator(&primary, 3);

        // The fork carries the existing data
        assert_eq!(replicator.replica(2).unwrap().num_vertices(), 1);

        let deltas = vec![
            primary.add_vertex(Vertex::new("vm1").with_property(props::CATEGORY, "RESOURCE")),
            primary.add_edge(Edge::new("h1", "vm1", labels::CONTAINS)).unwrap(),
            primary.update_vertex(Vertex::new("vm1").with_property(props::STATE, "ACTIVE")),
        ];
        for delta in &deltas {
            replicator.replicate(delta).await.unwrap();
        }
        for delta in primary.remove_vertex("vm1").unwrap() {
            replicator.replicate(&delta).await.unwrap();
        }

        for index in 0..3 {
            let replica = replicator.replica(index).unwrap();
            assert_eq!(replica.snapshot(None).vertices, primary.snapshot(None).vertices);
            assert_eq!(replica.snapshot(None).edges, primary.snapshot(None).edges);
            assert_eq!(replicator.applied_count(index), 5);
        }
        replicator.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_failure_is_reported() {
        let primary = PropertyGraph::new("primary");
        let (replicator, _rx) = replicator(&primary, 2);
        // An edge whose endpoints the replicas have never seen
        let orphan = GraphDelta::edge(None, Some(Edge::new("x", "y", labels::ON)));
        let err = replicator.replicate(&orphan).await.unwrap_err();
        assert!(matches!(err, CoreError::ReplicationFault(_)));

        // Later deltas still replicate
        let delta = primary.add_vertex(Vertex::new("x"));
        replicator.replicate(&delta).await.unwrap();
        replicator.shutdown().await;
    }

    #[tokio::test]
    async fn test_template_partitioning_is_stable() {
        let primary = PropertyGraph::new("primary");
        let (replicator, _rx) = replicator(&primary, 4);
        let owner = replicator.worker_for("host-alarms");
        assert_eq!(owner, replicator.worker_for("host-alarms"));
        assert!(owner < 4);
        replicator.shutdown().await;
    }
}
