//!
//! Faultline Core - evaluation engine of the Faultline platform
//!
//! Observed faults arrive as [`EntityEvent`]s and are applied to the primary
//! property graph. Each change is replicated to evaluator workers, which
//! match the installed scenarios around the changed element and feed the
//! deduced conclusions (alarms, states, causal links) back into the primary
//! graph as high-priority events.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - events, actions, templates and collaborator interfaces
pub mod domain;

/// Application services - matching, evaluation, replication and scheduling
pub mod application;

/// Engine configuration
pub mod config;

/// Error types
pub mod error;

pub use config::EngineConfig;
pub use error::{CoreError, CoreResult};

pub use domain::action::{deduced_alarm_id, ActionId, ActionMode, ActiveAction, Step, TriggerKey};
pub use domain::datasource::{DatasourceDriver, Enriched, RawEvent, SyncMode, Transformer};
pub use domain::events::{EntityEvent, EventAction, Neighbor, Priority, StoredEvent};
pub use domain::messaging::{event_types, BusMessage, MessageBus};
pub use domain::repository::{ActiveActionStore, EventLog, SnapshotStore, TemplateStore};
pub use domain::template::{TemplateRecord, TemplateStatus};

pub use application::coordinator::{EventHandler, EventSenders, PriorityEventCoordinator};
pub use application::datasource_poller::{DatasourcePoller, RetryPolicy};
pub use application::engine::{EngineRepositories, FaultlineEngine};
pub use application::evaluator::ScenarioEvaluator;
pub use application::processor::{EventProcessor, ProcessOutcome};
pub use application::replicator::{GraphReplicator, ScenarioInstaller};
pub use application::template_loader::TemplateLoader;
