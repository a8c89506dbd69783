//! Persistence traits for the Faultline engine
//!
//! The engine consumes storage as an opaque event log and key-value API.
//! External crates implement these traits to provide different backends.

use async_trait::async_trait;
use faultline_dsl::ActionType;
use faultline_graph::GraphSnapshot;

use super::action::{ActionId, ActiveAction, TriggerKey};
use super::events::{EntityEvent, StoredEvent};
use super::template::{TemplateRecord, TemplateStatus};
use crate::CoreError;

/// Append-only log of applied events
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Record an event and return its id
    async fn create(&self, event: &EntityEvent) -> Result<u64, CoreError>;

    /// Events with an id greater than `after`, oldest first; all events for `None`
    async fn query(&self, after: Option<u64>) -> Result<Vec<StoredEvent>, CoreError>;

    /// Id of the newest event
    async fn last_event_id(&self) -> Result<Option<u64>, CoreError>;
}

/// Storage for full graph snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot
    async fn create(&self, snapshot: &GraphSnapshot) -> Result<(), CoreError>;

    /// The newest snapshot
    async fn latest(&self) -> Result<Option<GraphSnapshot>, CoreError>;
}

/// Storage for template documents and their status
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Insert or replace a template record
    async fn save(&self, record: &TemplateRecord) -> Result<(), CoreError>;

    /// Find a template by name
    async fn find_by_name(&self, name: &str) -> Result<Option<TemplateRecord>, CoreError>;

    /// All templates, optionally restricted to one status
    async fn list(&self, status: Option<TemplateStatus>) -> Result<Vec<TemplateRecord>, CoreError>;

    /// Remove a template record
    async fn delete(&self, name: &str) -> Result<(), CoreError>;
}

/// Triggers currently holding each active action.
///
/// Shared by every evaluator worker and called from inside graph
/// notifications, so the interface is synchronous. Implementations must make
/// `add` and `remove` atomic per action id.
pub trait ActiveActionStore: Send + Sync {
    /// Record a trigger and return how many triggers now hold the action, or
    /// `None` if the trigger was already recorded
    fn add(&self, action: ActiveAction) -> Result<Option<usize>, CoreError>;

    /// Drop a trigger and return how many remain, or `None` if the trigger
    /// was not recorded
    fn remove(
        &self,
        action_id: &ActionId,
        trigger: &TriggerKey,
    ) -> Result<Option<usize>, CoreError>;

    /// Active actions of a type on a target, oldest first
    fn by_target(
        &self,
        action_type: ActionType,
        target_id: &str,
    ) -> Result<Vec<ActiveAction>, CoreError>;

    /// Active actions triggered by scenarios of a template
    fn by_template(&self, template_name: &str) -> Result<Vec<ActiveAction>, CoreError>;

    /// Number of distinct active actions
    fn count(&self) -> Result<usize, CoreError>;
}
