use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use faultline_dsl::ActionType;
use faultline_graph::GraphSnapshot;
use tokio::sync::RwLock;
use tracing::debug;

use faultline_core::{
    domain::repository::{ActiveActionStore, EventLog, SnapshotStore, TemplateStore},
    ActionId, ActiveAction, CoreError, EntityEvent, StoredEvent, TemplateRecord, TemplateStatus,
    TriggerKey,
};

/// In-memory implementation of the EventLog
#[derive(Default)]
pub struct InMemoryEventLog {
    events: RwLock<Vec<StoredEvent>>,
    next_id: AtomicU64,
}

impl InMemoryEventLog {
    /// Create an empty event log
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded events
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// True if nothing was recorded
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn create(&self, event: &EntityEvent) -> Result<u64, CoreError> {
        let mut events = self.events.write().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        events.push(StoredEvent {
            id,
            event: event.clone(),
            recorded_at: Utc::now(),
        });
        Ok(id)
    }

    async fn query(&self, after: Option<u64>) -> Result<Vec<StoredEvent>, CoreError> {
        let events = self.events.read().await;
        let threshold = after.unwrap_or(0);
        Ok(events.iter().filter(|e| e.id > threshold).cloned().collect())
    }

    async fn last_event_id(&self) -> Result<Option<u64>, CoreError> {
        Ok(self.events.read().await.last().map(|e| e.id))
    }
}

/// In-memory implementation of the SnapshotStore, keeping every snapshot
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<Vec<GraphSnapshot>>,
}

impl InMemorySnapshotStore {
    /// Create an empty snapshot store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots
    pub async fn count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn create(&self, snapshot: &GraphSnapshot) -> Result<(), CoreError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.push(snapshot.clone());
        debug!(
            count = snapshots.len(),
            last_event_id = ?snapshot.last_event_id,
            "Snapshot stored"
        );
        Ok(())
    }

    async fn latest(&self) -> Result<Option<GraphSnapshot>, CoreError> {
        Ok(self.snapshots.read().await.last().cloned())
    }
}

/// In-memory implementation of the TemplateStore
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<String, TemplateRecord>>,
}

impl InMemoryTemplateStore {
    /// Create an empty template store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn save(&self, record: &TemplateRecord) -> Result<(), CoreError> {
        let mut templates = self.templates.write().await;
        templates.insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<TemplateRecord>, CoreError> {
        let templates = self.templates.read().await;
        Ok(templates.get(name).cloned())
    }

    async fn list(&self, status: Option<TemplateStatus>) -> Result<Vec<TemplateRecord>, CoreError> {
        let templates = self.templates.read().await;
        let mut result: Vec<TemplateRecord> = templates
            .values()
            .filter(|record| match status {
                Some(s) => record.status == s,
                None => true,
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn delete(&self, name: &str) -> Result<(), CoreError> {
        let mut templates = self.templates.write().await;
        templates.remove(name);
        Ok(())
    }
}

/// In-memory implementation of the ActiveActionStore.
///
/// Triggers are grouped per action id; the map entry lock makes `add` and
/// `remove` atomic per action.
#[derive(Default)]
pub struct InMemoryActiveActionStore {
    actions: DashMap<ActionId, Vec<ActiveAction>>,
    sequence: AtomicU64,
}

impl InMemoryActiveActionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers currently holding an action
    pub fn triggers(&self, action_id: &ActionId) -> Vec<TriggerKey> {
        self.actions
            .get(action_id)
            .map(|holders| holders.iter().map(|a| a.trigger.clone()).collect())
            .unwrap_or_default()
    }

    fn collect<F>(&self, predicate: F) -> Vec<ActiveAction>
    where
        F: Fn(&ActiveAction) -> bool,
    {
        let mut result: Vec<ActiveAction> = self
            .actions
            .iter()
            .flat_map(|entry| {
                entry.value().iter().filter(|a| predicate(a)).cloned().collect::<Vec<_>>()
            })
            .collect();
        result.sort_by_key(|a| a.sequence);
        result
    }
}

impl ActiveActionStore for InMemoryActiveActionStore {
    fn add(&self, mut action: ActiveAction) -> Result<Option<usize>, CoreError> {
        let mut holders = self.actions.entry(action.action_id.clone()).or_default();
        if holders.iter().any(|a| a.trigger == action.trigger) {
            return Ok(None);
        }
        action.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        holders.push(action);
        Ok(Some(holders.len()))
    }

    fn remove(
        &self,
        action_id: &ActionId,
        trigger: &TriggerKey,
    ) -> Result<Option<usize>, CoreError> {
        match self.actions.entry(action_id.clone()) {
            Entry::Vacant(_) => Ok(None),
            Entry::Occupied(mut entry) => {
                let holders = entry.get_mut();
                let Some(position) = holders.iter().position(|a| &a.trigger == trigger) else {
                    return Ok(None);
                };
                holders.remove(position);
                let remaining = holders.len();
                if remaining == 0 {
                    entry.remove();
                }
                Ok(Some(remaining))
            }
        }
    }

    fn by_target(
        &self,
        action_type: ActionType,
        target_id: &str,
    ) -> Result<Vec<ActiveAction>, CoreError> {
        Ok(self.collect(|a| a.action_type == action_type && a.target_id == target_id))
    }

    fn by_template(&self, template_name: &str) -> Result<Vec<ActiveAction>, CoreError> {
        Ok(self.collect(|a| a.template_name == template_name))
    }

    fn count(&self) -> Result<usize, CoreError> {
        Ok(self.actions.len())
    }
}
