//! In-memory state store implementation for the Faultline platform
//!
//! This crate provides in-memory implementations of the repository and
//! messaging interfaces defined in the faultline-core crate. It is useful for
//! development, testing and deployments where the graph is rebuilt from the
//! datasources on every start.

use std::sync::Arc;

use faultline_core::application::engine::EngineRepositories;

pub mod repositories;
pub use repositories::{
    InMemoryActiveActionStore, InMemoryEventLog, InMemorySnapshotStore, InMemoryTemplateStore,
};

pub mod message_bus;
pub use message_bus::{InMemoryMessageBus, DEFAULT_BUS_CAPACITY};

/// Provider for in-memory repositories. The stores are shared, so an engine
/// created again from the same provider cold-starts from what the previous
/// one recorded.
#[derive(Clone, Default)]
pub struct InMemoryStateStoreProvider {
    event_log: Arc<InMemoryEventLog>,
    snapshots: Arc<InMemorySnapshotStore>,
    templates: Arc<InMemoryTemplateStore>,
    bus: Arc<InMemoryMessageBus>,
}

impl InMemoryStateStoreProvider {
    /// Create a provider with empty stores
    pub fn new() -> Self {
        Self::default()
    }

    /// Repositories for `FaultlineEngine::create_with_repositories`.
    ///
    /// Active actions are process state: each call hands out a fresh
    /// action store, as a restarted engine would see.
    pub fn create_repositories(&self) -> EngineRepositories {
        EngineRepositories {
            event_log: self.event_log.clone(),
            snapshots: self.snapshots.clone(),
            templates: self.templates.clone(),
            actions: Arc::new(InMemoryActiveActionStore::new()),
            bus: self.bus.clone(),
        }
    }

    /// The shared event log
    pub fn event_log(&self) -> &Arc<InMemoryEventLog> {
        &self.event_log
    }

    /// The shared snapshot store
    pub fn snapshots(&self) -> &Arc<InMemorySnapshotStore> {
        &self.snapshots
    }

    /// The shared template store
    pub fn templates(&self) -> &Arc<InMemoryTemplateStore> {
        &self.templates
    }

    /// The shared message bus
    pub fn bus(&self) -> &Arc<InMemoryMessageBus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests;
