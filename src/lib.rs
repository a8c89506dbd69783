//! # Faultline
//!
//! Template-driven fault correlation. Datasources report resources and
//! alarms into a property graph; templates describe, as boolean conditions
//! over graph patterns, which observed situations imply deduced alarms,
//! states and causal links. The engine keeps those conclusions in step with
//! every graph change.
//!
//! This crate re-exports the workspace crates:
//!
//! - [`graph`]: the property graph
//! - [`dsl`]: template documents and their compilation to scenarios
//! - [`engine`]: evaluation, replication and scheduling
//! - [`state`]: in-memory stores and message bus
//! - [`monitoring`]: logging and metrics

#![forbid(unsafe_code)]

pub use faultline_core as engine;
pub use faultline_dsl as dsl;
pub use faultline_graph as graph;
pub use faultline_monitoring as monitoring;
pub use faultline_state_inmemory as state;

pub use faultline_core::{CoreError, EngineConfig, EntityEvent, FaultlineEngine};
pub use faultline_graph::{Edge, PropertyGraph, Vertex};

/// Commonly used items
pub mod prelude {
    pub use faultline_core::{
        event_types, CoreError, EngineConfig, EntityEvent, EventSenders, FaultlineEngine,
        MessageBus, Priority, TemplateStatus,
    };
    pub use faultline_graph::{
        category, labels, props, Direction, Edge, EdgeKey, PropertyGraph, Vertex,
    };
    pub use faultline_state_inmemory::InMemoryStateStoreProvider;
}
