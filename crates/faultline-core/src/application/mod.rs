/// Scenario lookup by changed element signature
pub mod scenario_index;

/// Anchored subgraph matching
pub mod matcher;

/// Action recipes and the DO/UNDO executor
pub mod action_executor;

/// Delta-driven scenario evaluation
pub mod evaluator;

/// Ingestion event processing
pub mod processor;

/// Replication of the primary graph to evaluator workers
pub mod replicator;

/// High/low priority event scheduling
pub mod coordinator;

/// Template lifecycle
pub mod template_loader;

/// Datasource polling with retry
pub mod datasource_poller;

/// The assembled engine
pub mod engine;
