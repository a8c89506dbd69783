/// Ingestion events
pub mod events;

/// Action identity, steps and active action records
pub mod action;

/// Template lifecycle
pub mod template;

/// Repository interfaces
pub mod repository;

/// Message bus interface
pub mod messaging;

/// Datasource interfaces
pub mod datasource;
