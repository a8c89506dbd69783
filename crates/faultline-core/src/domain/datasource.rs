//! Datasource collaborators.
//!
//! A driver talks to a monitoring or inventory system and returns raw
//! events; a transformer turns them into [`EntityEvent`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::events::EntityEvent;
use crate::CoreError;

/// Flat key-value event as produced by a driver. Carries at least
/// `category`, `type` and `sample_timestamp`.
pub type RawEvent = Map<String, Value>;

/// Why a driver is asked for data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// First full load after start
    InitSnapshot,
    /// Periodic full load
    Snapshot,
    /// Incremental poll
    Update,
}

/// Result of enriching a pushed notification
#[derive(Debug, Clone, PartialEq)]
pub enum Enriched {
    /// A single event
    One(RawEvent),
    /// Several events
    Many(Vec<RawEvent>),
}

impl Enriched {
    /// Flatten into a list
    pub fn into_vec(self) -> Vec<RawEvent> {
        match self {
            Enriched::One(event) => vec![event],
            Enriched::Many(events) => events,
        }
    }
}

/// Datasource driver contract
#[async_trait]
pub trait DatasourceDriver: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Every entity the datasource knows about
    async fn get_all(&self, mode: SyncMode) -> Result<Vec<RawEvent>, CoreError>;

    /// Entities changed since the previous call
    async fn get_changes(&self, mode: SyncMode) -> Result<Vec<RawEvent>, CoreError>;

    /// Turn a pushed notification into raw events
    async fn enrich_event(&self, payload: Value, event_type: &str) -> Result<Enriched, CoreError>;

    /// Notification types `enrich_event` accepts
    fn get_event_types(&self) -> Vec<String>;
}

/// Maps raw datasource events to entity events
pub trait Transformer: Send + Sync {
    /// Convert one raw event
    fn transform(&self, event: &RawEvent) -> Result<Vec<EntityEvent>, CoreError>;
}
