use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GraphResult;
use crate::model::{Edge, Vertex};

/// Full serialized graph plus the id of the last event folded into it.
///
/// On cold start the snapshot is loaded and only events with a greater id
/// are replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// All vertices, tombstones included
    pub vertices: Vec<Vertex>,
    /// All edges, tombstones included
    pub edges: Vec<Edge>,
    /// Id of the last event reflected by this snapshot
    pub last_event_id: Option<u64>,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
}

impl GraphSnapshot {
    /// Create a snapshot
    pub fn new(vertices: Vec<Vertex>, edges: Vec<Edge>, last_event_id: Option<u64>) -> Self {
        Self {
            vertices,
            edges,
            last_event_id,
            created_at: Utc::now(),
        }
    }

    /// Encode as JSON bytes
    pub fn to_json(&self) -> GraphResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON bytes
    pub fn from_json(bytes: &[u8]) -> GraphResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
