//! Normalised ingestion events.
//!
//! Datasource observations and evaluator conclusions both reach the primary
//! graph as [`EntityEvent`]s, so every graph change takes the same path.

use chrono::{DateTime, Utc};
use faultline_graph::{Edge, EdgeKey, Vertex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// What an event asks the processor to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Create or update an entity, and the relationships to its neighbors
    UpdateEntity,
    /// Tombstone an entity and its relationships
    DeleteEntity,
    /// Create or update a relationship
    UpdateRelationship,
    /// Tombstone a relationship
    DeleteRelationship,
    /// Physically remove a tombstoned entity
    RemoveDeletedEntity,
    /// Trigger an external workflow; no graph change
    ExecuteExternal,
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventAction::UpdateEntity => "update_entity",
            EventAction::DeleteEntity => "delete_entity",
            EventAction::UpdateRelationship => "update_relationship",
            EventAction::DeleteRelationship => "delete_relationship",
            EventAction::RemoveDeletedEntity => "remove_deleted_entity",
            EventAction::ExecuteExternal => "execute_external",
        };
        f.write_str(name)
    }
}

/// Event priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Evaluator conclusions looped back into the primary graph
    High,
    /// Freshly observed datasource events
    Low,
}

impl Priority {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Low => "low",
        }
    }
}

/// A neighbor of the event's entity and the relationship connecting them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// The neighbor; created as a placeholder when unknown
    pub vertex: Vertex,
    /// The relationship, with the event entity as one endpoint
    pub edge: Edge,
}

/// A normalised ingestion event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEvent {
    /// Requested change
    pub action: EventAction,

    /// Entity the event is about
    #[serde(default)]
    pub vertex: Option<Vertex>,

    /// Neighbors to connect the entity to
    #[serde(default)]
    pub neighbors: Vec<Neighbor>,

    /// Relationship the event is about
    #[serde(default)]
    pub edge: Option<Edge>,

    /// Workflow payload for `ExecuteExternal`
    #[serde(default)]
    pub payload: Option<Value>,

    /// When the source observed the change
    pub sample_timestamp: DateTime<Utc>,
}

impl EntityEvent {
    fn new(action: EventAction) -> Self {
        Self {
            action,
            vertex: None,
            neighbors: Vec::new(),
            edge: None,
            payload: None,
            sample_timestamp: Utc::now(),
        }
    }

    /// Create or update an entity
    pub fn update_entity(vertex: Vertex) -> Self {
        Self {
            vertex: Some(vertex),
            ..Self::new(EventAction::UpdateEntity)
        }
    }

    /// Tombstone an entity
    pub fn delete_entity(vertex_id: &str) -> Self {
        Self {
            vertex: Some(Vertex::new(vertex_id)),
            ..Self::new(EventAction::DeleteEntity)
        }
    }

    /// Physically remove a tombstoned entity
    pub fn remove_deleted_entity(vertex_id: &str) -> Self {
        Self {
            vertex: Some(Vertex::new(vertex_id)),
            ..Self::new(EventAction::RemoveDeletedEntity)
        }
    }

    /// Create or update a relationship
    pub fn update_relationship(edge: Edge) -> Self {
        Self {
            edge: Some(edge),
            ..Self::new(EventAction::UpdateRelationship)
        }
    }

    /// Tombstone a relationship
    pub fn delete_relationship(key: &EdgeKey) -> Self {
        Self {
            edge: Some(Edge::new(&key.source_id, &key.target_id, &key.label)),
            ..Self::new(EventAction::DeleteRelationship)
        }
    }

    /// Trigger an external workflow
    pub fn execute_external(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(EventAction::ExecuteExternal)
        }
    }

    /// Builder-style neighbor
    pub fn with_neighbor(mut self, vertex: Vertex, edge: Edge) -> Self {
        self.neighbors.push(Neighbor { vertex, edge });
        self
    }

    /// Builder-style sample timestamp
    pub fn sampled_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.sample_timestamp = timestamp;
        self
    }

    /// Printable subject of the event
    pub fn subject(&self) -> String {
        if let Some(vertex) = &self.vertex {
            vertex.id.clone()
        } else if let Some(edge) = &self.edge {
            edge.key().to_string()
        } else {
            "<external>".to_string()
        }
    }
}

/// An event as recorded in the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Monotonic id assigned by the log
    pub id: u64,
    /// The event
    pub event: EntityEvent,
    /// When the event was recorded
    pub recorded_at: DateTime<Utc>,
}
