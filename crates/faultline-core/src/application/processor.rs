//! Applies ingestion events to the primary graph.
//!
//! Every graph change, observed or deduced, goes through
//! [`EventProcessor::process_event`]. The processor owns the entity
//! lifecycle rules: placeholders for unseen neighbors, stale sample
//! rejection, tombstones instead of deletes, and the later pruning sweep.

use std::time::Duration;

use chrono::{DateTime, Utc};
use faultline_graph::{props, Direction, Edge, EdgeKey, PropertyGraph, Vertex};
use serde_json::Value;
use tracing::{debug, trace};

use crate::domain::events::{EntityEvent, EventAction};
use crate::CoreError;

/// What processing an event amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The graph was changed
    Applied,
    /// Nothing to do, with the reason
    Dropped(&'static str),
    /// The event is for an external workflow engine
    External(Value),
}

/// Mutates one graph according to ingestion events
pub struct EventProcessor {
    graph: PropertyGraph,
}

impl EventProcessor {
    /// Processor for a graph
    pub fn new(graph: PropertyGraph) -> Self {
        Self { graph }
    }

    /// The graph this processor mutates
    pub fn graph(&self) -> &PropertyGraph {
        &self.graph
    }

    /// Apply one event
    pub fn process_event(&self, event: &EntityEvent) -> Result<ProcessOutcome, CoreError> {
        let outcome = match event.action {
            EventAction::UpdateEntity => self.update_entity(event)?,
            EventAction::DeleteEntity => self.delete_entity(event)?,
            EventAction::UpdateRelationship => self.update_relationship(event)?,
            EventAction::DeleteRelationship => self.delete_relationship(event)?,
            EventAction::RemoveDeletedEntity => self.remove_deleted_entity(event)?,
            EventAction::ExecuteExternal => match &event.payload {
                Some(payload) => ProcessOutcome::External(payload.clone()),
                None => ProcessOutcome::Dropped("external event without payload"),
            },
        };
        trace!(
            action = %event.action,
            subject = %event.subject(),
            outcome = ?outcome,
            "Event processed"
        );
        Ok(outcome)
    }

    fn update_entity(&self, event: &EntityEvent) -> Result<ProcessOutcome, CoreError> {
        let incoming = required_vertex(event)?;
        let existing = self.graph.get_vertex(&incoming.id);
        // Partial updates carry deduced properties, not an observation
        let observed = incoming.category().is_some();

        if observed {
            let stored = existing.as_ref().and_then(|current| current.sample_timestamp());
            if stored.map(|stored| stored > event.sample_timestamp).unwrap_or(false) {
                return Ok(ProcessOutcome::Dropped("stale sample"));
            }
        }

        let existing = match existing {
            Some(current) if current.is_deleted() && !observed => {
                // Deduced updates do not resurrect what a datasource deleted
                return Ok(ProcessOutcome::Dropped("partial update for a deleted entity"));
            }
            Some(current) if current.is_deleted() => {
                // A tombstone never comes back to life: purge it and start over
                self.graph.remove_vertex(&current.id)?;
                None
            }
            None if !observed => {
                return Ok(ProcessOutcome::Dropped("update for an unknown entity without category"));
            }
            other => other,
        };

        let mut vertex = incoming.clone();
        if observed {
            stamp(&mut vertex.properties, event.sample_timestamp);
        } else {
            touch(&mut vertex.properties);
        }
        vertex.set(props::IS_PLACEHOLDER, false);
        if existing.is_none() {
            vertex.set(props::IS_DELETED, false);
        }
        self.graph.update_vertex(vertex);

        for neighbor in &event.neighbors {
            self.ensure_vertex(&neighbor.vertex)?;
            self.upsert_edge(&neighbor.edge, event.sample_timestamp)?;
        }
        Ok(ProcessOutcome::Applied)
    }

    fn delete_entity(&self, event: &EntityEvent) -> Result<ProcessOutcome, CoreError> {
        let id = &required_vertex(event)?.id;
        let Some(current) = self.graph.get_vertex(id) else {
            return Ok(ProcessOutcome::Dropped("delete for an unknown entity"));
        };
        if current.is_deleted() {
            return Ok(ProcessOutcome::Dropped("entity already deleted"));
        }
        let now = event.sample_timestamp;
        for edge in self.graph.edges_of(id, Direction::Both) {
            if !edge.is_deleted() {
                self.graph.update_edge(tombstone_edge(&edge.key(), now))?;
            }
        }
        let mut tombstone = Vertex::new(id.clone()).with_property(props::IS_DELETED, true);
        stamp(&mut tombstone.properties, now);
        self.graph.update_vertex(tombstone);
        debug!(entity = %id, "Entity tombstoned");
        Ok(ProcessOutcome::Applied)
    }

    fn update_relationship(&self, event: &EntityEvent) -> Result<ProcessOutcome, CoreError> {
        let edge = required_edge(event)?;
        for endpoint in [&edge.source_id, &edge.target_id] {
            self.ensure_vertex(&Vertex::new(endpoint.clone()))?;
        }
        self.upsert_edge(edge, event.sample_timestamp)?;
        Ok(ProcessOutcome::Applied)
    }

    fn delete_relationship(&self, event: &EntityEvent) -> Result<ProcessOutcome, CoreError> {
        let key = required_edge(event)?.key();
        match self.graph.get_edge(&key) {
            Some(edge) if !edge.is_deleted() => {
                self.graph.update_edge(tombstone_edge(&key, event.sample_timestamp))?;
                Ok(ProcessOutcome::Applied)
            }
            Some(_) => Ok(ProcessOutcome::Dropped("relationship already deleted")),
            None => Ok(ProcessOutcome::Dropped("delete for an unknown relationship")),
        }
    }

    fn remove_deleted_entity(&self, event: &EntityEvent) -> Result<ProcessOutcome, CoreError> {
        let id = &required_vertex(event)?.id;
        match self.graph.get_vertex(id) {
            Some(vertex) if vertex.is_deleted() => {
                self.graph.remove_vertex(id)?;
                debug!(entity = %id, "Tombstone pruned");
                Ok(ProcessOutcome::Applied)
            }
            Some(_) => Ok(ProcessOutcome::Dropped("entity is not deleted")),
            None => Ok(ProcessOutcome::Dropped("entity already removed")),
        }
    }

    // Create a placeholder for a vertex known only through a relationship
    fn ensure_vertex(&self, vertex: &Vertex) -> Result<(), CoreError> {
        match self.graph.get_vertex(&vertex.id) {
            Some(current) if !current.is_deleted() => Ok(()),
            current => {
                if current.is_some() {
                    self.graph.remove_vertex(&vertex.id)?;
                }
                let placeholder = vertex
                    .clone()
                    .with_property(props::IS_PLACEHOLDER, true)
                    .with_property(props::IS_DELETED, false);
                self.graph.add_vertex(placeholder);
                Ok(())
            }
        }
    }

    fn upsert_edge(&self, edge: &Edge, at: DateTime<Utc>) -> Result<(), CoreError> {
        let mut edge = edge.clone().with_property(props::IS_DELETED, false);
        edge.set(props::UPDATE_TIMESTAMP, at.to_rfc3339());
        self.graph.update_edge(edge)?;
        Ok(())
    }

    /// Removal events for tombstones older than `retention`
    pub fn prune_tombstones(&self, retention: Duration, now: DateTime<Utc>) -> Vec<EntityEvent> {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return Vec::new();
        };
        let cutoff = now - retention;
        let mut filter = faultline_graph::Properties::new();
        filter.insert(props::IS_DELETED.to_string(), Value::Bool(true));
        self.graph
            .get_vertices(Some(&filter))
            .into_iter()
            .filter(|v| v.update_timestamp().map(|ts| ts < cutoff).unwrap_or(true))
            .map(|v| EntityEvent::remove_deleted_entity(&v.id))
            .collect()
    }
}

fn required_vertex(event: &EntityEvent) -> Result<&Vertex, CoreError> {
    event
        .vertex
        .as_ref()
        .ok_or_else(|| CoreError::Other(format!("{} event without an entity", event.action)))
}

fn required_edge(event: &EntityEvent) -> Result<&Edge, CoreError> {
    event
        .edge
        .as_ref()
        .ok_or_else(|| CoreError::Other(format!("{} event without a relationship", event.action)))
}

fn stamp(properties: &mut faultline_graph::Properties, sample: DateTime<Utc>) {
    properties.insert(props::SAMPLE_TIMESTAMP.to_string(), Value::from(sample.to_rfc3339()));
    touch(properties);
}

// Deduced changes move the update clock only, never the sample clock
fn touch(properties: &mut faultline_graph::Properties) {
    properties.insert(props::UPDATE_TIMESTAMP.to_string(), Value::from(Utc::now().to_rfc3339()));
}

fn tombstone_edge(key: &EdgeKey, at: DateTime<Utc>) -> Edge {
    Edge::new(&key.source_id, &key.target_id, &key.label)
        .with_property(props::IS_DELETED, true)
        .with_property(props::UPDATE_TIMESTAMP, at.to_rfc3339())
}
