//! Vertex, edge and property types shared by every graph consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Property map attached to vertices and edges
pub type Properties = BTreeMap<String, Value>;

/// Well-known property keys
pub mod props {
    /// Entity category (`RESOURCE` or `ALARM`)
    pub const CATEGORY: &str = "category";
    /// Datasource specific entity type (e.g. `nova.host`)
    pub const TYPE: &str = "type";
    /// Human readable name
    pub const NAME: &str = "name";
    /// Observed state reported by a datasource
    pub const STATE: &str = "state";
    /// State set by a `set_state` action
    pub const DEDUCED_STATE: &str = "deduced_state";
    /// Tombstone flag
    pub const IS_DELETED: &str = "is_deleted";
    /// Inferred through a relationship, never observed directly
    pub const IS_PLACEHOLDER: &str = "is_placeholder";
    /// Set by a `mark_down` action
    pub const IS_MARKED_DOWN: &str = "is_marked_down";
    /// When the datasource sampled the entity (RFC 3339)
    pub const SAMPLE_TIMESTAMP: &str = "sample_timestamp";
    /// When the graph entry was last written (RFC 3339)
    pub const UPDATE_TIMESTAMP: &str = "update_timestamp";
    /// Alarm severity
    pub const SEVERITY: &str = "severity";
    /// Id of the resource an alarm is raised on
    pub const RESOURCE_ID: &str = "resource_id";
}

/// Well-known categories
pub mod category {
    /// Monitored resource (host, instance, switch, ...)
    pub const RESOURCE: &str = "RESOURCE";
    /// Alarm, observed or deduced
    pub const ALARM: &str = "ALARM";
}

/// Well-known relationship labels
pub mod labels {
    /// Alarm is raised on a resource
    pub const ON: &str = "on";
    /// Resource contains another resource
    pub const CONTAINS: &str = "contains";
    /// Alarm causes another alarm
    pub const CAUSES: &str = "causes";
}

fn flag(properties: &Properties, key: &str) -> bool {
    matches!(properties.get(key), Some(Value::Bool(true)))
}

fn timestamp(properties: &Properties, key: &str) -> Option<DateTime<Utc>> {
    properties
        .get(key)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Compare a stored property against an expected filter value.
///
/// A missing flag counts as `false`, so a filter of `is_deleted: false`
/// matches entries that never had the key written.
pub fn property_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (Some(actual), expected) => actual == expected,
        (None, Value::Bool(false)) => true,
        (None, _) => false,
    }
}

/// True when every filter entry matches the given properties
pub fn matches_filter(properties: &Properties, filter: &Properties) -> bool {
    filter
        .iter()
        .all(|(key, expected)| property_matches(properties.get(key), expected))
}

/// A graph vertex. Identity is the `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    /// Unique vertex id
    pub id: String,

    /// Arbitrary properties
    #[serde(default)]
    pub properties: Properties,
}

impl Vertex {
    /// Create a vertex without properties
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: Properties::new(),
        }
    }

    /// Builder-style property setter
    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Set a property in place
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.properties.insert(key.to_string(), value.into());
    }

    /// Get a property
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Get a string property
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Entity category
    pub fn category(&self) -> Option<&str> {
        self.get_str(props::CATEGORY)
    }

    /// Entity type
    pub fn entity_type(&self) -> Option<&str> {
        self.get_str(props::TYPE)
    }

    /// Entity name
    pub fn name(&self) -> Option<&str> {
        self.get_str(props::NAME)
    }

    /// Tombstone flag
    pub fn is_deleted(&self) -> bool {
        flag(&self.properties, props::IS_DELETED)
    }

    /// Placeholder flag
    pub fn is_placeholder(&self) -> bool {
        flag(&self.properties, props::IS_PLACEHOLDER)
    }

    /// Sample timestamp, when present and well formed
    pub fn sample_timestamp(&self) -> Option<DateTime<Utc>> {
        timestamp(&self.properties, props::SAMPLE_TIMESTAMP)
    }

    /// Last write timestamp, when present and well formed
    pub fn update_timestamp(&self) -> Option<DateTime<Utc>> {
        timestamp(&self.properties, props::UPDATE_TIMESTAMP)
    }

    /// True if the vertex properties satisfy the filter
    pub fn matches(&self, filter: &Properties) -> bool {
        matches_filter(&self.properties, filter)
    }
}

/// Edge identity: `(source_id, target_id, label)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    /// Source vertex id
    pub source_id: String,
    /// Target vertex id
    pub target_id: String,
    /// Relationship label
    pub label: String,
}

impl EdgeKey {
    /// Create a new key
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            label: label.into(),
        }
    }

    /// True if the vertex is one of the endpoints
    pub fn touches(&self, vertex_id: &str) -> bool {
        self.source_id == vertex_id || self.target_id == vertex_id
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source_id, self.label, self.target_id)
    }
}

/// A directed, labelled graph edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source vertex id
    pub source_id: String,
    /// Target vertex id
    pub target_id: String,
    /// Relationship label
    pub label: String,
    /// Arbitrary properties
    #[serde(default)]
    pub properties: Properties,
}

impl Edge {
    /// Create an edge without properties
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            label: label.into(),
            properties: Properties::new(),
        }
    }

    /// Builder-style property setter
    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Set a property in place
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.properties.insert(key.to_string(), value.into());
    }

    /// Get a property
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Identity of this edge
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(&self.source_id, &self.target_id, &self.label)
    }

    /// Tombstone flag
    pub fn is_deleted(&self) -> bool {
        flag(&self.properties, props::IS_DELETED)
    }

    /// The endpoint opposite to `vertex_id`
    pub fn other_end(&self, vertex_id: &str) -> &str {
        if self.source_id == vertex_id {
            &self.target_id
        } else {
            &self.source_id
        }
    }

    /// True if the edge properties satisfy the filter
    pub fn matches(&self, filter: &Properties) -> bool {
        matches_filter(&self.properties, filter)
    }
}

/// Read-only view of an edge together with its endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDescription {
    /// The edge itself
    pub edge: Edge,
    /// Snapshot of the source vertex
    pub source: Vertex,
    /// Snapshot of the target vertex
    pub target: Vertex,
}

/// Either kind of graph element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "element", rename_all = "snake_case")]
pub enum GraphElement {
    /// A vertex
    Vertex(Vertex),
    /// An edge
    Edge(Edge),
}

impl GraphElement {
    /// True for vertices
    pub fn is_vertex(&self) -> bool {
        matches!(self, GraphElement::Vertex(_))
    }

    /// Vertex payload
    pub fn as_vertex(&self) -> Option<&Vertex> {
        match self {
            GraphElement::Vertex(vertex) => Some(vertex),
            GraphElement::Edge(_) => None,
        }
    }

    /// Edge payload
    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            GraphElement::Edge(edge) => Some(edge),
            GraphElement::Vertex(_) => None,
        }
    }

    /// Tombstone flag of the element
    pub fn is_deleted(&self) -> bool {
        match self {
            GraphElement::Vertex(vertex) => vertex.is_deleted(),
            GraphElement::Edge(edge) => edge.is_deleted(),
        }
    }

    /// Properties of the element
    pub fn properties(&self) -> &Properties {
        match self {
            GraphElement::Vertex(vertex) => &vertex.properties,
            GraphElement::Edge(edge) => &edge.properties,
        }
    }

    /// Printable identity
    pub fn identity(&self) -> String {
        match self {
            GraphElement::Vertex(vertex) => vertex.id.clone(),
            GraphElement::Edge(edge) => edge.key().to_string(),
        }
    }
}

/// Edge direction relative to a vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Edges whose source is the vertex
    Out,
    /// Edges whose target is the vertex
    In,
    /// Both
    Both,
}

impl Direction {
    /// True if the edge leaves or enters `vertex_id` according to this direction
    pub fn admits(self, key: &EdgeKey, vertex_id: &str) -> bool {
        match self {
            Direction::Out => key.source_id == vertex_id,
            Direction::In => key.target_id == vertex_id,
            Direction::Both => key.touches(vertex_id),
        }
    }
}
