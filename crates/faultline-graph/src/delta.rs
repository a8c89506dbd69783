use serde::{Deserialize, Serialize};

use crate::model::{Edge, GraphElement, Vertex};

/// A single committed graph change.
///
/// `before` is `None` for insertions and `after` is `None` for physical
/// removals. Both sides always describe the same element identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDelta {
    /// Element state before the mutation
    pub before: Option<GraphElement>,
    /// Element state after the mutation
    pub after: Option<GraphElement>,
}

impl GraphDelta {
    /// Delta for a vertex change
    pub fn vertex(before: Option<Vertex>, after: Option<Vertex>) -> Self {
        Self {
            before: before.map(GraphElement::Vertex),
            after: after.map(GraphElement::Vertex),
        }
    }

    /// Delta for an edge change
    pub fn edge(before: Option<Edge>, after: Option<Edge>) -> Self {
        Self {
            before: before.map(GraphElement::Edge),
            after: after.map(GraphElement::Edge),
        }
    }

    /// True if the delta concerns a vertex
    pub fn is_vertex(&self) -> bool {
        self.element().map(GraphElement::is_vertex).unwrap_or(false)
    }

    /// Whichever side is present, preferring `after`
    pub fn element(&self) -> Option<&GraphElement> {
        self.after.as_ref().or(self.before.as_ref())
    }

    /// Printable identity of the changed element
    pub fn identity(&self) -> String {
        self.element()
            .map(GraphElement::identity)
            .unwrap_or_else(|| "<empty>".to_string())
    }

    /// True if the mutation left the element unchanged
    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}
