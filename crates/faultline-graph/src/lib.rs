//! # Faultline Graph
//!
//! The property graph every other Faultline component works on: vertices
//! and labelled edges with free-form properties, tombstones instead of
//! physical deletes, and synchronous subscriber notification for every
//! committed mutation.
//!
//! ```
//! use faultline_graph::{Edge, PropertyGraph, Vertex, props};
//!
//! let graph = PropertyGraph::new("primary");
//! graph.add_vertex(Vertex::new("host-1").with_property(props::CATEGORY, "RESOURCE"));
//! graph.add_vertex(Vertex::new("vm-1").with_property(props::CATEGORY, "RESOURCE"));
//! graph.add_edge(Edge::new("host-1", "vm-1", "contains")).unwrap();
//! assert_eq!(graph.num_edges(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod delta;
mod error;
mod graph;
mod model;
mod snapshot;

pub use delta::GraphDelta;
pub use error::{GraphError, GraphResult};
pub use graph::{properties, PropertyGraph, SubscriberFn, SubscriptionId};
pub use model::{
    category, labels, matches_filter, property_matches, props, Direction, Edge, EdgeDescription,
    EdgeKey, GraphElement, Properties, Vertex,
};
pub use snapshot::GraphSnapshot;
