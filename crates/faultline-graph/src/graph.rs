//! In-memory property graph with synchronous change notification.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::delta::GraphDelta;
use crate::error::{GraphError, GraphResult};
use crate::model::{
    matches_filter, Direction, Edge, EdgeDescription, EdgeKey, GraphElement, Properties, Vertex,
};
use crate::snapshot::GraphSnapshot;

/// Callback invoked for every committed mutation
pub type SubscriberFn = dyn Fn(&GraphDelta) -> anyhow::Result<()> + Send + Sync;

/// Handle returned by [`PropertyGraph::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    name: String,
    finalization: bool,
    callback: Arc<SubscriberFn>,
}

#[derive(Default, Clone)]
struct GraphStore {
    vertices: BTreeMap<String, Vertex>,
    edges: BTreeMap<EdgeKey, Edge>,
    // Edge keys incident to each vertex, in both directions
    adjacency: BTreeMap<String, BTreeSet<EdgeKey>>,
}

impl GraphStore {
    fn insert_edge(&mut self, edge: Edge) -> Option<Edge> {
        let key = edge.key();
        self.adjacency
            .entry(key.source_id.clone())
            .or_default()
            .insert(key.clone());
        self.adjacency
            .entry(key.target_id.clone())
            .or_default()
            .insert(key.clone());
        self.edges.insert(key, edge)
    }

    fn take_edge(&mut self, key: &EdgeKey) -> Option<Edge> {
        let edge = self.edges.remove(key)?;
        for endpoint in [&key.source_id, &key.target_id] {
            if let Some(keys) = self.adjacency.get_mut(endpoint) {
                keys.remove(key);
            }
        }
        Some(edge)
    }

    fn ensure_endpoints(&self, key: &EdgeKey) -> GraphResult<()> {
        for endpoint in [&key.source_id, &key.target_id] {
            if !self.vertices.contains_key(endpoint) {
                return Err(GraphError::VertexNotFound(endpoint.clone()));
            }
        }
        Ok(())
    }
}

fn merge_properties(target: &mut Properties, update: &Properties) {
    for (key, value) in update {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// A vertex/edge store that notifies subscribers of every mutation.
///
/// The graph is a cheap handle: clones share the same store and subscriber
/// list. Use [`PropertyGraph::fork`] for an independent replica.
///
/// Non-finalization subscribers run first, in subscription order, then the
/// finalization subscribers. Callbacks run after the store lock has been
/// released, so they may read the graph. A failing or panicking subscriber is
/// logged and skipped; it never aborts the mutation or starves later
/// subscribers.
#[derive(Clone)]
pub struct PropertyGraph {
    name: Arc<str>,
    store: Arc<RwLock<GraphStore>>,
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_subscription: Arc<AtomicU64>,
}

impl std::fmt::Debug for PropertyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyGraph")
            .field("name", &self.name)
            .field("vertices", &self.num_vertices())
            .field("edges", &self.num_edges())
            .finish()
    }
}

impl PropertyGraph {
    /// Create an empty graph
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            store: Arc::new(RwLock::new(GraphStore::default())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Graph name, used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    // ---------------------------------------------------------------------
    // Vertices
    // ---------------------------------------------------------------------

    /// Insert or replace a vertex
    pub fn add_vertex(&self, vertex: Vertex) -> GraphDelta {
        let before = self
            .store
            .write()
            .vertices
            .insert(vertex.id.clone(), vertex.clone());
        let delta = GraphDelta::vertex(before, Some(vertex));
        self.notify(&delta);
        delta
    }

    /// Merge properties into a vertex, inserting it when missing.
    ///
    /// A `null` property value removes the key.
    pub fn update_vertex(&self, vertex: Vertex) -> GraphDelta {
        let (before, after) = {
            let mut store = self.store.write();
            let before = store.vertices.get(&vertex.id).cloned();
            let mut after = before.clone().unwrap_or_else(|| Vertex::new(vertex.id.clone()));
            merge_properties(&mut after.properties, &vertex.properties);
            store.vertices.insert(after.id.clone(), after.clone());
            (before, after)
        };
        let delta = GraphDelta::vertex(before, Some(after));
        self.notify(&delta);
        delta
    }

    /// Physically remove a vertex together with its incident edges.
    ///
    /// Each removed edge is notified before the vertex itself.
    pub fn remove_vertex(&self, vertex_id: &str) -> GraphResult<Vec<GraphDelta>> {
        let deltas = {
            let mut store = self.store.write();
            if !store.vertices.contains_key(vertex_id) {
                return Err(GraphError::VertexNotFound(vertex_id.to_string()));
            }
            let incident: Vec<EdgeKey> = store
                .adjacency
                .get(vertex_id)
                .map(|keys| keys.iter().cloned().collect())
                .unwrap_or_default();
            let mut deltas = Vec::with_capacity(incident.len() + 1);
            for key in incident {
                if let Some(edge) = store.take_edge(&key) {
                    deltas.push(GraphDelta::edge(Some(edge), None));
                }
            }
            store.adjacency.remove(vertex_id);
            let vertex = store.vertices.remove(vertex_id);
            deltas.push(GraphDelta::vertex(vertex, None));
            deltas
        };
        for delta in &deltas {
            self.notify(delta);
        }
        Ok(deltas)
    }

    /// Get a copy of a vertex
    pub fn get_vertex(&self, vertex_id: &str) -> Option<Vertex> {
        self.store.read().vertices.get(vertex_id).cloned()
    }

    /// True if the vertex exists (deleted or not)
    pub fn contains_vertex(&self, vertex_id: &str) -> bool {
        self.store.read().vertices.contains_key(vertex_id)
    }

    /// All vertices matching the filter
    pub fn get_vertices(&self, filter: Option<&Properties>) -> Vec<Vertex> {
        self.store
            .read()
            .vertices
            .values()
            .filter(|vertex| filter.map_or(true, |f| vertex.matches(f)))
            .cloned()
            .collect()
    }

    // ---------------------------------------------------------------------
    // Edges
    // ---------------------------------------------------------------------

    /// Insert or replace an edge. Both endpoints must exist.
    pub fn add_edge(&self, edge: Edge) -> GraphResult<GraphDelta> {
        let before = {
            let mut store = self.store.write();
            store.ensure_endpoints(&edge.key())?;
            store.insert_edge(edge.clone())
        };
        let delta = GraphDelta::edge(before, Some(edge));
        self.notify(&delta);
        Ok(delta)
    }

    /// Merge properties into an edge, inserting it when missing.
    pub fn update_edge(&self, edge: Edge) -> GraphResult<GraphDelta> {
        let (before, after) = {
            let mut store = self.store.write();
            let key = edge.key();
            store.ensure_endpoints(&key)?;
            let before = store.edges.get(&key).cloned();
            let mut after = before
                .clone()
                .unwrap_or_else(|| Edge::new(&key.source_id, &key.target_id, &key.label));
            merge_properties(&mut after.properties, &edge.properties);
            store.insert_edge(after.clone());
            (before, after)
        };
        let delta = GraphDelta::edge(before, Some(after));
        self.notify(&delta);
        Ok(delta)
    }

    /// Physically remove an edge
    pub fn remove_edge(&self, key: &EdgeKey) -> GraphResult<GraphDelta> {
        let removed = self
            .store
            .write()
            .take_edge(key)
            .ok_or_else(|| GraphError::EdgeNotFound(key.to_string()))?;
        let delta = GraphDelta::edge(Some(removed), None);
        self.notify(&delta);
        Ok(delta)
    }

    /// Get a copy of an edge
    pub fn get_edge(&self, key: &EdgeKey) -> Option<Edge> {
        self.store.read().edges.get(key).cloned()
    }

    /// Edge together with snapshots of both endpoints
    pub fn edge_description(&self, key: &EdgeKey) -> Option<EdgeDescription> {
        let store = self.store.read();
        let edge = store.edges.get(key)?.clone();
        let source = store.vertices.get(&key.source_id)?.clone();
        let target = store.vertices.get(&key.target_id)?.clone();
        Some(EdgeDescription {
            edge,
            source,
            target,
        })
    }

    /// Edges incident to a vertex in the given direction
    pub fn edges_of(&self, vertex_id: &str, direction: Direction) -> Vec<Edge> {
        let store = self.store.read();
        store
            .adjacency
            .get(vertex_id)
            .into_iter()
            .flatten()
            .filter(|key| direction.admits(key, vertex_id))
            .filter_map(|key| store.edges.get(key).cloned())
            .collect()
    }

    /// Vertices adjacent to `vertex_id`, filtered on both the connecting edge
    /// and the neighbor itself
    pub fn neighbors(
        &self,
        vertex_id: &str,
        vertex_filter: Option<&Properties>,
        edge_filter: Option<&Properties>,
        direction: Direction,
    ) -> Vec<Vertex> {
        let store = self.store.read();
        let mut seen = BTreeSet::new();
        let mut result = Vec::new();
        for key in store.adjacency.get(vertex_id).into_iter().flatten() {
            if !direction.admits(key, vertex_id) {
                continue;
            }
            let Some(edge) = store.edges.get(key) else {
                continue;
            };
            if edge_filter.map_or(false, |f| !matches_filter(&edge.properties, f)) {
                continue;
            }
            let other = edge.other_end(vertex_id);
            if !seen.insert(other.to_string()) {
                continue;
            }
            if let Some(neighbor) = store.vertices.get(other) {
                if vertex_filter.map_or(true, |f| neighbor.matches(f)) {
                    result.push(neighbor.clone());
                }
            }
        }
        result
    }

    /// Number of vertices, tombstones included
    pub fn num_vertices(&self) -> usize {
        self.store.read().vertices.len()
    }

    /// Number of edges, tombstones included
    pub fn num_edges(&self) -> usize {
        self.store.read().edges.len()
    }

    /// All edges
    pub fn get_edges(&self) -> Vec<Edge> {
        self.store.read().edges.values().cloned().collect()
    }

    // ---------------------------------------------------------------------
    // Replication helpers
    // ---------------------------------------------------------------------

    /// Apply a delta produced by another graph using the same primitives.
    pub fn apply_delta(&self, delta: &GraphDelta) -> GraphResult<()> {
        match (&delta.before, &delta.after) {
            (_, Some(GraphElement::Vertex(vertex))) => {
                self.add_vertex(vertex.clone());
            }
            (_, Some(GraphElement::Edge(edge))) => {
                self.add_edge(edge.clone())?;
            }
            (Some(GraphElement::Vertex(vertex)), None) => {
                // Incident edges were already removed by their own deltas
                if self.contains_vertex(&vertex.id) {
                    self.remove_vertex(&vertex.id)?;
                }
            }
            (Some(GraphElement::Edge(edge)), None) => {
                if self.get_edge(&edge.key()).is_some() {
                    self.remove_edge(&edge.key())?;
                }
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Deep copy of the data with an empty subscriber list.
    ///
    /// A replica owns its listener set; nothing subscribed to `self` is
    /// carried over.
    pub fn fork(&self, name: &str) -> PropertyGraph {
        let store = self.store.read().clone();
        PropertyGraph {
            name: Arc::from(name),
            store: Arc::new(RwLock::new(store)),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Serialize the full graph
    pub fn snapshot(&self, last_event_id: Option<u64>) -> GraphSnapshot {
        let store = self.store.read();
        GraphSnapshot::new(
            store.vertices.values().cloned().collect(),
            store.edges.values().cloned().collect(),
            last_event_id,
        )
    }

    /// Build a graph from a snapshot, without notifying anyone
    pub fn from_snapshot(name: &str, snapshot: &GraphSnapshot) -> GraphResult<PropertyGraph> {
        let graph = PropertyGraph::new(name);
        graph.load_snapshot(snapshot)?;
        Ok(graph)
    }

    /// Replace the content of this graph with a snapshot. Subscribers are
    /// kept but not notified.
    pub fn load_snapshot(&self, snapshot: &GraphSnapshot) -> GraphResult<()> {
        let mut store = GraphStore::default();
        for vertex in &snapshot.vertices {
            store.vertices.insert(vertex.id.clone(), vertex.clone());
        }
        for edge in &snapshot.edges {
            store
                .ensure_endpoints(&edge.key())
                .map_err(|e| GraphError::InvalidSnapshot(e.to_string()))?;
            store.insert_edge(edge.clone());
        }
        *self.store.write() = store;
        debug!(
            graph = %self.name,
            vertices = snapshot.vertices.len(),
            edges = snapshot.edges.len(),
            "Loaded graph snapshot"
        );
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    /// Register a callback for every future mutation.
    ///
    /// Finalization subscribers run after all regular subscribers.
    pub fn subscribe<F>(&self, name: &str, callback: F, finalization: bool) -> SubscriptionId
    where
        F: Fn(&GraphDelta) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber {
            id,
            name: name.to_string(),
            finalization,
            callback: Arc::new(callback),
        });
        debug!(graph = %self.name, subscriber = name, finalization, "Subscriber registered");
        id
    }

    /// Remove a single subscriber
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Drop every subscriber, e.g. before a reload
    pub fn clear_subscribers(&self) {
        self.subscribers.write().clear();
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn notify(&self, delta: &GraphDelta) {
        let subscribers: Vec<Subscriber> = {
            let all = self.subscribers.read();
            all.iter()
                .filter(|s| !s.finalization)
                .chain(all.iter().filter(|s| s.finalization))
                .cloned()
                .collect()
        };
        for subscriber in subscribers {
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(delta)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    graph = %self.name,
                    subscriber = %subscriber.name,
                    element = %delta.identity(),
                    "Subscriber failed: {:#}", e
                ),
                Err(_) => error!(
                    graph = %self.name,
                    subscriber = %subscriber.name,
                    element = %delta.identity(),
                    "Subscriber panicked"
                ),
            }
        }
    }
}

/// Convenience for building a property map from `(key, value)` pairs
pub fn properties<I, K, V>(pairs: I) -> Properties
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
