//! Anchored subgraph matching.
//!
//! A match starts from one changed element bound to a pattern element and
//! grows the embedding one pattern edge at a time, so the cost is bounded by
//! the pattern size and the degree of the visited vertices, never by the
//! size of the graph.

use std::collections::{BTreeMap, BTreeSet};

use faultline_dsl::{Pattern, PatternEdge, PatternVertex};
use faultline_graph::{props, Direction, Edge, EdgeKey, GraphElement, PropertyGraph, Vertex};
use serde_json::Value;

use crate::CoreError;

/// Template id to live vertex id
pub type Mapping = BTreeMap<String, String>;

/// Embeddings beyond this count abort the search
pub const MAX_MATCHES_PER_ANCHOR: usize = 10_000;

/// Read access to a graph with at most one element replaced.
///
/// Evaluating the state before a change substitutes the element's `before`
/// side into the current graph; `None` stands for an element that did not
/// exist.
#[derive(Clone)]
pub struct GraphView<'a> {
    graph: &'a PropertyGraph,
    replaced: Option<Replacement<'a>>,
}

#[derive(Clone)]
enum Replacement<'a> {
    Vertex(&'a str, Option<&'a Vertex>),
    Edge(EdgeKey, Option<&'a Edge>),
}

impl<'a> GraphView<'a> {
    /// The graph as it is
    pub fn current(graph: &'a PropertyGraph) -> Self {
        Self { graph, replaced: None }
    }

    /// The graph with `identity` replaced by `state`
    pub fn with_vertex(graph: &'a PropertyGraph, id: &'a str, state: Option<&'a Vertex>) -> Self {
        Self {
            graph,
            replaced: Some(Replacement::Vertex(id, state)),
        }
    }

    /// The graph with the edge `key` replaced by `state`
    pub fn with_edge(graph: &'a PropertyGraph, key: EdgeKey, state: Option<&'a Edge>) -> Self {
        Self {
            graph,
            replaced: Some(Replacement::Edge(key, state)),
        }
    }

    /// Vertex by id
    pub fn vertex(&self, id: &str) -> Option<Vertex> {
        match &self.replaced {
            Some(Replacement::Vertex(replaced, state)) if *replaced == id => state.cloned(),
            _ => self.graph.get_vertex(id),
        }
    }

    /// Edges incident to a vertex
    pub fn edges_of(&self, id: &str, direction: Direction) -> Vec<Edge> {
        let mut edges = self.graph.edges_of(id, direction);
        if let Some(Replacement::Edge(key, state)) = &self.replaced {
            edges.retain(|edge| {
                edge.source_id != key.source_id
                    || edge.target_id != key.target_id
                    || edge.label != key.label
            });
            if let Some(edge) = *state {
                if direction.admits(key, id) {
                    edges.push(edge.clone());
                }
            }
        }
        edges
    }
}

fn vertex_alive_match(vertex: &Vertex, pattern: &PatternVertex) -> bool {
    !vertex.is_deleted() && !vertex.is_placeholder() && vertex.matches(&pattern.filter)
}

fn edge_alive_match(edge: &Edge, pattern: &PatternEdge) -> bool {
    edge.label == pattern.label && !edge.is_deleted() && edge.matches(&pattern.filter)
}

/// Finds embeddings of one pattern
pub struct SubgraphMatcher<'p> {
    pattern: &'p Pattern,
}

impl<'p> SubgraphMatcher<'p> {
    /// Matcher for a pattern
    pub fn new(pattern: &'p Pattern) -> Self {
        Self { pattern }
    }

    /// Embeddings that use `element` in the state given by `view`.
    ///
    /// `element` must be the state the view shows for that element. Deleted
    /// vertices anchor nothing. Deleted or absent edges can still anchor
    /// negative pattern edges, whose absence they may satisfy.
    pub fn match_anchored(
        &self,
        view: &GraphView<'_>,
        element: &GraphElement,
    ) -> Result<Vec<Mapping>, CoreError> {
        let mut results = BTreeSet::new();
        match element {
            GraphElement::Vertex(vertex) => {
                if vertex.is_deleted() {
                    return Ok(Vec::new());
                }
                for pv in self.pattern.positive_vertices() {
                    if vertex_alive_match(vertex, pv) {
                        let mut mapping = Mapping::new();
                        mapping.insert(pv.template_id.clone(), vertex.id.clone());
                        self.extend(view, mapping, &mut results)?;
                    }
                }
            }
            GraphElement::Edge(edge) => {
                for pe in &self.pattern.edges {
                    if pe.label != edge.label || !edge.matches(&pe.filter) {
                        continue;
                    }
                    let mut mapping = Mapping::new();
                    if pe.positive {
                        if edge.is_deleted() {
                            continue;
                        }
                        mapping.insert(pe.source.clone(), edge.source_id.clone());
                        mapping.insert(pe.target.clone(), edge.target_id.clone());
                    } else {
                        let ends = [(&pe.source, &edge.source_id), (&pe.target, &edge.target_id)];
                        for (template_id, live_id) in ends {
                            if self.is_positive_vertex(template_id) {
                                mapping.insert(template_id.clone(), live_id.clone());
                            }
                        }
                    }
                    if self.bindings_consistent(view, &mapping) {
                        self.extend(view, mapping, &mut results)?;
                    }
                }
            }
        }
        Ok(results.into_iter().collect())
    }

    /// Every embedding in the view, used for full evaluations
    pub fn match_all(
        &self,
        view: &GraphView<'_>,
        graph: &PropertyGraph,
    ) -> Result<Vec<Mapping>, CoreError> {
        let Some(seed) = self.pattern.positive_vertices().next() else {
            return Ok(Vec::new());
        };
        let mut results = BTreeSet::new();
        let mut filter = seed.filter.clone();
        filter.insert(props::IS_DELETED.to_string(), Value::Bool(false));
        filter.insert(props::IS_PLACEHOLDER.to_string(), Value::Bool(false));
        for vertex in graph.get_vertices(Some(&filter)) {
            let mut mapping = Mapping::new();
            mapping.insert(seed.template_id.clone(), vertex.id.clone());
            self.extend(view, mapping, &mut results)?;
        }
        Ok(results.into_iter().collect())
    }

    fn is_positive_vertex(&self, template_id: &str) -> bool {
        self.pattern.vertex(template_id).map(|v| v.positive).unwrap_or(false)
    }

    // Bound vertices exist, are alive, pass their filters and are distinct
    fn bindings_consistent(&self, view: &GraphView<'_>, mapping: &Mapping) -> bool {
        let distinct: BTreeSet<&String> = mapping.values().collect();
        if distinct.len() != mapping.len() {
            return false;
        }
        mapping.iter().all(|(template_id, live_id)| {
            match (self.pattern.vertex(template_id), view.vertex(live_id)) {
                (Some(pv), Some(vertex)) => vertex_alive_match(&vertex, pv),
                _ => false,
            }
        })
    }

    fn extend(
        &self,
        view: &GraphView<'_>,
        mapping: Mapping,
        results: &mut BTreeSet<Mapping>,
    ) -> Result<(), CoreError> {
        if results.len() >= MAX_MATCHES_PER_ANCHOR {
            return Err(CoreError::MatchError(format!(
                "more than {} embeddings for one anchor",
                MAX_MATCHES_PER_ANCHOR
            )));
        }

        // Prune as soon as a fully bound positive edge is missing
        for pe in self.pattern.positive_edges() {
            if let (Some(s), Some(t)) = (mapping.get(&pe.source), mapping.get(&pe.target)) {
                if !self.edge_exists(view, s, t, pe) {
                    return Ok(());
                }
            }
        }

        // Grow along a positive edge with exactly one bound endpoint
        let frontier = self.pattern.positive_edges().find_map(|pe| {
            match (mapping.get(&pe.source), mapping.get(&pe.target)) {
                (Some(s), None) => Some((pe, s.clone(), &pe.target, Direction::Out)),
                (None, Some(t)) => Some((pe, t.clone(), &pe.source, Direction::In)),
                _ => None,
            }
        });

        let Some((pe, bound_live, unbound_template, direction)) = frontier else {
            let complete = self
                .pattern
                .positive_vertices()
                .all(|pv| mapping.contains_key(&pv.template_id));
            if complete && self.negatives_hold(view, &mapping) {
                results.insert(mapping);
            }
            return Ok(());
        };

        let Some(unbound_pattern) = self.pattern.vertex(unbound_template) else {
            return Err(CoreError::MatchError(format!(
                "pattern edge '{}' refers to unknown vertex '{}'",
                pe.template_id, unbound_template
            )));
        };
        let used: BTreeSet<&String> = mapping.values().collect();

        for edge in view.edges_of(&bound_live, direction) {
            if !edge_alive_match(&edge, pe) {
                continue;
            }
            let candidate = edge.other_end(&bound_live).to_string();
            if used.contains(&candidate) {
                continue;
            }
            match view.vertex(&candidate) {
                Some(vertex) if vertex_alive_match(&vertex, unbound_pattern) => {}
                _ => continue,
            }
            let mut next = mapping.clone();
            next.insert(unbound_template.clone(), candidate);
            self.extend(view, next, results)?;
        }
        Ok(())
    }

    fn edge_exists(
        &self,
        view: &GraphView<'_>,
        source: &str,
        target: &str,
        pe: &PatternEdge,
    ) -> bool {
        view.edges_of(source, Direction::Out)
            .iter()
            .any(|edge| edge.target_id == target && edge_alive_match(edge, pe))
    }

    fn negatives_hold(&self, view: &GraphView<'_>, mapping: &Mapping) -> bool {
        self.pattern.negative_edges().all(|pe| {
            match (mapping.get(&pe.source), mapping.get(&pe.target)) {
                (Some(s), Some(t)) => !self.edge_exists(view, s, t, pe),
                (Some(s), None) => {
                    !self.any_alive_neighbor(view, s, pe, &pe.target, Direction::Out)
                }
                (None, Some(t)) => {
                    !self.any_alive_neighbor(view, t, pe, &pe.source, Direction::In)
                }
                // Both endpoints negative-only: rejected by the compiler
                (None, None) => true,
            }
        })
    }

    fn any_alive_neighbor(
        &self,
        view: &GraphView<'_>,
        bound: &str,
        pe: &PatternEdge,
        other_template: &str,
        direction: Direction,
    ) -> bool {
        let Some(other_pattern) = self.pattern.vertex(other_template) else {
            return false;
        };
        view.edges_of(bound, direction).iter().any(|edge| {
            edge_alive_match(edge, pe)
                && view
                    .vertex(edge.other_end(bound))
                    .map(|v| vertex_alive_match(&v, other_pattern))
                    .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_dsl::parse_and_compile_template;
    use faultline_graph::{category, labels};
    use pretty_assertions::assert_eq;

    const TEMPLATE: &str = r#"
metadata:
  name: matcher
definitions:
  entities:
    - entity: {template_id: alarm, category: ALARM, type: nagios}
    - entity: {template_id: host, category: RESOURCE, type: nova.host}
    - entity: {template_id: instance, category: RESOURCE, type: nova.instance}
  relationships:
    - relationship: {template_id: alarm_on_host, source: alarm, target: host, relationship_type: on}
    - relationship: {template_id: host_contains_instance, source: host, target: instance, relationship_type: contains}
scenarios:
  - scenario:
      condition: alarm_on_host and host_contains_instance
      actions:
        - action:
            action_type: mark_down
            action_target: {target: instance}
  - scenario:
      condition: alarm_on_host and not host_contains_instance
      actions:
        - action:
            action_type: mark_down
            action_target: {target: host}
"#;

    fn patterns() -> (Pattern, Pattern) {
        let compiled = parse_and_compile_template(TEMPLATE).unwrap();
        (
            compiled.scenarios[0].patterns[0].clone(),
            compiled.scenarios[1].patterns[0].clone(),
        )
    }

    fn resource(id: &str, entity_type: &str) -> Vertex {
        Vertex::new(id)
            .with_property(props::CATEGORY, category::RESOURCE)
            .with_property(props::TYPE, entity_type)
    }

    fn graph() -> PropertyGraph {
        let graph = PropertyGraph::new("test");
        graph.add_vertex(
            Vertex::new("a1")
                .with_property(props::CATEGORY, category::ALARM)
                .with_property(props::TYPE, "nagios"),
        );
        graph.add_vertex(resource("h1", "nova.host"));
        graph.add_vertex(resource("vm1", "nova.instance"));
        graph.add_vertex(resource("vm2", "nova.instance"));
        graph.add_edge(Edge::new("a1", "h1", labels::ON)).unwrap();
        graph.add_edge(Edge::new("h1", "vm1", labels::CONTAINS)).unwrap();
        graph.add_edge(Edge::new("h1", "vm2", labels::CONTAINS)).unwrap();
        graph
    }

    fn mapping(pairs: &[(&str, &str)]) -> Mapping {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn deleted_contains(instance: &str) -> Edge {
        Edge::new("h1", instance, labels::CONTAINS).with_property(props::IS_DELETED, true)
    }

    #[test]
    fn test_vertex_anchor_finds_all_embeddings() {
        let (positive, _) = patterns();
        let graph = graph();
        let view = GraphView::current(&graph);
        let anchor = GraphElement::Vertex(graph.get_vertex("a1").unwrap());
        let found = SubgraphMatcher::new(&positive).match_anchored(&view, &anchor).unwrap();
        assert_eq!(
            found,
            vec![
                mapping(&[("alarm", "a1"), ("host", "h1"), ("instance", "vm1")]),
                mapping(&[("alarm", "a1"), ("host", "h1"), ("instance", "vm2")]),
            ]
        );
    }

    #[test]
    fn test_edge_anchor_binds_both_endpoints() {
        let (positive, _) = patterns();
        let graph = graph();
        let view = GraphView::current(&graph);
        let edge = graph.get_edge(&EdgeKey::new("h1", "vm2", labels::CONTAINS)).unwrap();
        let found = SubgraphMatcher::new(&positive)
            .match_anchored(&view, &GraphElement::Edge(edge))
            .unwrap();
        assert_eq!(found, vec![mapping(&[("alarm", "a1"), ("host", "h1"), ("instance", "vm2")])]);
    }

    #[test]
    fn test_deleted_elements_do_not_match() {
        let (positive, _) = patterns();
        let graph = graph();
        graph.update_edge(deleted_contains("vm1")).unwrap();
        let view = GraphView::current(&graph);
        let anchor = GraphElement::Vertex(graph.get_vertex("a1").unwrap());
        let found = SubgraphMatcher::new(&positive).match_anchored(&view, &anchor).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["instance"], "vm2");

        let deleted = graph.get_vertex("a1").unwrap().with_property(props::IS_DELETED, true);
        let found = SubgraphMatcher::new(&positive)
            .match_anchored(&view, &GraphElement::Vertex(deleted))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_negative_edge_requires_absence() {
        let (_, negative) = patterns();
        let graph = graph();
        let matcher = SubgraphMatcher::new(&negative);
        let anchor = GraphElement::Vertex(graph.get_vertex("a1").unwrap());
        assert!(matcher
            .match_anchored(&GraphView::current(&graph), &anchor)
            .unwrap()
            .is_empty());

        // Tombstone both contains edges: the absence now holds
        for vm in ["vm1", "vm2"] {
            graph.update_edge(deleted_contains(vm)).unwrap();
        }
        let found = matcher.match_anchored(&GraphView::current(&graph), &anchor).unwrap();
        assert_eq!(found, vec![mapping(&[("alarm", "a1"), ("host", "h1")])]);
    }

    #[test]
    fn test_negative_edge_anchor_and_view_override() {
        let (_, negative) = patterns();
        let graph = graph();
        graph.update_edge(deleted_contains("vm1")).unwrap();
        let removed = graph.get_edge(&EdgeKey::new("h1", "vm2", labels::CONTAINS)).unwrap();
        let key = removed.key();
        graph.remove_edge(&key).unwrap();

        let matcher = SubgraphMatcher::new(&negative);
        // After the removal the absence holds
        let after = GraphView::with_edge(&graph, key.clone(), None);
        let found = matcher.match_anchored(&after, &GraphElement::Edge(removed.clone())).unwrap();
        assert_eq!(found, vec![mapping(&[("alarm", "a1"), ("host", "h1")])]);

        // Before the removal it did not
        let before = GraphView::with_edge(&graph, key, Some(&removed));
        assert!(matcher
            .match_anchored(&before, &GraphElement::Edge(removed.clone()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_match_all_and_placeholders() {
        let (positive, _) = patterns();
        let graph = graph();
        graph.update_vertex(Vertex::new("vm2").with_property(props::IS_PLACEHOLDER, true));
        let found = SubgraphMatcher::new(&positive)
            .match_all(&GraphView::current(&graph), &graph)
            .unwrap();
        assert_eq!(found, vec![mapping(&[("alarm", "a1"), ("host", "h1"), ("instance", "vm1")])]);
    }
}
