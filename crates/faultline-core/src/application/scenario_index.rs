//! Maps the type signature of a changed element to the scenario clauses
//! that could be affected by it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use faultline_dsl::{PatternVertex, Scenario};
use faultline_graph::{props, Edge, Vertex};
use tracing::debug;

/// Category and optional type of a vertex; `None` type is a wildcard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexSignature {
    /// Category
    pub category: String,
    /// Type
    pub entity_type: Option<String>,
}

impl VertexSignature {
    fn of_pattern(vertex: &PatternVertex) -> Option<Self> {
        Some(Self {
            category: vertex.filter.get(props::CATEGORY)?.as_str()?.to_string(),
            entity_type: vertex
                .filter
                .get(props::TYPE)
                .and_then(|t| t.as_str())
                .map(str::to_string),
        })
    }

    // The exact signature and the type wildcard
    fn lookups(vertex: &Vertex) -> Vec<Self> {
        let Some(category) = vertex.category() else {
            return Vec::new();
        };
        let mut keys = vec![Self {
            category: category.to_string(),
            entity_type: None,
        }];
        if let Some(entity_type) = vertex.entity_type() {
            keys.push(Self {
                category: category.to_string(),
                entity_type: Some(entity_type.to_string()),
            });
        }
        keys
    }
}

/// Source signature, label, target signature
pub type EdgeSignature = (VertexSignature, String, VertexSignature);

/// A scenario clause that may react to a change
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The scenario
    pub scenario: Arc<Scenario>,
    /// Index of the AND-clause
    pub clause: usize,
}

/// Signature index over installed scenarios
#[derive(Debug, Default)]
pub struct ScenarioIndex {
    scenarios: HashMap<String, Arc<Scenario>>,
    by_vertex: HashMap<VertexSignature, Vec<(String, usize)>>,
    by_edge: HashMap<EdgeSignature, Vec<(String, usize)>>,
}

impl ScenarioIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of installed scenarios
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// True if nothing is installed
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Install scenarios, replacing any with the same id
    pub fn add_scenarios(&mut self, scenarios: impl IntoIterator<Item = Arc<Scenario>>) {
        for scenario in scenarios {
            self.remove_scenario(&scenario.id);
            for (clause, pattern) in scenario.patterns.iter().enumerate() {
                let entry = (scenario.id.clone(), clause);
                for vertex in pattern.vertices.values() {
                    if let Some(signature) = VertexSignature::of_pattern(vertex) {
                        self.by_vertex.entry(signature).or_default().push(entry.clone());
                    }
                }
                for edge in &pattern.edges {
                    let endpoints = (
                        pattern.vertex(&edge.source).and_then(VertexSignature::of_pattern),
                        pattern.vertex(&edge.target).and_then(VertexSignature::of_pattern),
                    );
                    if let (Some(source), Some(target)) = endpoints {
                        self.by_edge
                            .entry((source, edge.label.clone(), target))
                            .or_default()
                            .push(entry.clone());
                    }
                }
            }
            debug!(scenario = %scenario.id, "Scenario indexed");
            self.scenarios.insert(scenario.id.clone(), scenario);
        }
    }

    fn remove_scenario(&mut self, scenario_id: &str) -> Option<Arc<Scenario>> {
        let removed = self.scenarios.remove(scenario_id)?;
        for entries in self.by_vertex.values_mut().chain(self.by_edge.values_mut()) {
            entries.retain(|(id, _)| id != scenario_id);
        }
        self.by_vertex.retain(|_, entries| !entries.is_empty());
        self.by_edge.retain(|_, entries| !entries.is_empty());
        Some(removed)
    }

    /// Uninstall every scenario of a template and return them
    pub fn remove_template(&mut self, template_name: &str) -> Vec<Arc<Scenario>> {
        let ids: Vec<String> = self
            .scenarios
            .values()
            .filter(|s| s.template_name == template_name)
            .map(|s| s.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.remove_scenario(id)).collect()
    }

    /// Installed scenarios of a template, ordered by id
    pub fn scenarios_of_template(&self, template_name: &str) -> Vec<Arc<Scenario>> {
        let mut out: Vec<Arc<Scenario>> = self
            .scenarios
            .values()
            .filter(|s| s.template_name == template_name)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Every installed scenario, ordered by id
    pub fn all_scenarios(&self) -> Vec<Arc<Scenario>> {
        let mut out: Vec<Arc<Scenario>> = self.scenarios.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Clauses with a pattern vertex of the vertex's signature
    pub fn candidates_for_vertex(&self, vertex: &Vertex) -> Vec<Candidate> {
        let entries = VertexSignature::lookups(vertex)
            .into_iter()
            .filter_map(|key| self.by_vertex.get(&key))
            .flatten();
        self.collect(entries)
    }

    /// Clauses with a pattern edge of the edge's signature
    pub fn candidates_for_edge(
        &self,
        edge: &Edge,
        source: &Vertex,
        target: &Vertex,
    ) -> Vec<Candidate> {
        let mut keys = Vec::new();
        for s in VertexSignature::lookups(source) {
            for t in VertexSignature::lookups(target) {
                keys.push((s.clone(), edge.label.clone(), t));
            }
        }
        let entries = keys.iter().filter_map(|key| self.by_edge.get(key)).flatten();
        self.collect(entries)
    }

    fn collect<'a>(&self, entries: impl Iterator<Item = &'a (String, usize)>) -> Vec<Candidate> {
        let unique: BTreeMap<&(String, usize), ()> = entries.map(|e| (e, ())).collect();
        unique
            .into_keys()
            .filter_map(|(id, clause)| {
                self.scenarios.get(id).map(|scenario| Candidate {
                    scenario: scenario.clone(),
                    clause: *clause,
                })
            })
            .collect()
    }
}
