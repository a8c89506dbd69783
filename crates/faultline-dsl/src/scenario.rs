//! Compiled, immutable scenarios and the patterns they match.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use faultline_graph::{EdgeDescription, Properties, Vertex};
use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// The closed set of supported action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Set a deduced state on a resource
    SetState,
    /// Raise a deduced alarm on a resource
    RaiseAlarm,
    /// Link a causing alarm to the alarm it causes
    AddCausalRelationship,
    /// Flag a resource as down
    MarkDown,
    /// Trigger an external workflow; has no undo
    ExecuteMistral,
}

impl ActionType {
    /// Every action type
    pub const ALL: [ActionType; 5] = [
        ActionType::SetState,
        ActionType::RaiseAlarm,
        ActionType::AddCausalRelationship,
        ActionType::MarkDown,
        ActionType::ExecuteMistral,
    ];

    /// Name used in template documents
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SetState => "set_state",
            ActionType::RaiseAlarm => "raise_alarm",
            ActionType::AddCausalRelationship => "add_causal_relationship",
            ActionType::MarkDown => "mark_down",
            ActionType::ExecuteMistral => "execute_mistral",
        }
    }

    /// Target roles the action needs
    pub fn target_roles(&self) -> &'static [&'static str] {
        match self {
            ActionType::SetState | ActionType::RaiseAlarm | ActionType::MarkDown => &["target"],
            ActionType::AddCausalRelationship => &["source", "target"],
            ActionType::ExecuteMistral => &[],
        }
    }

    /// Properties the action cannot do without
    pub fn required_properties(&self) -> &'static [&'static str] {
        match self {
            ActionType::SetState => &["state"],
            ActionType::RaiseAlarm => &["alarm_name"],
            ActionType::ExecuteMistral => &["workflow"],
            ActionType::AddCausalRelationship | ActionType::MarkDown => &[],
        }
    }

    /// False for fire-and-forget actions
    pub fn has_undo(&self) -> bool {
        !matches!(self, ActionType::ExecuteMistral)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| CompileError::UnknownActionType(s.to_string()))
    }
}

/// An action with its targets resolved to template ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Action type
    pub action_type: ActionType,
    /// Target role to template id
    pub targets: BTreeMap<String, String>,
    /// Action properties
    pub properties: Properties,
}

impl ActionSpec {
    /// Template id bound to a target role
    pub fn target(&self, role: &str) -> Option<&str> {
        self.targets.get(role).map(String::as_str)
    }

    /// String property
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}

/// What a condition symbol resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementKind {
    /// An entity definition
    Entity,
    /// A relationship definition
    Relationship,
}

/// Template element a symbol resolved to. Ids are template ids and
/// properties are exact-match filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "element", rename_all = "snake_case")]
pub enum ResolvedElement {
    /// Entity definition
    Vertex(Vertex),
    /// Relationship definition with both endpoint definitions
    Edge(EdgeDescription),
}

/// A condition literal bound to its template element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConditionVar {
    /// Symbol name as written
    pub symbol_name: String,
    /// Resolved element
    pub element: ResolvedElement,
    /// Entity or relationship
    pub kind: ElementKind,
    /// False for negated literals
    pub positive: bool,
}

/// A vertex of a match pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternVertex {
    /// Template id
    pub template_id: String,
    /// Exact-match property filter; missing keys are wildcards
    pub filter: Properties,
    /// False when the vertex is referenced only through negated relationships
    pub positive: bool,
}

/// An edge of a match pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEdge {
    /// Relationship template id
    pub template_id: String,
    /// Source vertex template id
    pub source: String,
    /// Target vertex template id
    pub target: String,
    /// Edge label
    pub label: String,
    /// Exact-match property filter on the edge
    pub filter: Properties,
    /// False when the pattern requires the edge to be absent
    pub positive: bool,
}

/// The filter graph built for one AND-clause
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Vertices by template id
    pub vertices: BTreeMap<String, PatternVertex>,
    /// Edges in clause order
    pub edges: Vec<PatternEdge>,
}

impl Pattern {
    /// Pattern vertex by template id
    pub fn vertex(&self, template_id: &str) -> Option<&PatternVertex> {
        self.vertices.get(template_id)
    }

    /// Edges that must be present
    pub fn positive_edges(&self) -> impl Iterator<Item = &PatternEdge> {
        self.edges.iter().filter(|e| e.positive)
    }

    /// Edges that must be absent
    pub fn negative_edges(&self) -> impl Iterator<Item = &PatternEdge> {
        self.edges.iter().filter(|e| !e.positive)
    }

    /// Vertices that must be bound in every embedding
    pub fn positive_vertices(&self) -> impl Iterator<Item = &PatternVertex> {
        self.vertices.values().filter(|v| v.positive)
    }
}

/// A compiled scenario. Everything except `enabled` is immutable once built.
#[derive(Debug, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique id, `<template>:<index>` plus a suffix for equivalence clones
    pub id: String,
    /// Owning template
    pub template_name: String,
    /// Template version
    pub version: String,
    /// Condition as authored
    pub condition_text: String,
    /// DNF, one entry per AND-clause
    pub condition: Vec<Vec<ResolvedConditionVar>>,
    /// Actions to take while the condition holds
    pub actions: Vec<ActionSpec>,
    /// One pattern per AND-clause, same order as `condition`
    pub patterns: Vec<Pattern>,
    #[serde(skip, default = "enabled_default")]
    enabled: AtomicBool,
}

fn enabled_default() -> AtomicBool {
    AtomicBool::new(true)
}

impl Scenario {
    /// Assemble a scenario, enabled
    pub fn new(
        id: String,
        template_name: String,
        version: String,
        condition_text: String,
        condition: Vec<Vec<ResolvedConditionVar>>,
        actions: Vec<ActionSpec>,
        patterns: Vec<Pattern>,
    ) -> Self {
        Self {
            id,
            template_name,
            version,
            condition_text,
            condition,
            actions,
            patterns,
            enabled: enabled_default(),
        }
    }

    /// Whether evaluation should consider this scenario
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Toggle the scenario
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

impl Clone for Scenario {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            template_name: self.template_name.clone(),
            version: self.version.clone(),
            condition_text: self.condition_text.clone(),
            condition: self.condition.clone(),
            actions: self.actions.clone(),
            patterns: self.patterns.clone(),
            enabled: AtomicBool::new(self.is_enabled()),
        }
    }
}

impl PartialEq for Scenario {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.template_name == other.template_name
            && self.version == other.version
            && self.condition == other.condition
            && self.actions == other.actions
            && self.patterns == other.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_names() {
        for action in ActionType::ALL {
            assert_eq!(action.as_str().parse::<ActionType>().unwrap(), action);
        }
        assert_eq!(
            "reboot".parse::<ActionType>(),
            Err(CompileError::UnknownActionType("reboot".to_string()))
        );
        assert!(!ActionType::ExecuteMistral.has_undo());
        assert_eq!(ActionType::AddCausalRelationship.target_roles(), &["source", "target"]);
    }

    #[test]
    fn test_enabled_flag_survives_clone() {
        let scenario = Scenario::new(
            "t:0".to_string(),
            "t".to_string(),
            "3".to_string(),
            "host".to_string(),
            vec![],
            vec![],
            vec![],
        );
        assert!(scenario.is_enabled());
        scenario.set_enabled(false);
        assert!(!scenario.clone().is_enabled());
    }
}
