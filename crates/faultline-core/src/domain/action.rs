//! Action identity, primitive steps and active action records.

use faultline_dsl::ActionType;
use faultline_graph::{Edge, EdgeKey, Properties, Vertex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use super::events::EntityEvent;

/// DO applies an action's effect, UNDO retracts it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    /// Apply
    Do,
    /// Retract
    Undo,
}

impl ActionMode {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionMode::Do => "do",
            ActionMode::Undo => "undo",
        }
    }
}

/// Deterministic identity of a logical action.
///
/// Built from the action type, the live target ids sorted by role and the
/// action properties sorted by key, so a DO and its UNDO always agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    /// Compute the id of an action on concrete targets
    pub fn compute(
        action_type: ActionType,
        targets: &BTreeMap<String, String>,
        properties: &Properties,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(action_type.as_str().as_bytes());
        for (role, id) in targets {
            hasher.update(b"\x1f");
            hasher.update(role.as_bytes());
            hasher.update(b"=");
            hasher.update(id.as_bytes());
        }
        for (key, value) in properties {
            hasher.update(b"\x1e");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
        }
        ActionId(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic id of a deduced alarm on a resource
pub fn deduced_alarm_id(alarm_name: &str, target_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(alarm_name.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(target_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("deduced-{}", &digest[..32])
}

/// A primitive graph mutation produced by an action recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", content = "payload", rename_all = "snake_case")]
pub enum Step {
    /// Create a vertex
    AddVertex(Vertex),
    /// Tombstone a vertex
    RemoveVertex(String),
    /// Merge properties into a vertex
    UpdateVertex(Vertex),
    /// Create an edge
    AddEdge(Edge),
    /// Tombstone an edge
    RemoveEdge(EdgeKey),
    /// Hand a payload to an external workflow engine
    NotifyExternal(Value),
}

impl Step {
    /// The ingestion event that carries out this step
    pub fn into_event(self) -> EntityEvent {
        match self {
            Step::AddVertex(vertex) | Step::UpdateVertex(vertex) => {
                EntityEvent::update_entity(vertex)
            }
            Step::RemoveVertex(id) => EntityEvent::delete_entity(&id),
            Step::AddEdge(edge) => EntityEvent::update_relationship(edge),
            Step::RemoveEdge(key) => EntityEvent::delete_relationship(&key),
            Step::NotifyExternal(payload) => EntityEvent::execute_external(payload),
        }
    }
}

/// One reason an action is active: a scenario clause matched with these
/// bindings
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    /// Scenario id
    pub scenario_id: String,
    /// Index of the AND-clause
    pub clause: usize,
    /// Template id to live id
    pub bindings: BTreeMap<String, String>,
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings = self
            .bindings
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{}#{}[{}]", self.scenario_id, self.clause, bindings)
    }
}

/// A trigger currently holding an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAction {
    /// Action identity
    pub action_id: ActionId,
    /// Action type
    pub action_type: ActionType,
    /// Live id of the action's primary target, empty for untargeted actions
    pub target_id: String,
    /// Target role to live id
    pub targets: BTreeMap<String, String>,
    /// Template owning the triggering scenario
    pub template_name: String,
    /// The trigger
    pub trigger: TriggerKey,
    /// Action properties
    pub properties: Properties,
    /// Order of recording, assigned by the store
    #[serde(default)]
    pub sequence: u64,
}
