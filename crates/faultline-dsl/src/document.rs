//! Serde model of a template document as authored by operators.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of template document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    /// Definitions plus scenarios
    #[default]
    Standard,
    /// Reusable definitions only, pulled in through `includes`
    Definition,
    /// Declares entity shapes that are interchangeable
    Equivalence,
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TemplateType::Standard => "standard",
            TemplateType::Definition => "definition",
            TemplateType::Equivalence => "equivalence",
        };
        f.write_str(name)
    }
}

/// Template version, written either as a number or a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateVersion {
    /// `version: 3`
    Number(u64),
    /// `version: "3"`
    Text(String),
}

impl Default for TemplateVersion {
    fn default() -> Self {
        TemplateVersion::Number(crate::CURRENT_TEMPLATE_VERSION)
    }
}

impl fmt::Display for TemplateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateVersion::Number(n) => write!(f, "{}", n),
            TemplateVersion::Text(s) => f.write_str(s),
        }
    }
}

/// The complete template document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDocument {
    /// Name, version and kind
    pub metadata: TemplateMetadata,

    /// Entity and relationship definitions
    #[serde(default)]
    pub definitions: Definitions,

    /// Definition templates whose entities and relationships are visible here
    #[serde(default)]
    pub includes: Vec<IncludeEntry>,

    /// Scenarios (standard templates only)
    #[serde(default)]
    pub scenarios: Vec<ScenarioEntry>,

    /// Equivalence classes (equivalence templates only)
    #[serde(default)]
    pub equivalences: Vec<EquivalenceEntry>,
}

impl TemplateDocument {
    /// Template name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Template kind
    pub fn template_type(&self) -> TemplateType {
        self.metadata.template_type
    }

    /// Names of included definition templates, in declaration order
    pub fn include_names(&self) -> impl Iterator<Item = &str> {
        self.includes.iter().map(|include| include.name.as_str())
    }
}

/// Template metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMetadata {
    /// Unique template name
    pub name: String,

    /// Format version
    #[serde(default)]
    pub version: TemplateVersion,

    /// Template kind
    #[serde(rename = "type", default)]
    pub template_type: TemplateType,

    /// Optional human-readable description
    #[serde(default)]
    pub description: Option<String>,
}

/// Container for entity and relationship definitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Definitions {
    /// Entity definitions
    #[serde(default)]
    pub entities: Vec<EntityEntry>,

    /// Relationship definitions
    #[serde(default)]
    pub relationships: Vec<RelationshipEntry>,
}

/// `- entity: {...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// The definition
    pub entity: EntityDefinition,
}

/// An entity the template can refer to by `template_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Symbol used in conditions and action targets
    pub template_id: String,

    /// Entity category (`RESOURCE`, `ALARM`)
    pub category: String,

    /// Entity type
    #[serde(rename = "type", default)]
    pub entity_type: Option<String>,

    /// Any other property, matched exactly against live vertices
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

/// `- relationship: {...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipEntry {
    /// The definition
    pub relationship: RelationshipDefinition,
}

/// A relationship between two template entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipDefinition {
    /// Symbol used in conditions
    pub template_id: String,

    /// Source entity `template_id`
    pub source: String,

    /// Target entity `template_id`
    pub target: String,

    /// Edge label
    pub relationship_type: String,

    /// Any other property, matched exactly against live edges
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

/// `- name: other-template`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeEntry {
    /// Name of a definition template
    pub name: String,
}

/// `- scenario: {...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioEntry {
    /// The definition
    pub scenario: ScenarioDefinition,
}

/// A condition plus the actions taken while it holds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    /// Boolean expression over entity and relationship symbols
    pub condition: String,

    /// Actions
    #[serde(default)]
    pub actions: Vec<ActionEntry>,
}

/// `- action: {...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    /// The definition
    pub action: ActionDefinition,
}

/// An action as written in the document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// One of the supported action types
    pub action_type: String,

    /// Target roles mapped to entity symbols, e.g. `target: host`
    #[serde(default)]
    pub action_target: BTreeMap<String, String>,

    /// Action specific properties
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// `- equivalence: [...]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquivalenceEntry {
    /// Interchangeable shapes
    pub equivalence: Vec<ShapeEntry>,
}

/// `- entity: {category, type, name}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeEntry {
    /// The shape
    pub entity: ShapeDefinition,
}

/// Category, type and name of an entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeDefinition {
    /// Category
    pub category: String,

    /// Type
    #[serde(rename = "type", default)]
    pub entity_type: Option<String>,

    /// Name
    #[serde(default)]
    pub name: Option<String>,
}
