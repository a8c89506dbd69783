//! Template compiler: turns template documents into scenarios.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use faultline_graph::{category, props, Edge, EdgeDescription, Properties, Vertex};
use serde_json::Value;
use tracing::{debug, info};

use crate::condition::{clause_to_string, compile_condition, ConditionVar, SymbolKind, SymbolTable};
use crate::document::{ScenarioDefinition, TemplateDocument, TemplateType};
use crate::equivalence::EquivalenceRegistry;
use crate::error::{CompileError, DslError};
use crate::scenario::{
    ActionSpec, ActionType, ElementKind, Pattern, PatternEdge, PatternVertex, ResolvedConditionVar,
    ResolvedElement, Scenario,
};
use crate::validation::validate_document;

/// A relationship definition with its endpoints
#[derive(Debug, Clone, PartialEq)]
struct RelationshipSymbol {
    source: String,
    target: String,
    label: String,
    filter: Properties,
}

/// Entities and relationships visible to one template
#[derive(Debug, Clone, Default)]
pub struct ResolvedSymbols {
    entities: BTreeMap<String, Vertex>,
    relationships: BTreeMap<String, RelationshipSymbol>,
}

impl ResolvedSymbols {
    /// Entity definition as a filter vertex
    pub fn entity(&self, template_id: &str) -> Option<&Vertex> {
        self.entities.get(template_id)
    }

    /// Relationship definition with both endpoint definitions
    pub fn relationship(&self, template_id: &str) -> Option<EdgeDescription> {
        let rel = self.relationships.get(template_id)?;
        let mut edge = Edge::new(&rel.source, &rel.target, &rel.label);
        edge.properties = rel.filter.clone();
        Some(EdgeDescription {
            edge,
            source: self.entities.get(&rel.source)?.clone(),
            target: self.entities.get(&rel.target)?.clone(),
        })
    }

    fn defines(&self, template_id: &str) -> bool {
        self.entities.contains_key(template_id) || self.relationships.contains_key(template_id)
    }

    // First occurrence wins
    fn absorb(&mut self, document: &TemplateDocument) {
        for entry in &document.definitions.entities {
            let def = &entry.entity;
            if self.defines(&def.template_id) {
                continue;
            }
            let mut vertex =
                Vertex::new(&def.template_id).with_property(props::CATEGORY, def.category.clone());
            if let Some(entity_type) = &def.entity_type {
                vertex.set(props::TYPE, entity_type.clone());
            }
            for (key, value) in &def.properties {
                vertex.properties.insert(key.clone(), value.clone());
            }
            self.entities.insert(def.template_id.clone(), vertex);
        }

        for entry in &document.definitions.relationships {
            let def = &entry.relationship;
            if self.defines(&def.template_id) {
                continue;
            }
            self.relationships.insert(
                def.template_id.clone(),
                RelationshipSymbol {
                    source: def.source.clone(),
                    target: def.target.clone(),
                    label: def.relationship_type.clone(),
                    filter: def.properties.clone(),
                },
            );
        }
    }

    fn check_endpoints(&self) -> Result<(), CompileError> {
        for rel in self.relationships.values() {
            for endpoint in [&rel.source, &rel.target] {
                if !self.entities.contains_key(endpoint) {
                    return Err(CompileError::UnknownSymbol(endpoint.clone()));
                }
            }
        }
        Ok(())
    }
}

impl SymbolTable for ResolvedSymbols {
    fn lookup(&self, symbol: &str) -> Option<SymbolKind> {
        if self.entities.contains_key(symbol) {
            return Some(SymbolKind::Entity);
        }
        self.relationships.get(symbol).map(|rel| SymbolKind::Relationship {
            source: rel.source.clone(),
            target: rel.target.clone(),
        })
    }
}

/// Result of compiling one template document
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    /// Template name
    pub name: String,
    /// Template kind
    pub template_type: TemplateType,
    /// Template version
    pub version: String,
    /// Names of included definition templates
    pub includes: Vec<String>,
    /// Installed scenarios, equivalence clones included
    pub scenarios: Vec<Scenario>,
    /// The source document
    pub document: TemplateDocument,
}

/// Compiles standard templates against the known definition and
/// equivalence templates
#[derive(Debug, Default)]
pub struct TemplateCompiler {
    definitions: HashMap<String, TemplateDocument>,
    equivalences: EquivalenceRegistry,
}

impl TemplateCompiler {
    /// Create a compiler without definition or equivalence templates
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition template for use through `includes`
    pub fn add_definition_template(&mut self, document: TemplateDocument) {
        self.definitions.insert(document.name().to_string(), document);
    }

    /// Remove a definition template
    pub fn remove_definition_template(&mut self, name: &str) -> bool {
        self.definitions.remove(name).is_some()
    }

    /// Register the classes of an equivalence template
    pub fn add_equivalence_template(&mut self, document: &TemplateDocument) {
        self.equivalences.add_template(document);
    }

    /// Remove an equivalence template
    pub fn remove_equivalence_template(&mut self, name: &str) -> bool {
        self.equivalences.remove_template(name)
    }

    /// Validate and compile a document of any kind.
    ///
    /// Definition and equivalence templates compile to zero scenarios and
    /// become visible to later standard compilations.
    pub fn compile(&mut self, document: &TemplateDocument) -> Result<CompiledTemplate, DslError> {
        validate_document(document)?;

        let scenarios = match document.template_type() {
            TemplateType::Standard => self.compile_standard(document)?,
            TemplateType::Definition => {
                let mut symbols = ResolvedSymbols::default();
                symbols.absorb(document);
                symbols
                    .check_endpoints()
                    .map_err(|e| DslError::compile(document.name(), e))?;
                self.add_definition_template(document.clone());
                Vec::new()
            }
            TemplateType::Equivalence => {
                self.add_equivalence_template(document);
                Vec::new()
            }
        };

        info!(
            template = %document.name(),
            kind = %document.template_type(),
            scenarios = scenarios.len(),
            "Compiled template"
        );

        Ok(CompiledTemplate {
            name: document.name().to_string(),
            template_type: document.template_type(),
            version: document.metadata.version.to_string(),
            includes: document.include_names().map(str::to_string).collect(),
            scenarios,
            document: document.clone(),
        })
    }

    /// Compile a standard template without registering anything
    pub fn compile_standard(&self, document: &TemplateDocument) -> Result<Vec<Scenario>, DslError> {
        let name = document.name();
        let symbols = self
            .resolve_symbols(document)
            .map_err(|e| DslError::compile(name, e))?;
        let version = document.metadata.version.to_string();

        let mut scenarios = Vec::new();
        for (idx, entry) in document.scenarios.iter().enumerate() {
            let id = format!("{}:{}", name, idx);
            let scenario = compile_scenario(&id, name, &version, &entry.scenario, &symbols)
                .map_err(|e| DslError::compile(name, e))?;

            let referenced = referenced_entities(&scenario, &symbols);
            let variants = self.equivalences.expand(&referenced);
            scenarios.push(scenario);

            for (n, substitution) in variants.into_iter().enumerate() {
                let mut variant_symbols = symbols.clone();
                for (entity_id, shape) in &substitution {
                    if let Some(entity) = variant_symbols.entities.get_mut(entity_id) {
                        shape.apply_to(entity);
                    }
                }
                let clone_id = format!("{}:eq{}", id, n + 1);
                let clone =
                    compile_scenario(&clone_id, name, &version, &entry.scenario, &variant_symbols)
                        .map_err(|e| DslError::compile(name, e))?;
                debug!(scenario = %clone_id, "Installed equivalent scenario");
                scenarios.push(clone);
            }
        }

        Ok(scenarios)
    }

    /// True if the standard template includes the named definition template
    pub fn depends_on(document: &TemplateDocument, definition_name: &str) -> bool {
        document.include_names().any(|name| name == definition_name)
    }

    /// Entities and relationships visible to a template: its own definitions
    /// first, then each include in declaration order
    pub fn resolve_symbols(
        &self,
        document: &TemplateDocument,
    ) -> Result<ResolvedSymbols, CompileError> {
        let mut symbols = ResolvedSymbols::default();
        symbols.absorb(document);
        for include in document.include_names() {
            let included = self
                .definitions
                .get(include)
                .ok_or_else(|| CompileError::UnknownInclude(include.to_string()))?;
            symbols.absorb(included);
        }
        symbols.check_endpoints()?;
        Ok(symbols)
    }
}

fn referenced_entities(scenario: &Scenario, symbols: &ResolvedSymbols) -> BTreeMap<String, Vertex> {
    let mut out = BTreeMap::new();
    for pattern in &scenario.patterns {
        for id in pattern.vertices.keys() {
            if let Some(entity) = symbols.entity(id) {
                out.insert(id.clone(), entity.clone());
            }
        }
    }
    out
}

fn compile_scenario(
    id: &str,
    template_name: &str,
    version: &str,
    definition: &ScenarioDefinition,
    symbols: &ResolvedSymbols,
) -> Result<Scenario, CompileError> {
    let compiled = compile_condition(&definition.condition, symbols)?;

    let mut condition = Vec::with_capacity(compiled.dnf.clauses.len());
    let mut patterns = Vec::with_capacity(compiled.dnf.clauses.len());
    for clause in &compiled.dnf.clauses {
        check_connected(clause, symbols)?;
        condition.push(resolve_clause(clause, symbols)?);
        patterns.push(build_pattern(clause, symbols)?);
    }

    let actions = definition
        .actions
        .iter()
        .map(|entry| resolve_action(&entry.action, &compiled.common_targets, &patterns, symbols))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Scenario::new(
        id.to_string(),
        template_name.to_string(),
        version.to_string(),
        definition.condition.clone(),
        condition,
        actions,
        patterns,
    ))
}

fn endpoints(var: &ConditionVar, symbols: &ResolvedSymbols) -> Vec<String> {
    match symbols.lookup(&var.symbol_name) {
        Some(SymbolKind::Entity) => vec![var.symbol_name.clone()],
        Some(SymbolKind::Relationship { source, target }) => vec![source, target],
        None => Vec::new(),
    }
}

fn positive_vertices(clause: &[ConditionVar], symbols: &ResolvedSymbols) -> BTreeSet<String> {
    clause
        .iter()
        .filter(|v| v.positive)
        .flat_map(|v| endpoints(v, symbols))
        .collect()
}

/// Positive literals must form one connected pattern and each negated
/// relationship must touch it
fn check_connected(clause: &[ConditionVar], symbols: &ResolvedSymbols) -> Result<(), CompileError> {
    let vertices = positive_vertices(clause, symbols);

    let mut parent: BTreeMap<String, String> =
        vertices.iter().map(|v| (v.clone(), v.clone())).collect();
    fn find(parent: &BTreeMap<String, String>, id: &str) -> String {
        let mut current = id.to_string();
        while let Some(next) = parent.get(&current) {
            if *next == current {
                break;
            }
            current = next.clone();
        }
        current
    }

    for var in clause.iter().filter(|v| v.positive) {
        let kind = symbols.lookup(&var.symbol_name);
        if let Some(SymbolKind::Relationship { source, target }) = kind {
            let (a, b) = (find(&parent, &source), find(&parent, &target));
            if a != b {
                parent.insert(a, b);
            }
        }
    }

    let roots: BTreeSet<String> = vertices.iter().map(|v| find(&parent, v)).collect();
    if roots.len() > 1 {
        return Err(CompileError::DisconnectedPattern(clause_to_string(clause)));
    }

    for var in clause.iter().filter(|v| !v.positive) {
        if !endpoints(var, symbols).iter().any(|id| vertices.contains(id)) {
            return Err(CompileError::DanglingNegation(var.symbol_name.clone()));
        }
    }

    Ok(())
}

fn resolve_clause(
    clause: &[ConditionVar],
    symbols: &ResolvedSymbols,
) -> Result<Vec<ResolvedConditionVar>, CompileError> {
    clause
        .iter()
        .map(|var| {
            let (element, kind) = match symbols.lookup(&var.symbol_name) {
                Some(SymbolKind::Entity) => (
                    symbols.entity(&var.symbol_name).cloned().map(ResolvedElement::Vertex),
                    ElementKind::Entity,
                ),
                Some(SymbolKind::Relationship { .. }) => (
                    symbols.relationship(&var.symbol_name).map(ResolvedElement::Edge),
                    ElementKind::Relationship,
                ),
                None => (None, ElementKind::Entity),
            };
            let element =
                element.ok_or_else(|| CompileError::UnknownSymbol(var.symbol_name.clone()))?;
            Ok(ResolvedConditionVar {
                symbol_name: var.symbol_name.clone(),
                element,
                kind,
                positive: var.positive,
            })
        })
        .collect()
}

fn build_pattern(
    clause: &[ConditionVar],
    symbols: &ResolvedSymbols,
) -> Result<Pattern, CompileError> {
    let positive = positive_vertices(clause, symbols);
    let mut pattern = Pattern::default();

    let add_vertex = |pattern: &mut Pattern, id: &str| -> Result<(), CompileError> {
        if pattern.vertices.contains_key(id) {
            return Ok(());
        }
        let entity = symbols
            .entity(id)
            .ok_or_else(|| CompileError::UnknownSymbol(id.to_string()))?;
        pattern.vertices.insert(
            id.to_string(),
            PatternVertex {
                template_id: id.to_string(),
                filter: entity.properties.clone(),
                positive: positive.contains(id),
            },
        );
        Ok(())
    };

    for var in clause {
        for id in endpoints(var, symbols) {
            add_vertex(&mut pattern, &id)?;
        }
        if let Some(description) = symbols.relationship(&var.symbol_name) {
            pattern.edges.push(PatternEdge {
                template_id: var.symbol_name.clone(),
                source: description.edge.source_id,
                target: description.edge.target_id,
                label: description.edge.label,
                filter: description.edge.properties,
                positive: var.positive,
            });
        }
    }

    Ok(pattern)
}

fn resolve_action(
    action: &crate::document::ActionDefinition,
    common_targets: &[String],
    patterns: &[Pattern],
    symbols: &ResolvedSymbols,
) -> Result<ActionSpec, CompileError> {
    let action_type = ActionType::from_str(&action.action_type)?;
    let name = action_type.as_str().to_string();

    for property in action_type.required_properties() {
        let present = action
            .properties
            .get(*property)
            .map(|v| !v.is_null())
            .unwrap_or(false);
        if !present {
            return Err(CompileError::MissingActionProperty {
                action: name,
                property: property.to_string(),
            });
        }
    }

    let mut targets = BTreeMap::new();
    for role in action_type.target_roles() {
        let symbol = match action.action_target.get(*role) {
            Some(symbol) => symbol.clone(),
            None if action_type.target_roles().len() == 1 => {
                default_target(&name, common_targets, symbols)?
            }
            None => {
                return Err(CompileError::MissingActionTarget {
                    action: name,
                    role: role.to_string(),
                })
            }
        };
        if symbols.lookup(&symbol) != Some(SymbolKind::Entity) {
            return Err(CompileError::UnknownSymbol(symbol));
        }
        let bound_everywhere = patterns
            .iter()
            .all(|p| p.vertex(&symbol).map(|v| v.positive).unwrap_or(false));
        if !bound_everywhere {
            return Err(CompileError::UnboundActionTarget { action: name, symbol });
        }
        targets.insert(role.to_string(), symbol);
    }

    Ok(ActionSpec {
        action_type,
        targets,
        properties: action.properties.clone(),
    })
}

/// The single common target, or failing that the single non-alarm one
fn default_target(
    action: &str,
    common_targets: &[String],
    symbols: &ResolvedSymbols,
) -> Result<String, CompileError> {
    if let [only] = common_targets {
        return Ok(only.clone());
    }
    let resources: Vec<&String> = common_targets
        .iter()
        .filter(|id| {
            symbols
                .entity(id)
                .and_then(|e| e.get(props::CATEGORY))
                .map(|c| c != &Value::from(category::ALARM))
                .unwrap_or(true)
        })
        .collect();
    match resources.as_slice() {
        [only] => Ok((*only).clone()),
        _ => Err(CompileError::AmbiguousDefaultTarget {
            action: action.to_string(),
            candidates: common_targets.join(", "),
        }),
    }
}
