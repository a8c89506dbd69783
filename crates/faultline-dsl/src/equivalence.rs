//! Equivalent entity shapes.
//!
//! An equivalence template declares that entities of several shapes are
//! interchangeable, e.g. alarms of the same meaning coming from two monitoring
//! tools. A scenario referring to one of the shapes is installed once for each
//! combination of equivalent shapes of the entities it references.

use std::collections::BTreeMap;

use faultline_graph::{props, Vertex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{ShapeDefinition, TemplateDocument};

/// Category, type and optional name of an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Shape {
    /// Category
    pub category: String,
    /// Type
    pub entity_type: Option<String>,
    /// Name
    pub name: Option<String>,
}

impl From<&ShapeDefinition> for Shape {
    fn from(def: &ShapeDefinition) -> Self {
        Self {
            category: def.category.clone(),
            entity_type: def.entity_type.clone(),
            name: def.name.clone(),
        }
    }
}

impl Shape {
    /// Shape of an entity definition vertex
    pub fn of(entity: &Vertex) -> Self {
        Self {
            category: entity.category().unwrap_or_default().to_string(),
            entity_type: entity.entity_type().map(str::to_string),
            name: entity.name().map(str::to_string),
        }
    }

    /// Overwrite the shape properties of an entity definition
    pub fn apply_to(&self, entity: &mut Vertex) {
        entity.set(props::CATEGORY, self.category.clone());
        set_or_remove(entity, props::TYPE, self.entity_type.as_deref());
        set_or_remove(entity, props::NAME, self.name.as_deref());
    }
}

fn set_or_remove(entity: &mut Vertex, key: &str, value: Option<&str>) {
    match value {
        Some(value) => {
            entity.properties.insert(key.to_string(), Value::from(value));
        }
        None => {
            entity.properties.remove(key);
        }
    }
}

/// Every equivalence class currently declared
#[derive(Debug, Clone, Default)]
pub struct EquivalenceRegistry {
    // template name -> classes declared by that template
    classes: BTreeMap<String, Vec<Vec<Shape>>>,
}

impl EquivalenceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the classes of an equivalence template, replacing older ones
    pub fn add_template(&mut self, document: &TemplateDocument) {
        let classes = document
            .equivalences
            .iter()
            .map(|entry| entry.equivalence.iter().map(|s| Shape::from(&s.entity)).collect())
            .collect();
        self.classes.insert(document.name().to_string(), classes);
    }

    /// Forget the classes of an equivalence template
    pub fn remove_template(&mut self, name: &str) -> bool {
        self.classes.remove(name).is_some()
    }

    /// True if no class is declared
    pub fn is_empty(&self) -> bool {
        self.classes.values().all(Vec::is_empty)
    }

    /// Shapes equivalent to `shape`, excluding the shape itself
    pub fn alternatives(&self, shape: &Shape) -> Vec<Shape> {
        let mut out: Vec<Shape> = Vec::new();
        for class in self.classes.values().flatten() {
            if class.contains(shape) {
                for other in class {
                    if other != shape && !out.contains(other) {
                        out.push(other.clone());
                    }
                }
            }
        }
        out
    }

    /// Entity substitutions for every non-original combination of
    /// equivalent shapes of the given entities
    pub fn expand(&self, entities: &BTreeMap<String, Vertex>) -> Vec<BTreeMap<String, Shape>> {
        let choices: Vec<(String, Vec<Shape>)> = entities
            .iter()
            .filter_map(|(id, entity)| {
                let original = Shape::of(entity);
                let alternatives = self.alternatives(&original);
                if alternatives.is_empty() {
                    None
                } else {
                    let mut all = vec![original];
                    all.extend(alternatives);
                    Some((id.clone(), all))
                }
            })
            .collect();

        if choices.is_empty() {
            return Vec::new();
        }

        // Cartesian product; index 0 of every choice list is the original
        let mut combos: Vec<Vec<usize>> = vec![Vec::new()];
        for (_, shapes) in &choices {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    (0..shapes.len()).map(move |i| {
                        let mut next = prefix.clone();
                        next.push(i);
                        next
                    })
                })
                .collect();
        }

        combos
            .into_iter()
            .filter(|combo| combo.iter().any(|&i| i != 0))
            .map(|combo| {
                combo
                    .iter()
                    .zip(&choices)
                    .filter(|(&i, _)| i != 0)
                    .map(|(&i, (id, shapes))| (id.clone(), shapes[i].clone()))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_template_document;

    fn registry() -> EquivalenceRegistry {
        let doc = parse_template_document(
            r#"
metadata:
  name: cpu-equivalence
  type: equivalence
equivalences:
  - equivalence:
      - entity: {category: ALARM, type: nagios, name: cpu_high}
      - entity: {category: ALARM, type: zabbix, name: cpu_high}
      - entity: {category: ALARM, type: prometheus, name: HighCpu}
"#,
        )
        .unwrap();
        let mut registry = EquivalenceRegistry::new();
        registry.add_template(&doc);
        registry
    }

    fn alarm(entity_type: &str, name: &str) -> Vertex {
        Vertex::new("alarm")
            .with_property(props::CATEGORY, "ALARM")
            .with_property(props::TYPE, entity_type)
            .with_property(props::NAME, name)
    }

    #[test]
    fn test_expand_single_entity() {
        let registry = registry();
        let mut entities = BTreeMap::new();
        entities.insert("alarm".to_string(), alarm("nagios", "cpu_high"));
        entities.insert(
            "host".to_string(),
            Vertex::new("host").with_property(props::CATEGORY, "RESOURCE"),
        );

        let variants = registry.expand(&entities);
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0]["alarm"].entity_type.as_deref(), Some("zabbix"));
        assert_eq!(variants[1]["alarm"].name.as_deref(), Some("HighCpu"));
        assert!(variants.iter().all(|v| !v.contains_key("host")));
    }

    #[test]
    fn test_expand_cartesian() {
        let registry = registry();
        let mut entities = BTreeMap::new();
        entities.insert("a1".to_string(), alarm("nagios", "cpu_high"));
        entities.insert("a2".to_string(), alarm("zabbix", "cpu_high"));
        // 3 x 3 combinations minus the original
        assert_eq!(registry.expand(&entities).len(), 8);
    }

    #[test]
    fn test_unrelated_shapes_do_not_expand() {
        let registry = registry();
        let mut entities = BTreeMap::new();
        entities.insert("a".to_string(), alarm("nagios", "disk_full"));
        assert!(registry.expand(&entities).is_empty());
        assert!(registry.clone().remove_template("cpu-equivalence"));
    }
}
