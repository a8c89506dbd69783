use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::document::TemplateDocument;
use crate::validation::{error_codes, ValidationError, Validator};

lazy_static! {
    // Same character set the condition tokenizer accepts for symbols
    static ref TEMPLATE_ID: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_.:\-]*$").expect("valid template id pattern");
}

const RESERVED_WORDS: [&str; 3] = ["and", "or", "not"];

/// Checks entity and relationship definitions:
/// - template ids are well formed, not reserved words and unique
/// - relationships connect entities defined in the same document
pub struct DefinitionsValidator;

impl DefinitionsValidator {
    /// Create a new definitions validator
    pub fn new() -> Self {
        DefinitionsValidator
    }

    fn check_id(
        &self,
        id: &str,
        path: String,
        seen: &mut HashSet<String>,
    ) -> Option<ValidationError> {
        if !TEMPLATE_ID.is_match(id) || RESERVED_WORDS.contains(&id.to_ascii_lowercase().as_str()) {
            return Some(ValidationError::at(
                error_codes::INVALID_ID,
                format!("Invalid template id '{}'", id),
                path,
            ));
        }
        if !seen.insert(id.to_string()) {
            return Some(ValidationError::at(
                error_codes::DUPLICATE_ID,
                format!("Duplicate template id '{}'", id),
                path,
            ));
        }
        None
    }
}

impl Validator for DefinitionsValidator {
    fn validate(&self, document: &TemplateDocument) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for (idx, entry) in document.definitions.entities.iter().enumerate() {
            let entity = &entry.entity;
            let path = format!("definitions.entities[{}]", idx);
            let id_path = format!("{}.template_id", path);
            errors.extend(self.check_id(&entity.template_id, id_path, &mut seen));
            if entity.category.trim().is_empty() {
                errors.push(ValidationError::at(
                    error_codes::MISSING_REQUIRED_FIELD,
                    format!("Entity '{}' has no category", entity.template_id),
                    format!("{}.category", path),
                ));
            }
        }

        let entity_ids: HashSet<&str> = document
            .definitions
            .entities
            .iter()
            .map(|e| e.entity.template_id.as_str())
            .collect();
        let check_endpoints = document.includes.is_empty();

        for (idx, entry) in document.definitions.relationships.iter().enumerate() {
            let rel = &entry.relationship;
            let path = format!("definitions.relationships[{}]", idx);
            let id_path = format!("{}.template_id", path);
            errors.extend(self.check_id(&rel.template_id, id_path, &mut seen));

            if rel.relationship_type.trim().is_empty() {
                errors.push(ValidationError::at(
                    error_codes::MISSING_REQUIRED_FIELD,
                    format!("Relationship '{}' has no relationship_type", rel.template_id),
                    format!("{}.relationship_type", path),
                ));
            }

            if check_endpoints {
                for (role, endpoint) in [("source", &rel.source), ("target", &rel.target)] {
                    if !entity_ids.contains(endpoint.as_str()) {
                        errors.push(ValidationError::at(
                            error_codes::INVALID_REFERENCE,
                            format!(
                                "Relationship '{}' refers to unknown {} entity '{}'",
                                rel.template_id, role, endpoint
                            ),
                            format!("{}.{}", path, role),
                        ));
                    }
                }
            }
        }

        errors
    }
}
