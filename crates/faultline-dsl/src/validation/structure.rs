use lazy_static::lazy_static;
use regex::Regex;

use crate::document::{TemplateDocument, TemplateType};
use crate::validation::{error_codes, ValidationError, Validator};

lazy_static! {
    static ref TEMPLATE_NAME: Regex =
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("valid template name pattern");
}

/// Checks metadata and that the content fits the template type:
/// - standard templates carry scenarios and no equivalences
/// - definition templates carry definitions only
/// - equivalence templates carry equivalences only
pub struct StructureValidator;

impl StructureValidator {
    /// Create a new structure validator
    pub fn new() -> Self {
        StructureValidator
    }

    fn validate_metadata(&self, document: &TemplateDocument) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let name = document.name();

        if name.trim().is_empty() {
            errors.push(ValidationError::at(
                error_codes::MISSING_REQUIRED_FIELD,
                "Template name must not be empty",
                "metadata.name",
            ));
        } else if !TEMPLATE_NAME.is_match(name) {
            errors.push(ValidationError::at(
                error_codes::INVALID_ID,
                format!("Invalid template name '{}'", name),
                "metadata.name",
            ));
        }

        errors
    }

    fn validate_kind(&self, document: &TemplateDocument) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let kind = document.template_type();
        let mut reject = |present: bool, field: &str| {
            if present {
                errors.push(ValidationError::at(
                    error_codes::INVALID_TEMPLATE_KIND,
                    format!("A {} template cannot declare '{}'", kind, field),
                    field,
                ));
            }
        };

        match kind {
            TemplateType::Standard => {
                reject(!document.equivalences.is_empty(), "equivalences");
            }
            TemplateType::Definition => {
                reject(!document.scenarios.is_empty(), "scenarios");
                reject(!document.equivalences.is_empty(), "equivalences");
                reject(!document.includes.is_empty(), "includes");
            }
            TemplateType::Equivalence => {
                reject(!document.scenarios.is_empty(), "scenarios");
                reject(!document.includes.is_empty(), "includes");
                reject(!document.definitions.entities.is_empty(), "definitions");
            }
        }

        if kind == TemplateType::Standard && document.scenarios.is_empty() {
            errors.push(ValidationError::at(
                error_codes::MISSING_REQUIRED_FIELD,
                "A standard template needs at least one scenario",
                "scenarios",
            ));
        }
        if kind == TemplateType::Equivalence {
            for (idx, entry) in document.equivalences.iter().enumerate() {
                if entry.equivalence.len() < 2 {
                    errors.push(ValidationError::at(
                        error_codes::MISSING_REQUIRED_FIELD,
                        "An equivalence needs at least two entity shapes",
                        format!("equivalences[{}]", idx),
                    ));
                }
            }
        }

        errors
    }
}

impl Validator for StructureValidator {
    fn validate(&self, document: &TemplateDocument) -> Vec<ValidationError> {
        let mut errors = self.validate_metadata(document);
        errors.extend(self.validate_kind(document));
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_template_document;

    #[test]
    fn test_definition_template_with_scenarios() {
        let yaml = r#"
metadata:
  name: defs
  type: definition
definitions:
  entities:
    - entity: {template_id: host, category: RESOURCE, type: nova.host}
scenarios:
  - scenario:
      condition: host
"#;
        let doc = parse_template_document(yaml).unwrap();
        let errors = StructureValidator::new().validate(&doc);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, error_codes::INVALID_TEMPLATE_KIND);
        assert_eq!(errors[0].path.as_deref(), Some("scenarios"));
    }

    #[test]
    fn test_bad_template_name() {
        let yaml = r#"
metadata:
  name: "host alarms!"
scenarios:
  - scenario:
      condition: host
"#;
        let doc = parse_template_document(yaml).unwrap();
        let errors = StructureValidator::new().validate(&doc);
        assert!(errors.iter().any(|e| e.code == error_codes::INVALID_ID));
    }
}
