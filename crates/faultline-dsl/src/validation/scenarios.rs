use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::condition::parse_condition;
use crate::document::TemplateDocument;
use crate::scenario::ActionType;
use crate::validation::{error_codes, ValidationError, Validator};

/// Checks scenarios:
/// - conditions parse and only name defined symbols
/// - action types are supported
/// - action targets name defined entities
pub struct ScenarioValidator;

impl ScenarioValidator {
    /// Create a new scenario validator
    pub fn new() -> Self {
        ScenarioValidator
    }
}

impl Validator for ScenarioValidator {
    fn validate(&self, document: &TemplateDocument) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let check_symbols = document.includes.is_empty();

        let entities: HashSet<&str> = document
            .definitions
            .entities
            .iter()
            .map(|e| e.entity.template_id.as_str())
            .collect();
        let mut symbols: HashMap<&str, bool> = entities.iter().map(|id| (*id, true)).collect();
        for rel in &document.definitions.relationships {
            symbols.insert(rel.relationship.template_id.as_str(), false);
        }

        for (idx, entry) in document.scenarios.iter().enumerate() {
            let scenario = &entry.scenario;
            let path = format!("scenarios[{}]", idx);

            if scenario.condition.trim().is_empty() {
                errors.push(ValidationError::at(
                    error_codes::MISSING_REQUIRED_FIELD,
                    "Scenario condition must not be empty",
                    format!("{}.condition", path),
                ));
            } else {
                match parse_condition(&scenario.condition) {
                    Ok(expr) if check_symbols => {
                        for symbol in expr.symbols() {
                            if !symbols.contains_key(symbol.as_str()) {
                                errors.push(ValidationError::at(
                                    error_codes::INVALID_REFERENCE,
                                    format!("Condition refers to undefined symbol '{}'", symbol),
                                    format!("{}.condition", path),
                                ));
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => errors.push(ValidationError::at(
                        error_codes::INVALID_CONDITION,
                        err.to_string(),
                        format!("{}.condition", path),
                    )),
                }
            }

            if scenario.actions.is_empty() {
                errors.push(ValidationError::at(
                    error_codes::MISSING_REQUIRED_FIELD,
                    "Scenario needs at least one action",
                    format!("{}.actions", path),
                ));
            }

            for (action_idx, action) in scenario.actions.iter().enumerate() {
                let action = &action.action;
                let action_path = format!("{}.actions[{}]", path, action_idx);

                if ActionType::from_str(&action.action_type).is_err() {
                    errors.push(ValidationError::at(
                        error_codes::UNKNOWN_ACTION_TYPE,
                        format!("Unknown action type '{}'", action.action_type),
                        format!("{}.action_type", action_path),
                    ));
                }

                if check_symbols {
                    for (role, symbol) in &action.action_target {
                        if !entities.contains(symbol.as_str()) {
                            errors.push(ValidationError::at(
                                error_codes::INVALID_REFERENCE,
                                format!(
                                    "Action target '{}' refers to undefined entity '{}'",
                                    role, symbol
                                ),
                                format!("{}.action_target.{}", action_path, role),
                            ));
                        }
                    }
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_template_document;

    const YAML: &str = r#"
metadata:
  name: host-alarms
definitions:
  entities:
    - entity: {template_id: alarm, category: ALARM, type: nagios}
    - entity: {template_id: host, category: RESOURCE, type: nova.host}
  relationships:
    - relationship: {template_id: alarm_on_host, source: alarm, target: host, relationship_type: on}
scenarios:
  - scenario:
      condition: alarm_on_host and unknown_rel
      actions:
        - action:
            action_type: blow_up
            action_target: {target: vm}
  - scenario:
      condition: "alarm_on_host and ("
      actions:
        - action:
            action_type: set_state
            action_target: {target: host}
            properties: {state: ERROR}
"#;

    #[test]
    fn test_reports_every_problem() {
        let doc = parse_template_document(YAML).unwrap();
        let errors = ScenarioValidator::new().validate(&doc);
        let codes: Vec<_> = errors.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                error_codes::INVALID_REFERENCE,
                error_codes::UNKNOWN_ACTION_TYPE,
                error_codes::INVALID_REFERENCE,
                error_codes::INVALID_CONDITION,
            ]
        );
        assert_eq!(errors[2].path.as_deref(), Some("scenarios[0].actions[0].action_target.target"));
    }
}
