//! # Faultline DSL
//!
//! Template documents describe how observed faults imply deduced ones. A
//! template defines entities and relationships, and scenarios whose boolean
//! condition over those symbols triggers actions such as raising an alarm.
//! This crate parses, validates and compiles templates into immutable
//! [`Scenario`]s with one match [`Pattern`] per clause of the condition's
//! disjunctive normal form.
//!
//! ## Example
//!
//! ```
//! use faultline_dsl::{parse_and_compile_template, ActionType};
//!
//! let yaml = r#"
//! metadata:
//!   name: host-down
//! definitions:
//!   entities:
//!     - entity: {template_id: alarm, category: ALARM, type: nagios, name: host_down}
//!     - entity: {template_id: host, category: RESOURCE, type: nova.host}
//!   relationships:
//!     - relationship: {template_id: alarm_on_host, source: alarm, target: host, relationship_type: on}
//! scenarios:
//!   - scenario:
//!       condition: alarm_on_host
//!       actions:
//!         - action:
//!             action_type: set_state
//!             properties: {state: ERROR}
//! "#;
//!
//! let compiled = parse_and_compile_template(yaml).unwrap();
//! let action = &compiled.scenarios[0].actions[0];
//! assert_eq!(action.action_type, ActionType::SetState);
//! assert_eq!(action.target("target"), Some("host"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod parser;

pub mod compiler;
pub mod condition;
pub mod document;
pub mod equivalence;
pub mod scenario;
pub mod validation;

pub use compiler::{CompiledTemplate, ResolvedSymbols, TemplateCompiler};
pub use condition::{
    compile_condition, parse_condition, to_dnf, CompiledCondition, ConditionVar, Dnf, Expr,
    SymbolKind, SymbolTable, MAX_DNF_CLAUSES,
};
pub use document::{TemplateDocument, TemplateMetadata, TemplateType, TemplateVersion};
pub use equivalence::{EquivalenceRegistry, Shape};
pub use error::{CompileError, DslError};
pub use parser::{parse_template_document, SUPPORTED_VERSIONS};
pub use scenario::{
    ActionSpec, ActionType, ElementKind, Pattern, PatternEdge, PatternVertex, ResolvedConditionVar,
    ResolvedElement, Scenario,
};
pub use validation::{validate_document, ValidationError};

/// Version assumed when a document does not declare one
pub const CURRENT_TEMPLATE_VERSION: u64 = 3;

/// Parse, validate and compile a standalone template.
///
/// Templates with `includes` need a [`TemplateCompiler`] that already knows
/// the included definition templates.
pub fn parse_and_compile_template(source: &str) -> Result<CompiledTemplate, DslError> {
    let document = parse_template_document(source)?;
    TemplateCompiler::new().compile(&document)
}

/// Parse and validate a template without compiling it
pub fn parse_and_validate_template(source: &str) -> Result<TemplateDocument, DslError> {
    let document = parse_template_document(source)?;
    validate_document(&document)?;
    Ok(document)
}
