use std::error::Error;
use std::fmt;

use crate::document::TemplateDocument;
use crate::error::DslError;

mod definitions;
mod scenarios;
mod structure;

/// Represents a validation error found in a template document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Error code (should be a constant identifier)
    pub code: &'static str,

    /// Human-readable error message
    pub message: String,

    /// Optional path to the location of the error (e.g., "scenarios[0].actions[1]")
    pub path: Option<String>,
}

impl ValidationError {
    /// Build an error located at `path`
    pub fn at(code: &'static str, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: Some(path.into()),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: {} (at {})", self.code, self.message, path)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl Error for ValidationError {}

/// Validation error codes
pub mod error_codes {
    /// Reference to an undefined entity, relationship or template
    pub const INVALID_REFERENCE: &str = "ERR_DSL_VALIDATION_INVALID_REFERENCE";

    /// Duplicate template id
    pub const DUPLICATE_ID: &str = "ERR_DSL_VALIDATION_DUPLICATE_ID";

    /// Malformed template id or template name
    pub const INVALID_ID: &str = "ERR_DSL_VALIDATION_INVALID_ID";

    /// Missing required field
    pub const MISSING_REQUIRED_FIELD: &str = "ERR_DSL_VALIDATION_MISSING_REQUIRED_FIELD";

    /// Action type outside the supported set
    pub const UNKNOWN_ACTION_TYPE: &str = "ERR_DSL_VALIDATION_UNKNOWN_ACTION_TYPE";

    /// Content not allowed for the declared template type
    pub const INVALID_TEMPLATE_KIND: &str = "ERR_DSL_VALIDATION_INVALID_TEMPLATE_KIND";

    /// Condition string that does not parse
    pub const INVALID_CONDITION: &str = "ERR_DSL_VALIDATION_INVALID_CONDITION";

    /// Invalid template version
    pub const INVALID_VERSION: &str = "ERR_DSL_VALIDATION_INVALID_VERSION";
}

/// A trait for validators that check one aspect of a template document
pub trait Validator {
    /// Validate the document and return a list of validation errors (if any)
    fn validate(&self, document: &TemplateDocument) -> Vec<ValidationError>;
}

/// Validate a parsed template document.
///
/// Symbols coming from included definition templates are unknown at this
/// point, so reference checks are skipped for documents with `includes`;
/// the compiler reports those as `UnknownSymbol`.
pub fn validate_document(document: &TemplateDocument) -> Result<(), DslError> {
    let validators: Vec<Box<dyn Validator>> = vec![
        Box::new(structure::StructureValidator::new()),
        Box::new(definitions::DefinitionsValidator::new()),
        Box::new(scenarios::ScenarioValidator::new()),
    ];

    let errors: Vec<ValidationError> = validators
        .iter()
        .flat_map(|validator| validator.validate(document))
        .collect();

    if !errors.is_empty() {
        return Err(DslError::from_validation_errors(errors));
    }

    Ok(())
}

/// Validate and collect errors without failing
pub fn collect_errors(document: &TemplateDocument) -> Vec<ValidationError> {
    match validate_document(document) {
        Ok(()) => Vec::new(),
        Err(DslError::ValidationError(err)) => vec![err],
        Err(DslError::MultipleValidationErrors(errs)) => errs,
        Err(_) => Vec::new(),
    }
}
