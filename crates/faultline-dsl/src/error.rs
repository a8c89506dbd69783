use std::fmt;
use thiserror::Error;

use crate::validation::ValidationError;

/// A template or condition that cannot be turned into scenarios.
///
/// Templates failing with a `CompileError` are marked as errored and never
/// installed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The condition string is not a valid boolean expression
    #[error("Syntax error at position {position}: {message}")]
    Syntax {
        /// Byte offset in the condition
        position: usize,
        /// What went wrong
        message: String,
    },

    /// A condition or action refers to an undefined symbol
    #[error("Unknown symbol '{0}'")]
    UnknownSymbol(String),

    /// `not` applied to an entity; only relationships may be negated
    #[error("Entity '{0}' cannot be negated, only relationships support 'not'")]
    NegatedEntity(String),

    /// A clause of the DNF has no positive literal and therefore no anchor
    #[error("Clause '{0}' has no positive literal")]
    NoPositiveLiteral(String),

    /// No entity is shared by the positive literals of every clause
    #[error("Condition '{0}' has no common target entity")]
    NoCommonTarget(String),

    /// Every clause of the condition is contradictory
    #[error("Condition '{0}' can never be satisfied")]
    Unsatisfiable(String),

    /// The DNF grew beyond the supported number of clauses
    #[error("Condition expands to {0} clauses, more than the supported maximum")]
    TooComplex(usize),

    /// The positive literals of a clause do not form a connected pattern
    #[error("Clause '{0}' is not connected through positive relationships")]
    DisconnectedPattern(String),

    /// A negated relationship shares no entity with a positive literal
    #[error("Negated relationship '{0}' does not touch any positive entity")]
    DanglingNegation(String),

    /// Unsupported action type
    #[error("Unknown action type '{0}'")]
    UnknownActionType(String),

    /// An action target could not be resolved
    #[error("Action '{action}' is missing target '{role}'")]
    MissingActionTarget {
        /// Action type
        action: String,
        /// Target role
        role: String,
    },

    /// The default target of an action is ambiguous
    #[error("Action '{action}' needs an explicit target, candidates are {candidates}")]
    AmbiguousDefaultTarget {
        /// Action type
        action: String,
        /// Comma separated candidate symbols
        candidates: String,
    },

    /// An action is missing a mandatory property
    #[error("Action '{action}' requires property '{property}'")]
    MissingActionProperty {
        /// Action type
        action: String,
        /// Property name
        property: String,
    },

    /// An action target is not bound by every clause of the condition
    #[error("Action '{action}' target '{symbol}' is not matched by every clause")]
    UnboundActionTarget {
        /// Action type
        action: String,
        /// Target symbol
        symbol: String,
    },

    /// An included definition template is not known
    #[error("Included template '{0}' not found")]
    UnknownInclude(String),
}

impl CompileError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::Syntax { .. } => "ERR_COMPILE_SYNTAX",
            CompileError::UnknownSymbol(_) => "ERR_COMPILE_UNKNOWN_SYMBOL",
            CompileError::NegatedEntity(_) => "ERR_COMPILE_NEGATED_ENTITY",
            CompileError::NoPositiveLiteral(_) => "ERR_COMPILE_NO_POSITIVE_LITERAL",
            CompileError::NoCommonTarget(_) => "ERR_COMPILE_NO_COMMON_TARGET",
            CompileError::Unsatisfiable(_) => "ERR_COMPILE_UNSATISFIABLE",
            CompileError::TooComplex(_) => "ERR_COMPILE_TOO_COMPLEX",
            CompileError::DisconnectedPattern(_) => "ERR_COMPILE_DISCONNECTED_PATTERN",
            CompileError::DanglingNegation(_) => "ERR_COMPILE_DANGLING_NEGATION",
            CompileError::UnknownActionType(_) => "ERR_COMPILE_UNKNOWN_ACTION_TYPE",
            CompileError::MissingActionTarget { .. } => "ERR_COMPILE_MISSING_ACTION_TARGET",
            CompileError::AmbiguousDefaultTarget { .. } => "ERR_COMPILE_AMBIGUOUS_TARGET",
            CompileError::MissingActionProperty { .. } => "ERR_COMPILE_MISSING_ACTION_PROPERTY",
            CompileError::UnboundActionTarget { .. } => "ERR_COMPILE_UNBOUND_ACTION_TARGET",
            CompileError::UnknownInclude(_) => "ERR_COMPILE_UNKNOWN_INCLUDE",
        }
    }
}

/// All possible errors that can occur while processing template documents
#[derive(Error, Debug)]
pub enum DslError {
    /// Errors that occur during YAML (or JSON) parsing
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// A single validation error
    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),

    /// Multiple validation errors
    #[error("{}", MultipleErrorsFormat(.0))]
    MultipleValidationErrors(Vec<ValidationError>),

    /// Unsupported template version
    #[error("Unsupported template version: {0}")]
    UnsupportedVersion(String),

    /// Compilation error
    #[error("Compile error in template '{template}': {source}")]
    CompileError {
        /// Template name
        template: String,
        /// Underlying error
        #[source]
        source: CompileError,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

// Helper struct to format multiple errors
struct MultipleErrorsFormat<'a>(&'a [ValidationError]);

impl fmt::Display for MultipleErrorsFormat<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multiple validation errors ({} issues):", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, err)?;
        }
        Ok(())
    }
}

impl DslError {
    /// Create a DslError from a vector of validation errors
    pub fn from_validation_errors(mut errors: Vec<ValidationError>) -> Self {
        match errors.len() {
            0 => DslError::InternalError(
                "Called from_validation_errors with empty vector".to_string(),
            ),
            1 => DslError::ValidationError(errors.remove(0)),
            _ => DslError::MultipleValidationErrors(errors),
        }
    }

    /// Wrap a compile error with the template it occurred in
    pub fn compile(template: &str, source: CompileError) -> Self {
        DslError::CompileError {
            template: template.to_string(),
            source,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            DslError::YamlError(_) => "ERR_DSL_YAML_PARSE",
            DslError::ValidationError(err) => err.code,
            DslError::MultipleValidationErrors(_) => "ERR_DSL_VALIDATION_MULTIPLE",
            DslError::UnsupportedVersion(_) => "ERR_DSL_UNSUPPORTED_VERSION",
            DslError::CompileError { source, .. } => source.code(),
            DslError::InternalError(_) => "ERR_DSL_INTERNAL",
        }
    }

    /// The compile error, if that is what this is
    pub fn as_compile_error(&self) -> Option<&CompileError> {
        match self {
            DslError::CompileError { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::error_codes;

    #[test]
    fn test_error_codes() {
        let err = DslError::compile("t", CompileError::NegatedEntity("host".to_string()));
        assert_eq!(err.error_code(), "ERR_COMPILE_NEGATED_ENTITY");
        assert!(err.to_string().contains("Entity 'host' cannot be negated"));

        let err = DslError::from_validation_errors(vec![ValidationError {
            code: error_codes::DUPLICATE_ID,
            message: "dup".to_string(),
            path: None,
        }]);
        assert_eq!(err.error_code(), error_codes::DUPLICATE_ID);
    }

    #[test]
    fn test_multiple_errors_format() {
        let errors = vec![
            ValidationError {
                code: error_codes::DUPLICATE_ID,
                message: "first".to_string(),
                path: Some("definitions.entities[1]".to_string()),
            },
            ValidationError {
                code: error_codes::INVALID_REFERENCE,
                message: "second".to_string(),
                path: None,
            },
        ];
        let text = DslError::from_validation_errors(errors).to_string();
        assert!(text.starts_with("Multiple validation errors (2 issues):"));
        assert!(
            text.contains("1. ERR_DSL_VALIDATION_DUPLICATE_ID: first (at definitions.entities[1])")
        );
    }
}
