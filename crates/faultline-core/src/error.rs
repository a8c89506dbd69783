use faultline_dsl::DslError;
use faultline_graph::GraphError;
use thiserror::Error;

/// Core error type for the Faultline engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Graph mutation or lookup failed
    #[error("Graph error: {0}")]
    GraphError(String),

    /// Template could not be parsed, validated or compiled
    #[error("Template error: {0}")]
    TemplateError(String),

    /// Template not found
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Matching a single scenario failed
    #[error("Match error: {0}")]
    MatchError(String),

    /// A recipe step could not be applied
    #[error("Action execution error: {0}")]
    ActionExecutionError(String),

    /// A worker failed to acknowledge a replicated delta
    #[error("Replication fault: {0}")]
    ReplicationFault(String),

    /// A datasource driver failed
    #[error("Driver fault: {0}")]
    DriverFault(String),

    /// Event log, snapshot or other store failed
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Message bus failure
    #[error("Messaging error: {0}")]
    MessagingError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A channel or worker is no longer running
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Stable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::GraphError(_) => "ERR_CORE_GRAPH",
            CoreError::TemplateError(_) => "ERR_CORE_TEMPLATE",
            CoreError::TemplateNotFound(_) => "ERR_CORE_TEMPLATE_NOT_FOUND",
            CoreError::MatchError(_) => "ERR_CORE_MATCH",
            CoreError::ActionExecutionError(_) => "ERR_CORE_ACTION_EXECUTION",
            CoreError::ReplicationFault(_) => "ERR_CORE_REPLICATION_FAULT",
            CoreError::DriverFault(_) => "ERR_CORE_DRIVER_FAULT",
            CoreError::StateStoreError(_) => "ERR_CORE_STATE_STORE",
            CoreError::MessagingError(_) => "ERR_CORE_MESSAGING",
            CoreError::SerializationError(_) => "ERR_CORE_SERIALIZATION",
            CoreError::ConfigurationError(_) => "ERR_CORE_CONFIGURATION",
            CoreError::ChannelClosed(_) => "ERR_CORE_CHANNEL_CLOSED",
            CoreError::Other(_) => "ERR_CORE_OTHER",
        }
    }
}

/// Result alias used across the engine
pub type CoreResult<T> = Result<T, CoreError>;

impl From<GraphError> for CoreError {
    fn from(err: GraphError) -> Self {
        CoreError::GraphError(err.to_string())
    }
}

impl From<DslError> for CoreError {
    fn from(err: DslError) -> Self {
        CoreError::TemplateError(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (CoreError::MatchError("scenario t:0".to_string()), "Match error: scenario t:0"),
            (CoreError::ReplicationFault("worker 2".to_string()), "Replication fault: worker 2"),
            (CoreError::DriverFault("nova".to_string()), "Driver fault: nova"),
            (CoreError::Other("boom".to_string()), "boom"),
        ];
        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_error_conversions() {
        let err: CoreError = GraphError::VertexNotFound("h1".to_string()).into();
        assert_eq!(err.error_code(), "ERR_CORE_GRAPH");
        assert!(err.to_string().contains("h1"));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::SerializationError(_)));

        let err: CoreError = "plain".into();
        assert_eq!(err, CoreError::Other("plain".to_string()));
    }
}
