use thiserror::Error;

/// Errors raised by graph mutations and snapshot handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A vertex referenced by an operation does not exist
    #[error("Vertex not found: {0}")]
    VertexNotFound(String),

    /// An edge referenced by an operation does not exist
    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    /// A snapshot could not be loaded into a graph
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::SerializationError(err.to_string())
    }
}

/// Result alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            GraphError::VertexNotFound("host-1".to_string()).to_string(),
            "Vertex not found: host-1"
        );
        assert_eq!(
            GraphError::EdgeNotFound("a -[on]-> b".to_string()).to_string(),
            "Edge not found: a -[on]-> b"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        match GraphError::from(json_error) {
            GraphError::SerializationError(msg) => assert!(msg.contains("EOF")),
            other => panic!("Expected SerializationError, got {:?}", other),
        }
    }
}
