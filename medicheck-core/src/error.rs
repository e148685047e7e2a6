//! Error types for MediCheck operations

/// Result type for MediCheck operations
pub type Result<T> = std::result::Result<T, MedicheckError>;

/// Error types for the ambient layers (configuration, LLM transport, storage)
///
/// Workflow execution failures use [`crate::workflow::WorkflowError`], which
/// wraps these where a collaborator surfaced them.
#[derive(Debug, thiserror::Error)]
pub enum MedicheckError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// LLM provider transport or response error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Research backend error
    #[error("Research error: {0}")]
    Research(String),

    /// Structured output did not match the expected shape
    #[error("Malformed structured output: {0}")]
    MalformedOutput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for MedicheckError {
    fn from(s: String) -> Self {
        MedicheckError::Other(s)
    }
}

impl From<&str> for MedicheckError {
    fn from(s: &str) -> Self {
        MedicheckError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for MedicheckError {
    fn from(err: anyhow::Error) -> Self {
        MedicheckError::Other(err.to_string())
    }
}
