//! Error types for Calmia

use thiserror::Error;

/// Errors that can occur anywhere in the assessment-to-recommendation pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Question source unavailable: {0}")]
    DataSource(String),

    #[error("No valid questions found in the questionnaire")]
    NoValidQuestions,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("User not authenticated")]
    AuthenticationRequired,

    #[error("Prediction failed: {0}")]
    Prediction(String),

    #[error("Therapy recommendation failed: {0}")]
    Recommendation(String),

    #[error("Environment {id} not available: {reason}")]
    EnvironmentNotFound { id: String, reason: String },

    #[error("No connection to the recommendation service: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether the automatic retry loop may re-run the remote sequence after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PipelineError::Cancelled
                | PipelineError::AuthenticationRequired
                | PipelineError::Config(_)
        )
    }
}

/// Errors raised by document store and local cache backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reasons a stored question document is rejected during decoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionError {
    #[error("Missing or invalid \"text\" field")]
    MissingText,

    #[error("Missing or invalid \"type\" field: {0:?}")]
    InvalidType(Option<String>),

    #[error("Missing or empty options array")]
    MissingOptions,

    #[error("Invalid scale range: {0}")]
    InvalidRange(String),

    #[error("Document is not an object")]
    NotAnObject,
}
