use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Malformed order payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}
