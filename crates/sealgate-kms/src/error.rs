use thiserror::Error;

pub type KmsResult<T> = Result<T, KmsError>;

/// KMS client failures. The client never retries; callers decide.
#[derive(Debug, Error)]
pub enum KmsError {
    #[error("invalid KMS input: {0}")]
    InvalidInput(String),

    #[error("KMS transport error: {0}")]
    Transport(String),

    #[error("failed to parse KMS response: {0}")]
    ResponseParse(String),

    #[error("KMS key not found: {0}")]
    KeyNotFound(String),
}

impl KmsError {
    /// Map a non-2xx KMS reply onto an error category.
    pub(crate) fn from_status(status: u16, operation: &str, body: &str) -> Self {
        let detail = format!("{operation} returned HTTP {status}: {}", body.trim());
        let lowered = body.to_ascii_lowercase();
        if status == 404 || lowered.contains("item_not_found") || lowered.contains("not found") {
            KmsError::KeyNotFound(detail)
        } else if status == 400 || status == 422 {
            KmsError::InvalidInput(detail)
        } else {
            KmsError::Transport(detail)
        }
    }
}
