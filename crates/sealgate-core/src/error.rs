use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors surfaced by the gateway core.
///
/// Caller-level kinds (`InvalidInput` through `FileEmpty`) are safe to map
/// straight onto client responses. Not-found conditions never reveal
/// whether a file exists under a different application.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("application not found")]
    AppNotFound,

    #[error("application is inactive")]
    AppInactive,

    #[error("file not found")]
    FileNotFound,

    #[error("file already exists")]
    FileAlreadyExists,

    #[error("unauthorized file access")]
    UnauthorizedFileAccess,

    #[error("administrator privileges required")]
    AdminRequired,

    #[error("failed to read input: {0}")]
    ReadFailed(String),

    #[error("file is empty")]
    FileEmpty,

    #[error("hash mismatch after decryption")]
    HashMismatch,

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("KMS export failed: {0}")]
    KmsExportFailed(String),

    #[error("KMS key generation failed: {0}")]
    KmsGenerateFailed(String),

    #[error("encryption failed: {0}")]
    EncryptFailed(String),

    #[error("decryption failed: {0}")]
    DecryptFailed(String),

    #[error("record has neither a wrapped key nor a KMS key UID")]
    UnreadableRecord,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("KMS error: {0}")]
    Kms(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// True for errors the caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::KeyGenerationFailed(_)
                | GatewayError::KmsExportFailed(_)
                | GatewayError::KmsGenerateFailed(_)
                | GatewayError::Storage(_)
                | GatewayError::Database(_)
                | GatewayError::Kms(_)
        )
    }

    /// Stable short name, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput(_) => "invalid_input",
            GatewayError::AppNotFound => "app_not_found",
            GatewayError::AppInactive => "app_inactive",
            GatewayError::FileNotFound => "file_not_found",
            GatewayError::FileAlreadyExists => "file_already_exists",
            GatewayError::UnauthorizedFileAccess => "unauthorized_file_access",
            GatewayError::AdminRequired => "admin_required",
            GatewayError::ReadFailed(_) => "read_failed",
            GatewayError::FileEmpty => "file_empty",
            GatewayError::HashMismatch => "hash_mismatch",
            GatewayError::KeyGenerationFailed(_) => "key_generation_failed",
            GatewayError::KmsExportFailed(_) => "kms_export_failed",
            GatewayError::KmsGenerateFailed(_) => "kms_generate_failed",
            GatewayError::EncryptFailed(_) => "encrypt_failed",
            GatewayError::DecryptFailed(_) => "decrypt_failed",
            GatewayError::UnreadableRecord => "unreadable_record",
            GatewayError::Storage(_) => "storage",
            GatewayError::Database(_) => "database",
            GatewayError::Kms(_) => "kms",
            GatewayError::Config(_) => "config",
            GatewayError::Io(_) => "io",
            GatewayError::Other(_) => "other",
        }
    }
}
