use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeltashipError>;

#[derive(Debug, Error)]
pub enum DeltashipError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid manifest '{path}': {message}")]
    ManifestFormat { path: String, message: String },

    #[error("patch generation failed for '{path}': {detail}")]
    PatchGenerationFailed { path: String, detail: String },

    #[error("transfer of '{label}' failed after {attempts} attempt(s): {message}")]
    TransferFailed {
        label: String,
        attempts: u32,
        message: String,
    },

    #[error(
        "rate limit on '{label}' asks for a {wait_secs}s wait, above the {ceiling_secs}s ceiling"
    )]
    RateLimitExceeded {
        label: String,
        wait_secs: u64,
        ceiling_secs: u64,
    },

    #[error("rate limit on '{label}' persisted through {waits} waits; giving up")]
    RateLimitWaitsExhausted { label: String, waits: u32 },

    #[error("integrity mismatch for '{path}': expected {expected}, got {actual}")]
    IntegrityMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error(
        "HTTP {status}: {message}{}",
        .retry_after.as_ref().map(|v| format!(" (retry-after: {v})")).unwrap_or_default()
    )]
    Http {
        status: u16,
        message: String,
        retry_after: Option<String>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store does not support bulk transfer")]
    BulkUnsupported,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DeltashipError {
    pub fn manifest(path: impl Into<String>, message: impl Into<String>) -> Self {
        DeltashipError::ManifestFormat {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same operation can never succeed.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            DeltashipError::RateLimitExceeded { .. }
                | DeltashipError::RateLimitWaitsExhausted { .. }
                | DeltashipError::Config(_)
                | DeltashipError::ManifestFormat { .. }
                | DeltashipError::BulkUnsupported
        )
    }
}
