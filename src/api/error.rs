/// Errors from the REST API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid PIN ({} attempts remaining)", count_or(.remaining_attempts, "unknown"))]
    InvalidPin { remaining_attempts: Option<u32> },

    #[error("Too many failed attempts, locked for {} seconds", count_or(.retry_after_secs, "some"))]
    LockedOut { retry_after_secs: Option<u64> },

    /// Quota, size or count limit hit; dismissable, never fatal
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

fn count_or<T: ToString>(value: &Option<T>, fallback: &str) -> String {
    value
        .as_ref()
        .map(|n| n.to_string())
        .unwrap_or_else(|| fallback.to_string())
}

impl ApiError {
    /// Whether the user can simply dismiss this and carry on
    pub fn is_dismissable(&self) -> bool {
        matches!(self, ApiError::LimitExceeded(_))
    }
}
