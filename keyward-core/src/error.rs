use thiserror::Error;

/// Errors surfaced by the core. Cloneable so a coalesced fetch can hand the
/// same failure to every waiter.
#[derive(Debug, Clone, Error)]
pub enum KeywardError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user already exists: {0}")]
    UserExists(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to acquire lock {name}: {reason}")]
    LockAcquisitionFailed { name: String, reason: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl KeywardError {
    /// Transient server-side failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KeywardError::LockAcquisitionFailed { .. } | KeywardError::Store(_)
        )
    }
}

impl From<redis::RedisError> for KeywardError {
    fn from(error: redis::RedisError) -> Self {
        KeywardError::Store(error.to_string())
    }
}

impl From<std::io::Error> for KeywardError {
    fn from(error: std::io::Error) -> Self {
        KeywardError::Internal(format!("io: {}", error))
    }
}

pub type Result<T> = std::result::Result<T, KeywardError>;
