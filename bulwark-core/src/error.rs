use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Account verifier error: {0}")]
    Verifier(String),
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// Another writer touched the same counter row at the same time.
    ///
    /// Services retry this internally; callers only see it once the retry
    /// budget is exhausted.
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    NonPositive(&'static str),

    #[error("lockout cap ({cap}s) must not be shorter than the base ({base}s)")]
    CapBelowBase { base: i64, cap: i64 },

    #[error("duplicate throttle rule for endpoint: {0}")]
    DuplicateRule(String),

    #[error("invalid endpoint name: {0}")]
    InvalidEndpoint(String),
}

impl Error {
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Whether the operation lost a race and may succeed if repeated.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Storage(StorageError::Conflict(_)))
    }
}
