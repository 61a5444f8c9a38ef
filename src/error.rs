use thiserror::Error;

/// Errors produced by the lifecycle engine.
///
/// Every variant except [`LifecycleError::StorageError`] is a deterministic outcome of
/// business-rule evaluation and must not be retried by the caller.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid transition: cannot {action} {entity} in status {from}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },
    #[error("Already processed: {0}")]
    AlreadyProcessed(String),
    #[error("Amount mismatch: {0}")]
    AmountMismatch(String),
    #[error("Storage error: {0}")]
    StorageError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

impl LifecycleError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        action: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            action,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError(Box::new(std::io::Error::other(message.into())))
    }

    /// Only persistence failures are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageError(_))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LifecycleError {
    fn from(err: rocksdb::Error) -> Self {
        Self::StorageError(Box::new(err))
    }
}

impl From<serde_json::Error> for LifecycleError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
