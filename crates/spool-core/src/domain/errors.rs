//! Errors surfaced by the queue engine.
//!
//! Classification:
//! - `DuplicateKey`, `SelfDependency`, `DependencyCycle`: the producer sent a bad row; retrying won't help.
//! - `NotFound`: a disposition matched nothing (already committed, recovered, or never issued).
//! - `StorageUnavailable`: the transaction failed and was rolled back; retry the whole cycle.
//! - `Configuration`: a call argument or config value was rejected before touching storage.
//! - `CorruptRow`: a stored column could not be decoded into its typed form.
//! - `Blocking`: the thread running a synchronous call from async code panicked or was cancelled.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("no reserved rows matched token {token}")]
    NotFound { token: String },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] rusqlite::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("item {0} cannot depend on itself")]
    SelfDependency(String),

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("blocking task failed: {0}")]
    Blocking(String),
}

impl QueueError {
    /// Transient failures where retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::StorageUnavailable(_))
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == ErrorCode::ConstraintViolation
                    && matches!(
                        code.extended_code,
                        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                            | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    ) =>
            {
                QueueError::DuplicateKey(
                    message.unwrap_or_else(|| "unique constraint violated".to_string()),
                )
            }
            err @ (rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)) => {
                QueueError::CorruptRow(err.to_string())
            }
            err => QueueError::StorageUnavailable(err),
        }
    }
}
