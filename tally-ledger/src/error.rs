use thiserror::Error;

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error type surfaced by ledger operations.
///
/// `Validation` rejections happen before any mutation. `DataIntegrity` means
/// a computation needed data that is structurally absent and must never be
/// defaulted away. `StateConflict` rejections leave the store untouched.
/// Every message names the offending record so callers can present an
/// actionable reason.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),
    #[error("state conflict: {0}")]
    StateConflict(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(value: std::io::Error) -> Self {
        Self::Storage(value.to_string())
    }
}
