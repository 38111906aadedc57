//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Business-rule rejection; never auto-retried
    #[error("insufficient balance on account {account_id}: have {balance}, need {requested}")]
    InsufficientBalance {
        /// Account the operation targeted
        account_id: String,
        /// Balance at the time of the attempt
        balance: i64,
        /// Chips the operation would have removed
        requested: i64,
    },

    /// Transient contention; safe to re-issue with the same idempotency key
    #[error("version conflict on account {account_id} persisted after {attempts} attempts")]
    ConflictExceededRetries {
        /// Account under contention
        account_id: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Account not found
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// Account already exists
    #[error("account already exists: {0}")]
    AccountExists(String),

    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Reward not found
    #[error("reward not found: {0}")]
    RewardNotFound(String),

    /// Zero or otherwise nonsensical amount
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Storage infrastructure fault (RocksDB); retryable with backoff
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl Error {
    /// Whether a caller may safely re-issue the operation (with the same
    /// idempotency key) after backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConflictExceededRetries { .. } | Error::StoreUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let conflict = Error::ConflictExceededRetries {
            account_id: "child-emma".to_string(),
            attempts: 5,
        };
        assert!(conflict.is_retryable());
        assert!(Error::StoreUnavailable("disk".to_string()).is_retryable());

        let insufficient = Error::InsufficientBalance {
            account_id: "child-emma".to_string(),
            balance: 4,
            requested: 6,
        };
        assert!(!insufficient.is_retryable());
        assert!(!Error::AccountNotFound("x".to_string()).is_retryable());
    }
}
