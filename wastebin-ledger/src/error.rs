//! Error types for the ledger

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced bin does not exist
    #[error("Bin not found: {0}")]
    BinNotFound(Uuid),

    /// Referenced user does not exist
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Malformed or out-of-range input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Redemption or debit exceeds the available points
    #[error("Insufficient balance: {available} points available, {required} required")]
    InsufficientBalance {
        /// Points held by the user
        available: u64,
        /// Points the operation needs
        required: u64,
    },

    /// Deposit would overfill the bin
    #[error("Capacity exceeded: bin holds {current} of {capacity}, deposit of {requested} rejected")]
    CapacityExceeded {
        /// Bin capacity
        capacity: Decimal,
        /// Weight already in the bin
        current: Decimal,
        /// Weight of the rejected deposit
        requested: Decimal,
    },

    /// Entity lock could not be acquired in time
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Idempotency key already used for a different request
    #[error("Idempotency key reused: {0}")]
    IdempotencyKeyReused(String),

    /// Unique key already taken
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Credential check failed
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Storage error (RocksDB)
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential hashing failed
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced bin or user does not exist
    NotFound,
    /// Malformed or out-of-range input
    InvalidInput,
    /// Not enough points
    InsufficientBalance,
    /// Bin would overflow
    CapacityExceeded,
    /// Retry or pick another key
    Conflict,
    /// Transient infrastructure failure
    StorageUnavailable,
    /// Credential mismatch
    Unauthorized,
    /// Misconfiguration
    Internal,
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BinNotFound(_) | Error::UserNotFound(_) => ErrorKind::NotFound,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Error::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Error::Conflict(_) | Error::IdempotencyKeyReused(_) | Error::AlreadyExists(_) => {
                ErrorKind::Conflict
            }
            Error::StorageUnavailable(_) | Error::Serialization(_) | Error::Io(_) => {
                ErrorKind::StorageUnavailable
            }
            Error::InvalidCredentials => ErrorKind::Unauthorized,
            Error::Config(_) | Error::PasswordHash(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Conflict(_) | Error::StorageUnavailable(_) | Error::Io(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::StorageUnavailable(err.to_string())
    }
}
