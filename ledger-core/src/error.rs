//! Error types for the ledger

use crate::storage::RecordTable;
use crate::types::{AccountId, Amount};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Transaction does not exist
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Debit larger than the available balance
    #[error("Insufficient balance on {account_id}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        /// Account that would go negative
        account_id: AccountId,
        /// Balance at check time
        balance: Amount,
        /// Requested debit
        requested: Amount,
    },

    /// Reference already applied (success-no-op for the same account)
    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    /// Account version moved between read and commit (retried internally)
    #[error("Version conflict on {account_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Contended account
        account_id: AccountId,
        /// Version read before commit
        expected: u64,
        /// Version found at commit
        actual: u64,
    },

    /// Optimistic retries exhausted
    #[error("Concurrent modification of {account_id} after {attempts} attempts")]
    ConcurrentModification {
        /// Contended account
        account_id: AccountId,
        /// Attempts made
        attempts: u32,
    },

    /// A workflow record changed between read and commit
    #[error("Precondition failed for {table} record {key}")]
    PreconditionFailed {
        /// Record table
        table: RecordTable,
        /// Record key
        key: String,
    },

    /// Invalid amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid ledger entry
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::AccountNotFound(_) => "account_not_found",
            Error::TransactionNotFound(_) => "transaction_not_found",
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::DuplicateReference(_) => "duplicate_reference",
            Error::VersionConflict { .. } => "version_conflict",
            Error::ConcurrentModification { .. } => "concurrent_modification",
            Error::PreconditionFailed { .. } => "precondition_failed",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::InvalidEntry(_) => "invalid_entry",
            Error::Config(_) => "config",
            Error::Metrics(_) => "metrics",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
