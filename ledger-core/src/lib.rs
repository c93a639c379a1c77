//! Wallet Ledger Core
//!
//! Single-currency wallet ledger: accounts, immutable transactions and the
//! engine that moves balances between them.
//!
//! # Architecture
//!
//! - **Balance as projection**: an account balance always equals the sum of
//!   its completed transactions
//! - **Atomic units**: a posting and the workflow records it depends on
//!   commit in one RocksDB `WriteBatch`
//! - **Optimistic versioning**: commits are guarded by the account version
//!   and retried on conflict
//! - **Idempotency**: every posting carries a unique reference, replays
//!   return the original transaction
//!
//! # Invariants
//!
//! - Balances never go negative
//! - A reference is applied at most once
//! - Transactions are never modified or deleted
//! - A transfer is never observed half-applied

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod locks;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::{Entry, Posted, Reconciliation, TransactionEngine, Transfer, TransferRequest};
pub use error::{Error, Result};
pub use events::{BalanceChanged, EventBus};
pub use storage::{Precondition, RecordTable, RecordWrite, Storage, StoredRecord};
pub use types::{
    Account, AccountId, Amount, Direction, Transaction, TransactionStatus, TransactionType,
};
