//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account rows (key: account_id)
//! - `transactions` - Immutable transactions (key: transaction id)
//! - `references` - Unique reference index (key: reference, value: transaction id)
//! - `account_history` - Per-account commit order (key: u32 len || account_id || version)
//! - `vouchers`, `topups`, `offers`, `audit` - Workflow records owned by the wallet layer
//!
//! Every mutation is one `WriteBatch`. A [`LedgerWrite`] carries the balance
//! postings of one operation (both legs of a transfer) plus guarded workflow
//! record writes, so a status flip and the ledger movement it causes commit
//! together or not at all.

use crate::{
    error::{Error, Result},
    locks::LockStripes,
    types::{Account, AccountId, Amount, Transaction},
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_TRANSACTIONS: &str = "transactions";
const CF_REFERENCES: &str = "references";
const CF_HISTORY: &str = "account_history";
const CF_VOUCHERS: &str = "vouchers";
const CF_TOPUPS: &str = "topups";
const CF_OFFERS: &str = "offers";
const CF_AUDIT: &str = "audit";

/// Workflow record tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordTable {
    /// Voucher codes
    Vouchers,
    /// Top-up requests
    TopUps,
    /// Trade offers
    Offers,
    /// Admin adjustment audit log
    Audit,
}

impl RecordTable {
    fn cf_name(&self) -> &'static str {
        match self {
            RecordTable::Vouchers => CF_VOUCHERS,
            RecordTable::TopUps => CF_TOPUPS,
            RecordTable::Offers => CF_OFFERS,
            RecordTable::Audit => CF_AUDIT,
        }
    }
}

impl fmt::Display for RecordTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cf_name())
    }
}

/// Condition a record must satisfy at commit time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Key must not exist yet
    Absent,
    /// Stored bytes must equal what the caller read
    Equals(Vec<u8>),
}

/// Guarded write of one workflow record
#[derive(Debug, Clone)]
pub struct RecordWrite {
    /// Target table
    pub table: RecordTable,
    /// Record key
    pub key: String,
    /// Serialized new value
    pub value: Vec<u8>,
    /// Commit-time guard
    pub precondition: Precondition,
}

impl RecordWrite {
    /// Insert a record that must not exist yet
    pub fn insert<T: Serialize>(table: RecordTable, key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self {
            table,
            key: key.into(),
            value: bincode::serialize(value)?,
            precondition: Precondition::Absent,
        })
    }

    /// Replace a record, only if it is still exactly as it was read
    pub fn update<T: Serialize>(
        table: RecordTable,
        key: impl Into<String>,
        prior: &StoredRecord<T>,
        value: &T,
    ) -> Result<Self> {
        Ok(Self {
            table,
            key: key.into(),
            value: bincode::serialize(value)?,
            precondition: Precondition::Equals(prior.raw.clone()),
        })
    }

    fn lock_key(&self) -> String {
        format!("{}:{}", self.table, self.key)
    }
}

/// Record as read from storage, with the raw bytes for compare-and-set
#[derive(Debug, Clone)]
pub struct StoredRecord<T> {
    /// Decoded value
    pub value: T,
    /// Bytes as stored
    pub raw: Vec<u8>,
}

/// Balance posting: one transaction applied to its account
#[derive(Debug, Clone)]
pub struct Posting {
    /// Account version the posting was computed against
    pub expected_version: u64,
    /// Transaction to record (its signed amount is the balance delta)
    pub transaction: Transaction,
}

/// One atomic unit of work
#[derive(Debug, Clone, Default)]
pub struct LedgerWrite {
    /// Balance postings, at most one per account
    pub postings: Vec<Posting>,
    /// Guarded workflow record writes
    pub records: Vec<RecordWrite>,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    locks: LockStripes,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_REFERENCES, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_HISTORY, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_VOUCHERS, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_TOPUPS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_OFFERS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_AUDIT, Self::cf_options_cold()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, stripes = config.locks.stripes, "Opened wallet ledger store");

        Ok(Self {
            db,
            locks: LockStripes::new(config.locks.stripes),
        })
    }

    // Column family options

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_cold() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Accounts

    /// Create an account, or return the existing one
    pub fn create_account(&self, account_id: &AccountId, now: DateTime<Utc>) -> Result<Account> {
        let lock_key = Self::account_lock_key(account_id);
        let _guards = self.locks.acquire(&[lock_key]);

        if let Some(existing) = self.read_account(account_id)? {
            return Ok(existing);
        }

        let account = Account::new(account_id.clone(), now);
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        self.db
            .put_cf(cf, account_id.as_str().as_bytes(), bincode::serialize(&account)?)?;

        tracing::info!(account_id = %account_id, "Account opened");
        Ok(account)
    }

    /// Get account by ID
    pub fn get_account(&self, account_id: &AccountId) -> Result<Account> {
        self.read_account(account_id)?
            .ok_or_else(|| Error::AccountNotFound(account_id.clone()))
    }

    fn read_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, account_id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    // Transactions

    /// Get transaction by idempotency reference
    pub fn get_transaction(&self, reference: &str) -> Result<Option<Transaction>> {
        let cf = self.cf_handle(CF_REFERENCES)?;
        let id_bytes = match self.db.get_cf(cf, reference.as_bytes())? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let id = Uuid::from_slice(&id_bytes)
            .map_err(|e| Error::Storage(format!("Corrupt reference index for {}: {}", reference, e)))?;
        self.get_transaction_by_id(id).map(Some)
    }

    /// Get transaction by ID
    pub fn get_transaction_by_id(&self, id: Uuid) -> Result<Transaction> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let value = self
            .db
            .get_cf(cf, id.as_bytes())?
            .ok_or_else(|| Error::TransactionNotFound(id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Account transactions, newest first
    pub fn account_history(
        &self,
        account_id: &AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let cf = self.cf_handle(CF_HISTORY)?;
        let prefix = Self::history_prefix(account_id);
        let start = Self::history_key(account_id, u64::MAX);

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(start.as_slice(), Direction::Reverse));

        let mut transactions = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if limit.map_or(false, |max| transactions.len() >= max) {
                break;
            }

            let id = Uuid::from_slice(&value)
                .map_err(|e| Error::Storage(format!("Corrupt history index: {}", e)))?;
            transactions.push(self.get_transaction_by_id(id)?);
        }

        Ok(transactions)
    }

    // Workflow records

    /// Get a workflow record
    pub fn get_record<T: DeserializeOwned>(
        &self,
        table: RecordTable,
        key: &str,
    ) -> Result<Option<StoredRecord<T>>> {
        let cf = self.cf_handle(table.cf_name())?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(raw) => Ok(Some(StoredRecord {
                value: bincode::deserialize(&raw)?,
                raw,
            })),
            None => Ok(None),
        }
    }

    /// All records of a table, in key order
    pub fn scan_records<T: DeserializeOwned>(&self, table: RecordTable) -> Result<Vec<StoredRecord<T>>> {
        let cf = self.cf_handle(table.cf_name())?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, raw) = item?;
            let raw = raw.to_vec();
            records.push(StoredRecord {
                value: bincode::deserialize(&raw)?,
                raw,
            });
        }
        Ok(records)
    }

    /// Commit workflow records without touching any balance
    pub fn put_records(&self, records: Vec<RecordWrite>) -> Result<()> {
        self.commit(LedgerWrite {
            postings: Vec::new(),
            records,
        })
        .map(|_| ())
    }

    // Atomic commit

    /// Apply one atomic unit (all-or-nothing)
    ///
    /// Under the stripe locks of every touched key, re-validates:
    /// reference uniqueness, account existence and version, non-negative
    /// resulting balances, and every record precondition. Returns the
    /// updated accounts in posting order.
    pub fn commit(&self, write: LedgerWrite) -> Result<Vec<Account>> {
        Self::check_distinct(&write.postings)?;

        let mut lock_keys: Vec<String> = write.records.iter().map(RecordWrite::lock_key).collect();
        for posting in &write.postings {
            lock_keys.push(Self::account_lock_key(&posting.transaction.account_id));
            lock_keys.push(format!("reference:{}", posting.transaction.reference));
        }
        let _guards = self.locks.acquire(&lock_keys);

        let mut batch = WriteBatch::default();

        let mut updated = Vec::with_capacity(write.postings.len());
        for posting in &write.postings {
            updated.push(self.stage_posting(&mut batch, posting)?);
        }

        for record in &write.records {
            let cf = self.cf_handle(record.table.cf_name())?;
            let current = self.db.get_cf(cf, record.key.as_bytes())?;
            let satisfied = match (&record.precondition, &current) {
                (Precondition::Absent, None) => true,
                (Precondition::Equals(expected), Some(actual)) => expected == actual,
                _ => false,
            };
            if !satisfied {
                return Err(Error::PreconditionFailed {
                    table: record.table,
                    key: record.key.clone(),
                });
            }
            batch.put_cf(cf, record.key.as_bytes(), &record.value);
        }

        // Atomic commit
        self.db.write(batch)?;

        for posting in &write.postings {
            tracing::debug!(
                transaction_id = %posting.transaction.id,
                account_id = %posting.transaction.account_id,
                reference = %posting.transaction.reference,
                records = write.records.len(),
                "Posting committed"
            );
        }

        Ok(updated)
    }

    fn check_distinct(postings: &[Posting]) -> Result<()> {
        for (i, posting) in postings.iter().enumerate() {
            let txn = &posting.transaction;
            for other in &postings[i + 1..] {
                if other.transaction.account_id == txn.account_id {
                    return Err(Error::InvalidEntry(format!(
                        "account {} posted twice in one unit",
                        txn.account_id
                    )));
                }
                if other.transaction.reference == txn.reference {
                    return Err(Error::DuplicateReference(txn.reference.clone()));
                }
            }
        }
        Ok(())
    }

    fn stage_posting(&self, batch: &mut WriteBatch, posting: &Posting) -> Result<Account> {
        let txn = &posting.transaction;

        let cf_refs = self.cf_handle(CF_REFERENCES)?;
        if self.db.get_cf(cf_refs, txn.reference.as_bytes())?.is_some() {
            return Err(Error::DuplicateReference(txn.reference.clone()));
        }

        let mut account = self.get_account(&txn.account_id)?;
        if account.version != posting.expected_version {
            return Err(Error::VersionConflict {
                account_id: account.account_id,
                expected: posting.expected_version,
                actual: account.version,
            });
        }

        let delta = i64::try_from(txn.signed_amount())
            .map_err(|_| Error::InvalidAmount(format!("amount {} exceeds ledger range", txn.amount)))?;
        let new_balance = account
            .balance
            .apply_delta(delta)
            .ok_or_else(|| Error::InsufficientBalance {
                account_id: account.account_id.clone(),
                balance: account.balance,
                requested: txn.amount,
            })?;
        if new_balance != txn.balance_after {
            return Err(Error::InvalidEntry(format!(
                "transaction {} computed balance {} but commit yields {}",
                txn.id, txn.balance_after, new_balance
            )));
        }

        account.balance = new_balance;
        account.version += 1;
        account.updated_at = txn.created_at;

        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        batch.put_cf(
            cf_accounts,
            account.account_id.as_str().as_bytes(),
            bincode::serialize(&account)?,
        );

        let cf_txns = self.cf_handle(CF_TRANSACTIONS)?;
        batch.put_cf(cf_txns, txn.id.as_bytes(), bincode::serialize(txn)?);

        batch.put_cf(cf_refs, txn.reference.as_bytes(), txn.id.as_bytes());

        let cf_history = self.cf_handle(CF_HISTORY)?;
        let history_key = Self::history_key(&account.account_id, account.version);
        batch.put_cf(cf_history, &history_key, txn.id.as_bytes());

        Ok(account)
    }

    // Key helpers

    fn account_lock_key(account_id: &AccountId) -> String {
        format!("account:{}", account_id)
    }

    fn history_prefix(account_id: &AccountId) -> Vec<u8> {
        let id = account_id.as_str().as_bytes();
        let mut key = Vec::with_capacity(4 + id.len() + 8);
        key.extend_from_slice(&(id.len() as u32).to_be_bytes());
        key.extend_from_slice(id);
        key
    }

    fn history_key(account_id: &AccountId, version: u64) -> Vec<u8> {
        let mut key = Self::history_prefix(account_id);
        key.extend_from_slice(&version.to_be_bytes());
        key
    }

    /// Total balance across all accounts (reconciliation aid)
    pub fn total_balance(&self) -> Result<u128> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut total = 0u128;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let account: Account = bincode::deserialize(&value)?;
            total += account.balance.minor() as u128;
        }
        Ok(total)
    }

    /// Current balance of an account
    pub fn balance_of(&self, account_id: &AccountId) -> Result<Amount> {
        self.get_account(account_id).map(|a| a.balance)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("locks", &self.locks)
            .finish()
    }
}
