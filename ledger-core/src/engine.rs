//! Transaction engine
//!
//! The only writer of account balances. Every balance-affecting operation
//! goes through one unit commit:
//!
//! 1. Reference already applied → return the prior transaction (replay)
//! 2. Debit larger than the balance → `InsufficientBalance`, nothing written
//! 3. Commit transactions + balances in one unit, guarded by the account
//!    versions (retried on conflict up to `engine.max_retries`)
//! 4. Publish `balance_changed`
//!
//! Two-account moves commit the debit leg and the credit leg in the same
//! unit, so a transfer is never observed half-applied. Storage calls run on
//! the blocking pool.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{AccountId, Amount, Config, Entry, TransactionEngine, TransactionType};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let engine = TransactionEngine::open(&Config::default())?;
//!     let alice = AccountId::new("alice");
//!     engine.open_account(&alice).await?;
//!
//!     let entry = Entry::credit(alice, Amount::from_minor(500), TransactionType::Topup, "topup-1")?;
//!     let txn = engine.apply(entry).await?;
//!     println!("balance after: {}", txn.balance_after);
//!     Ok(())
//! }
//! ```

use crate::{
    config::EngineConfig,
    events::{BalanceChanged, EventBus},
    metrics::Metrics,
    storage::{LedgerWrite, Posting, RecordTable, RecordWrite, Storage, StoredRecord},
    types::{
        Account, AccountId, Amount, Direction, Transaction, TransactionStatus, TransactionType,
    },
    Config, Error, Result,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

/// Attempts at reading a consistent account snapshot for reconciliation
const RECONCILE_ATTEMPTS: u32 = 3;

/// Balance-affecting operation
#[derive(Debug, Clone)]
pub struct Entry {
    /// Account to post to
    pub account_id: AccountId,
    /// Positive credits, negative debits
    pub signed_amount: i64,
    /// Transaction type
    pub tx_type: TransactionType,
    /// Idempotency key
    pub reference: String,
    /// Human-readable description
    pub description: String,
    /// Other side of a two-account move
    pub counterparty: Option<AccountId>,
    /// Optional fee annotation
    pub fee: Option<Amount>,
}

impl Entry {
    /// Entry with an explicit signed amount
    pub fn new(
        account_id: AccountId,
        signed_amount: i64,
        tx_type: TransactionType,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            signed_amount,
            tx_type,
            reference: reference.into(),
            description: tx_type.as_str().to_string(),
            counterparty: None,
            fee: None,
        }
    }

    /// Credit `amount`
    pub fn credit(
        account_id: AccountId,
        amount: Amount,
        tx_type: TransactionType,
        reference: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self::new(account_id, amount.as_credit()?, tx_type, reference))
    }

    /// Debit `amount`
    pub fn debit(
        account_id: AccountId,
        amount: Amount,
        tx_type: TransactionType,
        reference: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self::new(account_id, amount.as_debit()?, tx_type, reference))
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set counterparty
    pub fn with_counterparty(mut self, counterparty: AccountId) -> Self {
        self.counterparty = Some(counterparty);
        self
    }

    /// Set fee annotation
    pub fn with_fee(mut self, fee: Amount) -> Self {
        self.fee = Some(fee);
        self
    }

    fn amount(&self) -> Amount {
        Amount::from_minor(self.signed_amount.unsigned_abs())
    }

    fn direction(&self) -> Direction {
        if self.signed_amount < 0 {
            Direction::Debit
        } else {
            Direction::Credit
        }
    }

    fn validate(&self) -> Result<()> {
        if self.signed_amount == 0 {
            return Err(Error::InvalidAmount("amount must be non-zero".to_string()));
        }
        if self.reference.trim().is_empty() {
            return Err(Error::InvalidEntry("reference must not be empty".to_string()));
        }
        if !self.account_id.is_valid() {
            return Err(Error::InvalidEntry(format!(
                "account id must be non-empty and at most {} bytes",
                AccountId::MAX_LEN
            )));
        }
        Ok(())
    }

    /// Completed transaction against the account as read
    fn prepare(&self, account: &Account) -> Result<Transaction> {
        let balance_after = match account.balance.apply_delta(self.signed_amount) {
            Some(balance) => balance,
            None if self.signed_amount < 0 => {
                return Err(Error::InsufficientBalance {
                    account_id: account.account_id.clone(),
                    balance: account.balance,
                    requested: self.amount(),
                })
            }
            None => {
                return Err(Error::InvalidAmount(format!(
                    "credit of {} overflows balance {}",
                    self.amount(),
                    account.balance
                )))
            }
        };

        Ok(Transaction {
            id: Uuid::now_v7(),
            account_id: self.account_id.clone(),
            tx_type: self.tx_type,
            direction: self.direction(),
            amount: self.amount(),
            fee: self.fee,
            status: TransactionStatus::Completed,
            counterparty_account_id: self.counterparty.clone(),
            reference: self.reference.clone(),
            description: self.description.clone(),
            balance_after,
            created_at: Utc::now(),
        })
    }
}

/// Result of an apply call
#[derive(Debug, Clone)]
pub struct Posted {
    /// The committed (or previously committed) transaction
    pub transaction: Transaction,
    /// Account balance after the call
    pub new_balance: Amount,
    /// True when answered from an existing reference without writing
    pub replayed: bool,
}

/// Wallet-to-wallet move
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Paying account
    pub from: AccountId,
    /// Receiving account
    pub to: AccountId,
    /// Amount moved
    pub amount: Amount,
    /// Type of the debit leg
    pub debit_type: TransactionType,
    /// Type of the credit leg
    pub credit_type: TransactionType,
    /// Shared reference prefix of both legs
    pub reference: String,
    /// Description on both legs
    pub description: String,
}

impl TransferRequest {
    /// Plain transfer (`transfer_out` / `transfer_in`)
    pub fn new(from: AccountId, to: AccountId, amount: Amount, reference: impl Into<String>) -> Self {
        Self {
            from,
            to,
            amount,
            debit_type: TransactionType::TransferOut,
            credit_type: TransactionType::TransferIn,
            reference: reference.into(),
            description: "wallet transfer".to_string(),
        }
    }

    /// Use the same type on both legs
    pub fn with_type(mut self, tx_type: TransactionType) -> Self {
        self.debit_type = tx_type;
        self.credit_type = tx_type;
        self
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn debit_reference(&self) -> String {
        format!("{}:debit", self.reference)
    }

    fn credit_reference(&self) -> String {
        format!("{}:credit", self.reference)
    }

    fn validate(&self) -> Result<()> {
        if self.amount.is_zero() {
            return Err(Error::InvalidAmount("transfer amount must be positive".to_string()));
        }
        if self.from == self.to {
            return Err(Error::InvalidEntry(format!(
                "cannot transfer from {} to itself",
                self.from
            )));
        }
        if self.reference.trim().is_empty() {
            return Err(Error::InvalidEntry("reference must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Both legs of a completed transfer
#[derive(Debug, Clone)]
pub struct Transfer {
    /// Sender side
    pub debit: Posted,
    /// Receiver side
    pub credit: Posted,
}

/// Stored balance versus the balance implied by history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Account checked
    pub account_id: AccountId,
    /// Balance on the account row
    pub stored_balance: Amount,
    /// Sum of completed transactions
    pub computed_balance: i128,
    /// Transactions inspected
    pub transaction_count: usize,
}

impl Reconciliation {
    /// Balance equals history
    pub fn is_consistent(&self) -> bool {
        self.stored_balance.minor() as i128 == self.computed_balance
    }
}

/// Transaction engine
#[derive(Debug)]
pub struct TransactionEngine {
    storage: Arc<Storage>,
    events: EventBus,
    metrics: Metrics,
    config: EngineConfig,
}

impl TransactionEngine {
    /// Create engine over an open store
    pub fn new(storage: Arc<Storage>, config: EngineConfig) -> Result<Self> {
        Ok(Self {
            storage,
            events: EventBus::new(config.event_channel_capacity),
            metrics: Metrics::new()?,
            config,
        })
    }

    /// Open store and engine from configuration
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(Storage::open(config)?);
        Self::new(storage, config.engine.clone())
    }

    /// Underlying store (synchronous access)
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Subscribe to `balance_changed` events
    pub fn subscribe(&self) -> broadcast::Receiver<BalanceChanged> {
        self.events.subscribe()
    }

    /// Run a storage call on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        task::spawn_blocking(move || op(&storage))
            .await
            .map_err(|e| Error::Storage(format!("storage task failed: {}", e)))?
    }

    /// Open an account (no-op if it exists)
    pub async fn open_account(&self, account_id: &AccountId) -> Result<Account> {
        if !account_id.is_valid() {
            return Err(Error::InvalidEntry(format!(
                "account id must be non-empty and at most {} bytes",
                AccountId::MAX_LEN
            )));
        }
        let account_id = account_id.clone();
        self.blocking(move |storage| storage.create_account(&account_id, Utc::now()))
            .await
    }

    /// Current account state
    pub async fn account(&self, account_id: &AccountId) -> Result<Account> {
        let account_id = account_id.clone();
        self.blocking(move |storage| storage.get_account(&account_id)).await
    }

    /// Transaction by reference
    pub async fn transaction(&self, reference: &str) -> Result<Option<Transaction>> {
        let reference = reference.to_string();
        self.blocking(move |storage| storage.get_transaction(&reference)).await
    }

    /// Transaction by id
    pub async fn transaction_by_id(&self, id: Uuid) -> Result<Transaction> {
        self.blocking(move |storage| storage.get_transaction_by_id(id)).await
    }

    /// Account transactions, newest first
    pub async fn history(&self, account_id: &AccountId, limit: Option<usize>) -> Result<Vec<Transaction>> {
        let account_id = account_id.clone();
        self.blocking(move |storage| storage.account_history(&account_id, limit))
            .await
    }

    /// Workflow record by key
    pub async fn record<T>(&self, table: RecordTable, key: &str) -> Result<Option<StoredRecord<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.to_string();
        self.blocking(move |storage| storage.get_record(table, &key)).await
    }

    /// All workflow records of a table, in key order
    pub async fn records<T>(&self, table: RecordTable) -> Result<Vec<StoredRecord<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.blocking(move |storage| storage.scan_records(table)).await
    }

    /// Commit workflow records without touching any balance
    pub async fn put_records(&self, records: Vec<RecordWrite>) -> Result<()> {
        self.blocking(move |storage| storage.put_records(records)).await
    }

    /// Apply a single entry
    pub async fn apply(&self, entry: Entry) -> Result<Transaction> {
        self.post(entry).await.map(|posted| posted.transaction)
    }

    /// Apply a single entry, reporting balance and replay status
    pub async fn post(&self, entry: Entry) -> Result<Posted> {
        self.apply_atomic(entry, |_| Ok(Vec::new())).await
    }

    /// Apply an entry together with workflow record writes
    ///
    /// `attach` builds the records from the prepared transaction and runs again
    /// on every retry. The records only land if the posting lands. A replay
    /// writes nothing and returns `replayed = true`.
    pub async fn apply_atomic<F>(&self, entry: Entry, attach: F) -> Result<Posted>
    where
        F: Fn(&Transaction) -> Result<Vec<RecordWrite>> + Send,
    {
        let [posted]: [Posted; 1] = self
            .post_unit(vec![entry], attach)
            .await?
            .try_into()
            .map_err(|_| Error::InvalidEntry("unit did not yield one posting".to_string()))?;
        Ok(posted)
    }

    /// Move credit between two accounts
    pub async fn transfer(&self, request: TransferRequest) -> Result<Transfer> {
        self.transfer_atomic(request, |_| Ok(Vec::new())).await
    }

    /// Move credit between two accounts, committing `attach_credit` records with both legs
    ///
    /// Debit leg, credit leg and attached records are one unit: a failure in
    /// any of them leaves both accounts untouched.
    pub async fn transfer_atomic<F>(&self, request: TransferRequest, attach_credit: F) -> Result<Transfer>
    where
        F: Fn(&Transaction) -> Result<Vec<RecordWrite>> + Send,
    {
        request.validate()?;

        let debit = Entry::debit(
            request.from.clone(),
            request.amount,
            request.debit_type,
            request.debit_reference(),
        )?
        .with_description(request.description.clone())
        .with_counterparty(request.to.clone());

        let credit = Entry::credit(
            request.to.clone(),
            request.amount,
            request.credit_type,
            request.credit_reference(),
        )?
        .with_description(request.description.clone())
        .with_counterparty(request.from.clone());

        match self.post_unit(vec![debit, credit], attach_credit).await {
            Ok(legs) => {
                let [debit, credit]: [Posted; 2] = legs
                    .try_into()
                    .map_err(|_| Error::InvalidEntry("transfer did not yield two legs".to_string()))?;
                Ok(Transfer { debit, credit })
            }
            Err(err) => {
                if !matches!(
                    err,
                    Error::InsufficientBalance { .. }
                        | Error::AccountNotFound(_)
                        | Error::DuplicateReference(_)
                ) {
                    self.metrics.record_transfer_rollback();
                    tracing::warn!(
                        reference = %request.reference,
                        from = %request.from,
                        to = %request.to,
                        amount = %request.amount,
                        error = %err,
                        "Transfer rolled back"
                    );
                }
                Err(err)
            }
        }
    }

    /// Commit entries on distinct accounts as one unit
    ///
    /// Either every reference replays or none of them may exist yet.
    /// `attach` sees the last entry's prepared transaction.
    async fn post_unit<F>(&self, entries: Vec<Entry>, attach: F) -> Result<Vec<Posted>>
    where
        F: Fn(&Transaction) -> Result<Vec<RecordWrite>> + Send,
    {
        for entry in &entries {
            entry.validate()?;
        }
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let references: Vec<String> = entries.iter().map(|e| e.reference.clone()).collect();
            let existing = self
                .blocking(move |storage| {
                    references
                        .iter()
                        .map(|reference| storage.get_transaction(reference))
                        .collect::<Result<Vec<_>>>()
                })
                .await?;
            if existing.iter().any(Option::is_some) {
                return self.replay(&entries, existing).await;
            }

            let ids: Vec<AccountId> = entries.iter().map(|e| e.account_id.clone()).collect();
            let accounts = self.read_accounts(ids).await?;

            let mut postings = Vec::with_capacity(entries.len());
            for (entry, account) in entries.iter().zip(&accounts) {
                postings.push(Posting {
                    expected_version: account.version,
                    transaction: entry.prepare(account)?,
                });
            }
            let records = match postings.last() {
                Some(last) => attach(&last.transaction)?,
                None => Vec::new(),
            };
            let transactions: Vec<Transaction> =
                postings.iter().map(|p| p.transaction.clone()).collect();
            let write = LedgerWrite { postings, records };

            match self.blocking(move |storage| storage.commit(write)).await {
                Ok(updated) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    let mut posted = Vec::with_capacity(transactions.len());
                    for (transaction, account) in transactions.into_iter().zip(updated) {
                        self.metrics
                            .record_transaction(transaction.tx_type.as_str(), elapsed);
                        tracing::info!(
                            transaction_id = %transaction.id,
                            account_id = %transaction.account_id,
                            tx_type = %transaction.tx_type,
                            amount = %transaction.amount,
                            balance = %account.balance,
                            reference = %transaction.reference,
                            "Transaction applied"
                        );

                        self.events.publish(BalanceChanged {
                            account_id: transaction.account_id.clone(),
                            new_balance: account.balance,
                            transaction: transaction.clone(),
                        });

                        posted.push(Posted {
                            transaction,
                            new_balance: account.balance,
                            replayed: false,
                        });
                    }
                    return Ok(posted);
                }
                Err(Error::VersionConflict { account_id, .. }) => {
                    self.metrics.record_version_conflict();
                    if attempt >= self.config.max_retries {
                        tracing::warn!(
                            account_id = %account_id,
                            attempts = attempt,
                            "Retries exhausted on contended account"
                        );
                        return Err(Error::ConcurrentModification {
                            account_id,
                            attempts: attempt,
                        });
                    }
                    sleep(Duration::from_millis(self.config.retry_backoff_ms * attempt as u64)).await;
                }
                // Lost a race on a reference; the next pass replays it
                Err(Error::DuplicateReference(_)) if attempt < self.config.max_retries => {}
                Err(e) => return Err(e),
            }
        }
    }

    async fn replay(&self, entries: &[Entry], existing: Vec<Option<Transaction>>) -> Result<Vec<Posted>> {
        let mut prior = Vec::with_capacity(entries.len());
        for (entry, found) in entries.iter().zip(existing) {
            match found {
                Some(txn) if txn.account_id == entry.account_id && txn.direction == entry.direction() => {
                    prior.push(txn)
                }
                // Owned by another account, or only part of the unit exists
                _ => return Err(Error::DuplicateReference(entry.reference.clone())),
            }
        }

        self.metrics.record_replay();
        for txn in &prior {
            tracing::debug!(
                transaction_id = %txn.id,
                reference = %txn.reference,
                "Reference already applied, replaying"
            );
        }

        let accounts = self
            .read_accounts(prior.iter().map(|t| t.account_id.clone()).collect())
            .await?;
        Ok(prior
            .into_iter()
            .zip(accounts)
            .map(|(transaction, account)| Posted {
                transaction,
                new_balance: account.balance,
                replayed: true,
            })
            .collect())
    }

    async fn read_accounts(&self, ids: Vec<AccountId>) -> Result<Vec<Account>> {
        self.blocking(move |storage| ids.iter().map(|id| storage.get_account(id)).collect())
            .await
    }

    /// Check that the stored balance equals the sum of completed transactions
    pub async fn verify_account(&self, account_id: &AccountId) -> Result<Reconciliation> {
        for _ in 0..RECONCILE_ATTEMPTS {
            let id = account_id.clone();
            let (before, history, after) = self
                .blocking(move |storage| {
                    let before = storage.get_account(&id)?;
                    let history = storage.account_history(&id, None)?;
                    let after = storage.get_account(&id)?;
                    Ok((before, history, after))
                })
                .await?;

            // A commit landed mid-read; take a fresh snapshot
            if before.version != after.version {
                continue;
            }

            let computed_balance = history
                .iter()
                .filter(|t| t.is_completed())
                .map(Transaction::signed_amount)
                .sum();

            let reconciliation = Reconciliation {
                account_id: account_id.clone(),
                stored_balance: after.balance,
                computed_balance,
                transaction_count: history.len(),
            };
            if !reconciliation.is_consistent() {
                tracing::error!(
                    account_id = %account_id,
                    stored = %reconciliation.stored_balance,
                    computed = reconciliation.computed_balance,
                    "Balance diverges from transaction history"
                );
            }
            return Ok(reconciliation);
        }

        Err(Error::ConcurrentModification {
            account_id: account_id.clone(),
            attempts: RECONCILE_ATTEMPTS,
        })
    }
}
