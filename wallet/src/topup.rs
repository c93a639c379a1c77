//! Top-up approval workflow
//!
//! Users deposit through mobile money outside the platform and submit the
//! receipt. An operator then approves or rejects the request:
//!
//! ```text
//! pending ──approve──▶ approved   (exactly one `topup` credit)
//!    └─────reject────▶ rejected   (no ledger effect)
//! ```
//!
//! Approval flips the request and credits the user in one atomic unit, with
//! the request id as ledger reference. A second approval, or an approval
//! racing a rejection, fails with `RequestNotPending`.

use crate::{
    config::TopUpConfig,
    types::{TopUpApproval, TopUpRequest, TopUpStatus},
    Error, Result,
};
use chrono::{DateTime, Utc};
use ledger_core::{
    AccountId, Amount, Entry, RecordTable, RecordWrite, StoredRecord, TransactionEngine,
    TransactionType,
};
use std::sync::Arc;
use uuid::Uuid;

/// Top-up request state machine
#[derive(Debug, Clone)]
pub struct TopUpWorkflow {
    engine: Arc<TransactionEngine>,
    config: TopUpConfig,
}

impl TopUpWorkflow {
    /// Create workflow
    pub fn new(engine: Arc<TransactionEngine>, config: TopUpConfig) -> Self {
        Self { engine, config }
    }

    /// Record a deposit awaiting review (no ledger mutation)
    pub async fn submit(
        &self,
        user_id: &AccountId,
        amount: Amount,
        bank_id: &str,
        receipt_reference: &str,
    ) -> Result<TopUpRequest> {
        if amount < self.config.min() || amount > self.config.max() {
            return Err(Error::InvalidAmount(format!(
                "top-up must be between {} and {}, got {}",
                self.config.min(),
                self.config.max(),
                amount
            )));
        }
        let bank_id = bank_id.trim();
        if bank_id.is_empty() {
            return Err(Error::Validation("bank id must not be empty".to_string()));
        }
        if !self.config.accepted_banks.is_empty()
            && !self.config.accepted_banks.iter().any(|b| b == bank_id)
        {
            return Err(Error::Validation(format!("bank {} is not accepted", bank_id)));
        }
        let receipt_reference = receipt_reference.trim();
        if receipt_reference.is_empty() {
            return Err(Error::Validation("receipt reference must not be empty".to_string()));
        }

        self.engine.account(user_id).await?;

        let request = TopUpRequest {
            id: Uuid::now_v7(),
            user_id: user_id.clone(),
            amount,
            bank_id: bank_id.to_string(),
            receipt_reference: receipt_reference.to_string(),
            status: TopUpStatus::Pending,
            rejection_reason: None,
            created_at: Utc::now(),
            processed_at: None,
            processed_by: None,
            resulting_transaction_id: None,
        };

        self.engine
            .put_records(vec![RecordWrite::insert(
                RecordTable::TopUps,
                request.id.to_string(),
                &request,
            )?])
            .await?;

        tracing::info!(
            request_id = %request.id,
            user_id = %user_id,
            amount = %amount,
            bank_id,
            "Top-up request submitted"
        );
        Ok(request)
    }

    /// Approve a pending request and credit the user
    pub async fn approve(&self, request_id: Uuid, operator: &str) -> Result<TopUpApproval> {
        if operator.trim().is_empty() {
            return Err(Error::Validation("operator must not be empty".to_string()));
        }

        let stored = self.load(request_id).await?;
        let request = &stored.value;
        if request.status != TopUpStatus::Pending {
            return Err(Error::RequestNotPending {
                id: request_id,
                status: request.status,
            });
        }

        let entry = Entry::credit(
            request.user_id.clone(),
            request.amount,
            TransactionType::Topup,
            request_id.to_string(),
        )?
        .with_description(format!(
            "Top-up via {} (receipt {})",
            request.bank_id, request.receipt_reference
        ));

        let approved_from = |created_at: DateTime<Utc>, transaction_id: Uuid| {
            let mut approved = request.clone();
            approved.status = TopUpStatus::Approved;
            approved.processed_at = Some(created_at);
            approved.processed_by = Some(operator.to_string());
            approved.resulting_transaction_id = Some(transaction_id);
            approved
        };

        let result = self
            .engine
            .apply_atomic(entry, |txn| {
                let approved = approved_from(txn.created_at, txn.id);
                Ok(vec![RecordWrite::update(
                    RecordTable::TopUps,
                    request_id.to_string(),
                    &stored,
                    &approved,
                )?])
            })
            .await;

        match result {
            Ok(posted) if !posted.replayed => {
                tracing::info!(
                    request_id = %request_id,
                    user_id = %request.user_id,
                    amount = %request.amount,
                    operator,
                    transaction_id = %posted.transaction.id,
                    "Top-up approved"
                );
                Ok(TopUpApproval {
                    request: approved_from(posted.transaction.created_at, posted.transaction.id),
                    transaction: posted.transaction,
                    new_balance: posted.new_balance,
                })
            }
            Ok(_)
            | Err(ledger_core::Error::PreconditionFailed { .. })
            | Err(ledger_core::Error::DuplicateReference(_)) => Err(self.not_pending(request_id).await),
            Err(e) => Err(e.into()),
        }
    }

    /// Reject a pending request (no ledger mutation)
    pub async fn reject(&self, request_id: Uuid, operator: &str, reason: &str) -> Result<TopUpRequest> {
        if operator.trim().is_empty() {
            return Err(Error::Validation("operator must not be empty".to_string()));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::Validation("rejection reason must not be empty".to_string()));
        }

        let stored = self.load(request_id).await?;
        if stored.value.status != TopUpStatus::Pending {
            return Err(Error::RequestNotPending {
                id: request_id,
                status: stored.value.status,
            });
        }

        let mut rejected = stored.value.clone();
        rejected.status = TopUpStatus::Rejected;
        rejected.rejection_reason = Some(reason.to_string());
        rejected.processed_at = Some(Utc::now());
        rejected.processed_by = Some(operator.to_string());

        let write = RecordWrite::update(RecordTable::TopUps, request_id.to_string(), &stored, &rejected)?;
        match self.engine.put_records(vec![write]).await {
            Ok(()) => {
                tracing::info!(request_id = %request_id, operator, reason, "Top-up rejected");
                Ok(rejected)
            }
            Err(ledger_core::Error::PreconditionFailed { .. }) => Err(self.not_pending(request_id).await),
            Err(e) => Err(e.into()),
        }
    }

    async fn not_pending(&self, request_id: Uuid) -> Error {
        match self.load(request_id).await {
            Ok(current) => Error::RequestNotPending {
                id: request_id,
                status: current.value.status,
            },
            Err(e) => e,
        }
    }

    async fn load(&self, request_id: Uuid) -> Result<StoredRecord<TopUpRequest>> {
        self.engine
            .record::<TopUpRequest>(RecordTable::TopUps, &request_id.to_string())
            .await?
            .ok_or(Error::RequestNotFound(request_id))
    }

    async fn scan(&self) -> Result<Vec<TopUpRequest>> {
        Ok(self
            .engine
            .records::<TopUpRequest>(RecordTable::TopUps)
            .await?
            .into_iter()
            .map(|stored| stored.value)
            .collect())
    }

    /// Look up a request
    pub async fn get(&self, request_id: Uuid) -> Result<TopUpRequest> {
        Ok(self.load(request_id).await?.value)
    }

    /// Operator queue, oldest first
    pub async fn list_pending(&self) -> Result<Vec<TopUpRequest>> {
        let mut pending: Vec<_> = self
            .scan()
            .await?
            .into_iter()
            .filter(|r| r.status == TopUpStatus::Pending)
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }

    /// A user's requests, newest first
    pub async fn list_for_user(&self, user_id: &AccountId) -> Result<Vec<TopUpRequest>> {
        let mut requests: Vec<_> = self
            .scan()
            .await?
            .into_iter()
            .filter(|r| &r.user_id == user_id)
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    /// Sum of a user's pending requests
    pub async fn pending_total(&self, user_id: &AccountId) -> Result<Amount> {
        self.list_for_user(user_id)
            .await?
            .iter()
            .filter(|r| r.status == TopUpStatus::Pending)
            .try_fold(Amount::ZERO, |total, r| total.checked_add(r.amount))
            .ok_or_else(|| Error::InvalidAmount("pending total overflows".to_string()))
    }
}
