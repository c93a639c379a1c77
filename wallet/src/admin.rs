//! Admin adjustment gateway
//!
//! Privileged direct credit/debit. Every adjustment writes an audit entry in
//! the same atomic unit as its ledger posting: there is no adjustment without
//! an audit record and no audit record without an adjustment.

use crate::{
    types::{Adjustment, AdjustmentDirection, AuditEntry},
    Error, Result,
};
use ledger_core::{AccountId, Amount, Entry, RecordTable, RecordWrite, TransactionEngine, TransactionType};
use std::sync::Arc;
use uuid::Uuid;

/// Operator balance adjustments
#[derive(Debug, Clone)]
pub struct AdminGateway {
    engine: Arc<TransactionEngine>,
}

impl AdminGateway {
    /// Create gateway
    pub fn new(engine: Arc<TransactionEngine>) -> Self {
        Self { engine }
    }

    /// Credit or debit a user outside the regular flows
    pub async fn adjust(
        &self,
        user_id: &AccountId,
        direction: AdjustmentDirection,
        amount: Amount,
        description: &str,
        operator: &str,
    ) -> Result<Adjustment> {
        if amount.is_zero() {
            return Err(Error::InvalidAmount("adjustment amount must be positive".to_string()));
        }
        let operator = operator.trim();
        if operator.is_empty() {
            return Err(Error::Validation("operator must not be empty".to_string()));
        }
        let description = description.trim();
        if description.is_empty() {
            return Err(Error::Validation("description must not be empty".to_string()));
        }

        let account = self.engine.account(user_id).await?;
        if direction == AdjustmentDirection::Deduct && account.balance < amount {
            return Err(Error::WouldResultInNegativeBalance {
                account_id: user_id.clone(),
                balance: account.balance,
                requested: amount,
            });
        }

        let reference = Uuid::now_v7().to_string();
        let entry = match direction {
            AdjustmentDirection::Add => {
                Entry::credit(user_id.clone(), amount, TransactionType::AdminCredit, reference)?
            }
            AdjustmentDirection::Deduct => {
                Entry::debit(user_id.clone(), amount, TransactionType::AdminDebit, reference)?
            }
        }
        .with_description(description);

        let audit_id = Uuid::now_v7();
        let audit_for = |txn: &ledger_core::Transaction| AuditEntry {
            id: audit_id,
            operator: operator.to_string(),
            user_id: user_id.clone(),
            direction,
            amount,
            description: description.to_string(),
            transaction_id: txn.id,
            timestamp: txn.created_at,
        };

        let posted = self
            .engine
            .apply_atomic(entry, |txn| {
                Ok(vec![RecordWrite::insert(RecordTable::Audit, audit_id.to_string(), &audit_for(txn))?])
            })
            .await
            .map_err(|e| match e {
                // A racing debit got there first
                ledger_core::Error::InsufficientBalance { balance, .. } => Error::WouldResultInNegativeBalance {
                    account_id: user_id.clone(),
                    balance,
                    requested: amount,
                },
                other => other.into(),
            })?;

        let audit = audit_for(&posted.transaction);
        tracing::info!(
            audit_id = %audit.id,
            operator,
            user_id = %user_id,
            direction = ?direction,
            amount = %amount,
            balance = %posted.new_balance,
            "Admin adjustment applied"
        );

        Ok(Adjustment {
            audit,
            transaction: posted.transaction,
            new_balance: posted.new_balance,
        })
    }

    /// Audit entries, newest first, optionally for one user
    pub async fn audit_trail(&self, user_id: Option<&AccountId>) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .engine
            .records::<AuditEntry>(RecordTable::Audit)
            .await?
            .into_iter()
            .map(|stored| stored.value)
            .filter(|entry| user_id.map_or(true, |id| &entry.user_id == id))
            .collect();

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(entries)
    }
}
