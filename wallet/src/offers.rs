//! Settlement coordinator for trade offers
//!
//! An offer combines wallet credit with physical items. Only the receiver
//! (listing owner) resolves it. Acceptance settles the monetary leg as a
//! two-leg `trade_settlement` transfer sharing the offer id as reference.
//! Both legs and the `pending → accepted` flip commit as one unit, so a
//! concurrent resolution discards the whole settlement.
//! Rejecting or countering never touches the ledger.

use crate::{
    config::OfferConfig,
    types::{OfferStatus, TradeOffer},
    Error, Result,
};
use chrono::Utc;
use ledger_core::{
    AccountId, Amount, RecordTable, RecordWrite, StoredRecord, TransactionEngine, TransactionType,
    TransferRequest,
};
use std::sync::Arc;
use uuid::Uuid;

/// Trade offer lifecycle and settlement
#[derive(Debug, Clone)]
pub struct SettlementCoordinator {
    engine: Arc<TransactionEngine>,
    config: OfferConfig,
}

impl SettlementCoordinator {
    /// Create coordinator
    pub fn new(engine: Arc<TransactionEngine>, config: OfferConfig) -> Self {
        Self { engine, config }
    }

    /// Make an offer on a listing
    pub async fn create_offer(
        &self,
        listing_id: &str,
        sender: &AccountId,
        receiver: &AccountId,
        wallet_amount: Amount,
        items: Vec<String>,
    ) -> Result<TradeOffer> {
        let offer = self.draft(listing_id, sender, receiver, wallet_amount, items).await?;

        self.engine
            .put_records(vec![RecordWrite::insert(
                RecordTable::Offers,
                offer.id.to_string(),
                &offer,
            )?])
            .await?;

        tracing::info!(
            offer_id = %offer.id,
            listing_id = %offer.listing_id,
            sender = %sender,
            receiver = %receiver,
            wallet_amount = %wallet_amount,
            items = offer.trade_item_descriptions.len(),
            "Trade offer created"
        );
        Ok(offer)
    }

    /// Validate terms and build a pending offer
    async fn draft(
        &self,
        listing_id: &str,
        sender: &AccountId,
        receiver: &AccountId,
        wallet_amount: Amount,
        items: Vec<String>,
    ) -> Result<TradeOffer> {
        let listing_id = listing_id.trim();
        if listing_id.is_empty() {
            return Err(Error::Validation("listing id must not be empty".to_string()));
        }
        if sender == receiver {
            return Err(Error::Validation("cannot make an offer to yourself".to_string()));
        }
        if items.len() > self.config.max_trade_items {
            return Err(Error::Validation(format!(
                "at most {} trade items allowed, got {}",
                self.config.max_trade_items,
                items.len()
            )));
        }
        let items: Vec<String> = items.into_iter().map(|item| item.trim().to_string()).collect();
        if items.iter().any(String::is_empty) {
            return Err(Error::Validation("trade item descriptions must not be empty".to_string()));
        }

        let now = Utc::now();
        let offer = TradeOffer {
            id: Uuid::now_v7(),
            listing_id: listing_id.to_string(),
            sender_account_id: sender.clone(),
            receiver_account_id: receiver.clone(),
            wallet_amount,
            trade_item_descriptions: items,
            status: OfferStatus::Pending,
            settlement_transaction_id: None,
            counter_offer_id: None,
            created_at: now,
            resolved_at: None,
        };
        if !offer.is_economically_valid() {
            return Err(Error::Validation(
                "offer must include wallet credit or at least one item".to_string(),
            ));
        }

        let sender_account = self.engine.account(sender).await?;
        self.engine.account(receiver).await?;

        // Advisory only; acceptance re-checks against the live balance
        if sender_account.balance < wallet_amount {
            return Err(Error::InsufficientBalance {
                account_id: sender.clone(),
                balance: sender_account.balance,
                requested: wallet_amount,
            });
        }

        Ok(offer)
    }

    /// Accept a pending offer, settling its wallet amount
    pub async fn accept(&self, offer_id: Uuid, caller: &AccountId) -> Result<TradeOffer> {
        let stored = self.load_pending(offer_id, caller).await?;
        let offer = &stored.value;

        if offer.wallet_amount.is_zero() {
            let mut accepted = offer.clone();
            accepted.status = OfferStatus::Accepted;
            accepted.resolved_at = Some(Utc::now());
            return self.resolve(&stored, accepted).await;
        }

        let sender = self.engine.account(&offer.sender_account_id).await?;
        if sender.balance < offer.wallet_amount {
            return Err(self.shortfall(offer, sender.balance).await);
        }

        let request = TransferRequest::new(
            offer.sender_account_id.clone(),
            offer.receiver_account_id.clone(),
            offer.wallet_amount,
            offer_id.to_string(),
        )
        .with_type(TransactionType::TradeSettlement)
        .with_description(format!("Trade offer {} on listing {}", offer_id, offer.listing_id));

        let accepted_from = |txn: &ledger_core::Transaction| {
            let mut accepted = offer.clone();
            accepted.status = OfferStatus::Accepted;
            accepted.settlement_transaction_id = Some(txn.id);
            accepted.resolved_at = Some(txn.created_at);
            accepted
        };

        let result = self
            .engine
            .transfer_atomic(request, |txn| {
                Ok(vec![RecordWrite::update(
                    RecordTable::Offers,
                    offer_id.to_string(),
                    &stored,
                    &accepted_from(txn),
                )?])
            })
            .await;

        match result {
            Ok(transfer) if !transfer.credit.replayed => {
                tracing::info!(
                    offer_id = %offer_id,
                    sender = %offer.sender_account_id,
                    receiver = %offer.receiver_account_id,
                    amount = %offer.wallet_amount,
                    transaction_id = %transfer.credit.transaction.id,
                    "Trade offer settled"
                );
                Ok(accepted_from(&transfer.credit.transaction))
            }
            Ok(_) | Err(ledger_core::Error::PreconditionFailed { .. }) => Err(self.not_pending(offer_id).await),
            Err(ledger_core::Error::InsufficientBalance { balance, .. }) => Err(self.shortfall(offer, balance).await),
            Err(ledger_core::Error::DuplicateReference(reference)) => match self.not_pending(offer_id).await {
                Error::OfferNotPending { status: OfferStatus::Pending, .. } => {
                    Err(Error::DuplicateReference(reference))
                }
                other => Err(other),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Decline a pending offer
    pub async fn reject(&self, offer_id: Uuid, caller: &AccountId) -> Result<TradeOffer> {
        let stored = self.load_pending(offer_id, caller).await?;
        let mut rejected = stored.value.clone();
        rejected.status = OfferStatus::Rejected;
        rejected.resolved_at = Some(Utc::now());
        self.resolve(&stored, rejected).await
    }

    /// Answer a pending offer with new terms in the opposite direction
    ///
    /// The original becomes `countered` and points at the new pending offer,
    /// in one atomic write.
    pub async fn counter(
        &self,
        offer_id: Uuid,
        caller: &AccountId,
        wallet_amount: Amount,
        items: Vec<String>,
    ) -> Result<TradeOffer> {
        let stored = self.load_pending(offer_id, caller).await?;
        let original = &stored.value;

        let counter = self
            .draft(
                &original.listing_id,
                &original.receiver_account_id,
                &original.sender_account_id,
                wallet_amount,
                items,
            )
            .await?;

        let mut countered = original.clone();
        countered.status = OfferStatus::Countered;
        countered.counter_offer_id = Some(counter.id);
        countered.resolved_at = Some(counter.created_at);

        let writes = vec![
            RecordWrite::update(RecordTable::Offers, offer_id.to_string(), &stored, &countered)?,
            RecordWrite::insert(RecordTable::Offers, counter.id.to_string(), &counter)?,
        ];
        match self.engine.put_records(writes).await {
            Ok(()) => {
                tracing::info!(
                    offer_id = %offer_id,
                    counter_offer_id = %counter.id,
                    wallet_amount = %wallet_amount,
                    "Trade offer countered"
                );
                Ok(counter)
            }
            Err(ledger_core::Error::PreconditionFailed { .. }) => Err(self.not_pending(offer_id).await),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up an offer
    pub async fn get(&self, offer_id: Uuid) -> Result<TradeOffer> {
        Ok(self.load(offer_id).await?.value)
    }

    async fn resolve(&self, stored: &StoredRecord<TradeOffer>, resolved: TradeOffer) -> Result<TradeOffer> {
        let write = RecordWrite::update(RecordTable::Offers, resolved.id.to_string(), stored, &resolved)?;
        match self.engine.put_records(vec![write]).await {
            Ok(()) => {
                tracing::info!(offer_id = %resolved.id, status = %resolved.status, "Trade offer resolved");
                Ok(resolved)
            }
            Err(ledger_core::Error::PreconditionFailed { .. }) => Err(self.not_pending(resolved.id).await),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, offer_id: Uuid) -> Result<StoredRecord<TradeOffer>> {
        self.engine
            .record::<TradeOffer>(RecordTable::Offers, &offer_id.to_string())
            .await?
            .ok_or(Error::OfferNotFound(offer_id))
    }

    async fn load_pending(&self, offer_id: Uuid, caller: &AccountId) -> Result<StoredRecord<TradeOffer>> {
        let stored = self.load(offer_id).await?;
        if &stored.value.receiver_account_id != caller {
            return Err(Error::NotOfferRecipient {
                offer_id,
                account_id: caller.clone(),
            });
        }
        if stored.value.status != OfferStatus::Pending {
            return Err(Error::OfferNotPending {
                id: offer_id,
                status: stored.value.status,
            });
        }
        Ok(stored)
    }

    async fn not_pending(&self, offer_id: Uuid) -> Error {
        match self.load(offer_id).await {
            Ok(current) => Error::OfferNotPending {
                id: offer_id,
                status: current.value.status,
            },
            Err(e) => e,
        }
    }

    /// Sender can't cover the offer, unless someone else already resolved it
    async fn shortfall(&self, offer: &TradeOffer, balance: Amount) -> Error {
        match self.not_pending(offer.id).await {
            Error::OfferNotPending {
                status: OfferStatus::Pending,
                ..
            } => Error::InsufficientBalanceAtSettlement {
                offer_id: offer.id,
                balance,
                required: offer.wallet_amount,
            },
            other => other,
        }
    }
}
