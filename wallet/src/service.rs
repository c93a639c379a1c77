//! Wallet service facade
//!
//! Entry point for an outer API layer: balance queries, transfers, voucher
//! redemption, top-ups, offers and admin adjustments over one shared
//! transaction engine.

use crate::{
    admin::AdminGateway,
    offers::SettlementCoordinator,
    topup::TopUpWorkflow,
    types::{
        Adjustment, AdjustmentDirection, ExportFormat, Redemption, TopUpRequest, TradeOffer,
        TransferReceipt, VoucherFilter, WalletSnapshot,
    },
    voucher::VoucherService,
    Config, Error, Result,
};
use ledger_core::{
    Account, AccountId, Amount, BalanceChanged, Entry, Reconciliation, Transaction,
    TransactionEngine, TransactionType, TransferRequest,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Wallet service
#[derive(Debug, Clone)]
pub struct WalletService {
    engine: Arc<TransactionEngine>,
    vouchers: VoucherService,
    topups: TopUpWorkflow,
    offers: SettlementCoordinator,
    admin: AdminGateway,
    config: Config,
}

impl WalletService {
    /// Open the ledger and wire up every workflow
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let engine = Arc::new(TransactionEngine::open(&config.ledger)?);
        Ok(Self::new(engine, config))
    }

    /// Build the service over an existing engine
    pub fn new(engine: Arc<TransactionEngine>, config: Config) -> Self {
        Self {
            vouchers: VoucherService::new(
                engine.clone(),
                config.voucher.clone(),
                config.wallet.minor_unit_scale,
            ),
            topups: TopUpWorkflow::new(engine.clone(), config.topup.clone()),
            offers: SettlementCoordinator::new(engine.clone(), config.offers.clone()),
            admin: AdminGateway::new(engine.clone()),
            engine,
            config,
        }
    }

    /// Transaction engine
    pub fn engine(&self) -> &Arc<TransactionEngine> {
        &self.engine
    }

    /// Voucher subsystem
    pub fn vouchers(&self) -> &VoucherService {
        &self.vouchers
    }

    /// Top-up workflow
    pub fn topups(&self) -> &TopUpWorkflow {
        &self.topups
    }

    /// Trade offer coordinator
    pub fn offers(&self) -> &SettlementCoordinator {
        &self.offers
    }

    /// Admin gateway
    pub fn admin(&self) -> &AdminGateway {
        &self.admin
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to `balance_changed` events
    pub fn subscribe(&self) -> broadcast::Receiver<BalanceChanged> {
        self.engine.subscribe()
    }

    /// Open a wallet for a new user (no-op if it exists)
    pub async fn open_account(&self, account_id: &AccountId) -> Result<Account> {
        Ok(self.engine.open_account(account_id).await?)
    }

    /// Balance, pending top-ups and latest transactions
    pub async fn wallet(&self, account_id: &AccountId) -> Result<WalletSnapshot> {
        let account = self.engine.account(account_id).await?;
        let pending_balance = self.topups.pending_total(account_id).await?;
        let recent_transactions = self
            .engine
            .history(account_id, Some(self.config.wallet.recent_transactions_limit))
            .await?;

        Ok(WalletSnapshot {
            account_id: account.account_id,
            balance: account.balance,
            pending_balance,
            recent_transactions,
        })
    }

    /// Submit a top-up for review
    pub async fn create_topup(
        &self,
        account_id: &AccountId,
        amount: Amount,
        bank_id: &str,
        receipt_reference: &str,
    ) -> Result<TopUpRequest> {
        self.topups.submit(account_id, amount, bank_id, receipt_reference).await
    }

    /// Send credit to another user
    ///
    /// Retrying with the same `idempotency_key` returns the original transfer
    /// without moving credit again. Keys are scoped to the sender.
    pub async fn transfer(
        &self,
        from: &AccountId,
        recipient: &str,
        amount: Amount,
        idempotency_key: Option<&str>,
    ) -> Result<TransferReceipt> {
        let recipient = recipient.trim();
        if recipient.is_empty() {
            return Err(Error::Validation("recipient must not be empty".to_string()));
        }
        if amount.is_zero() {
            return Err(Error::InvalidAmount("transfer amount must be positive".to_string()));
        }
        let to = AccountId::new(recipient);
        if &to == from {
            return Err(Error::Validation("cannot transfer to yourself".to_string()));
        }

        let reference = match idempotency_key.map(str::trim) {
            // Length prefix keeps `a:b` + `c` apart from `a` + `b:c`
            Some(key) if !key.is_empty() => format!("transfer:{}:{}:{}", from.as_str().len(), from, key),
            Some(_) => return Err(Error::Validation("idempotency key must not be empty".to_string())),
            None => format!("transfer:{}", Uuid::now_v7()),
        };

        let transfer = self
            .engine
            .transfer(TransferRequest::new(from.clone(), to, amount, reference))
            .await?;

        Ok(TransferReceipt {
            transaction: transfer.debit.transaction,
            new_balance: transfer.debit.new_balance,
            credit: transfer.credit.transaction,
        })
    }

    /// Redeem a voucher code into the caller's wallet
    pub async fn redeem_voucher(&self, account_id: &AccountId, code: &str) -> Result<Redemption> {
        self.vouchers.redeem(code, account_id).await
    }

    /// Operator credit or debit
    pub async fn adjust(
        &self,
        user_id: &AccountId,
        direction: AdjustmentDirection,
        amount: Amount,
        description: &str,
        operator: &str,
    ) -> Result<Adjustment> {
        self.admin.adjust(user_id, direction, amount, description, operator).await
    }

    /// Accept a trade offer as its receiver
    pub async fn accept_offer(&self, offer_id: Uuid, caller: &AccountId) -> Result<TradeOffer> {
        self.offers.accept(offer_id, caller).await
    }

    /// Export redeemable vouchers
    pub async fn export_vouchers(&self, filter: &VoucherFilter, format: ExportFormat) -> Result<String> {
        self.vouchers.export(filter, format).await
    }

    /// Charge the fee for publishing a listing, once per listing
    pub async fn charge_listing_fee(
        &self,
        account_id: &AccountId,
        amount: Amount,
        listing_id: &str,
    ) -> Result<Transaction> {
        let listing_id = listing_id.trim();
        if listing_id.is_empty() {
            return Err(Error::Validation("listing id must not be empty".to_string()));
        }
        if amount.is_zero() {
            return Err(Error::InvalidAmount("listing fee must be positive".to_string()));
        }

        let entry = Entry::debit(
            account_id.clone(),
            amount,
            TransactionType::ListingFee,
            format!("listing-fee:{}", listing_id),
        )?
        .with_description(format!("Listing fee for {}", listing_id));

        let posted = self.engine.post(entry).await?;
        if !posted.replayed {
            tracing::info!(
                account_id = %account_id,
                listing_id,
                amount = %amount,
                "Listing fee charged"
            );
        }
        Ok(posted.transaction)
    }

    /// Compare stored balance with transaction history
    pub async fn verify_account(&self, account_id: &AccountId) -> Result<Reconciliation> {
        Ok(self.engine.verify_account(account_id).await?)
    }
}
