//! Voucher subsystem
//!
//! Single-use prepaid codes, generated in batches and sold by vendors.
//!
//! # Lifecycle
//!
//! ```text
//! unused ──redeem──▶ used
//!   │ ├──disable──▶ disabled
//!   │ └──now > expires_at──▶ expired
//! ```
//!
//! `used`, `disabled` and `expired` are terminal. Redemption flips the voucher
//! to `used` in the same atomic unit as the `voucher_redeem` credit, with the
//! code as the ledger reference, so a code can credit at most once.

use crate::{
    config::VoucherConfig,
    export,
    types::{ExportFormat, Redemption, Voucher, VoucherCode, VoucherFilter, VoucherStatus},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use ledger_core::{
    AccountId, Amount, Entry, RecordTable, RecordWrite, StoredRecord, TransactionEngine,
    TransactionType,
};
use rand::rngs::OsRng;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Longest allowed voucher validity
const MAX_EXPIRY_DAYS: u32 = 3650;

/// Attempts at committing a batch whose codes were taken between draw and commit
const BATCH_COMMIT_ATTEMPTS: u32 = 3;

/// Voucher issuance and redemption
#[derive(Debug, Clone)]
pub struct VoucherService {
    engine: Arc<TransactionEngine>,
    config: VoucherConfig,
    minor_unit_scale: u32,
}

impl VoucherService {
    /// Create voucher service
    pub fn new(engine: Arc<TransactionEngine>, config: VoucherConfig, minor_unit_scale: u32) -> Self {
        Self {
            engine,
            config,
            minor_unit_scale,
        }
    }

    /// Generate a batch of unused vouchers sharing amount, vendor and expiry
    pub async fn generate_batch(
        &self,
        amount: Amount,
        quantity: u32,
        vendor: &str,
        expiry_days: Option<u32>,
        created_by: &str,
    ) -> Result<Vec<Voucher>> {
        if amount.is_zero() {
            return Err(Error::InvalidAmount("voucher amount must be positive".to_string()));
        }
        if quantity == 0 || quantity > self.config.max_batch_size {
            return Err(Error::Validation(format!(
                "quantity must be between 1 and {}, got {}",
                self.config.max_batch_size, quantity
            )));
        }
        if vendor.trim().is_empty() {
            return Err(Error::Validation("vendor must not be empty".to_string()));
        }
        if created_by.trim().is_empty() {
            return Err(Error::Validation("operator must not be empty".to_string()));
        }
        let expiry_days = expiry_days.unwrap_or(self.config.default_expiry_days);
        if expiry_days == 0 || expiry_days > MAX_EXPIRY_DAYS {
            return Err(Error::Validation(format!(
                "expiry must be between 1 and {} days, got {}",
                MAX_EXPIRY_DAYS, expiry_days
            )));
        }

        let now = Utc::now();
        let batch_id = Uuid::now_v7();
        let expires_at = now + Duration::days(i64::from(expiry_days));

        let mut attempt = 0;
        loop {
            attempt += 1;

            let codes = self.draw_codes(quantity).await?;
            let vouchers: Vec<Voucher> = codes
                .into_iter()
                .map(|code| Voucher {
                    code,
                    amount,
                    status: VoucherStatus::Unused,
                    vendor: vendor.to_string(),
                    batch_id,
                    created_by: created_by.to_string(),
                    used_by: None,
                    used_at: None,
                    disabled_by: None,
                    disabled_at: None,
                    expires_at,
                    created_at: now,
                })
                .collect();

            let writes = vouchers
                .iter()
                .map(|v| RecordWrite::insert(RecordTable::Vouchers, v.code.as_str(), v))
                .collect::<ledger_core::Result<Vec<_>>>()?;

            match self.engine.put_records(writes).await {
                Ok(()) => {
                    tracing::info!(
                        batch_id = %batch_id,
                        quantity,
                        amount = %amount,
                        vendor,
                        created_by,
                        "Voucher batch generated"
                    );
                    return Ok(vouchers);
                }
                Err(ledger_core::Error::PreconditionFailed { key, .. }) if attempt < BATCH_COMMIT_ATTEMPTS => {
                    tracing::debug!(code = %key, attempt, "Voucher code taken concurrently, redrawing batch");
                }
                Err(ledger_core::Error::PreconditionFailed { .. }) => {
                    return Err(Error::CodeSpaceExhausted {
                        attempts: self.config.max_draw_attempts,
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn draw_codes(&self, quantity: u32) -> Result<Vec<VoucherCode>> {
        let mut rng = OsRng;
        let mut drawn = HashSet::with_capacity(quantity as usize);
        let mut codes = Vec::with_capacity(quantity as usize);

        for _ in 0..quantity {
            let mut found = None;
            for _ in 0..self.config.max_draw_attempts {
                let code = VoucherCode::random(&mut rng);
                if drawn.contains(&code) {
                    continue;
                }
                if self
                    .engine
                    .record::<Voucher>(RecordTable::Vouchers, code.as_str())
                    .await?
                    .is_some()
                {
                    continue;
                }
                found = Some(code);
                break;
            }

            let code = found.ok_or(Error::CodeSpaceExhausted {
                attempts: self.config.max_draw_attempts,
            })?;
            drawn.insert(code.clone());
            codes.push(code);
        }

        Ok(codes)
    }

    /// Redeem a code into an account
    pub async fn redeem(&self, code: &str, account_id: &AccountId) -> Result<Redemption> {
        let code = VoucherCode::parse(code)?;
        if account_id.as_str().trim().is_empty() {
            return Err(Error::Validation("account id must not be empty".to_string()));
        }

        let stored = self.load(&code).await?;
        let now = Utc::now();
        if let Err(e) = Self::ensure_redeemable(&stored.value, now) {
            self.expire_on_read(&stored, now).await?;
            return Err(e);
        }

        let voucher = &stored.value;
        let entry = Entry::credit(
            account_id.clone(),
            voucher.amount,
            TransactionType::VoucherRedeem,
            code.as_str(),
        )?
        .with_description(format!("Voucher {} from {}", code, voucher.vendor));

        let result = self
            .engine
            .apply_atomic(entry, |txn| {
                let mut used = stored.value.clone();
                used.status = VoucherStatus::Used;
                used.used_by = Some(account_id.clone());
                used.used_at = Some(txn.created_at);
                Ok(vec![RecordWrite::update(RecordTable::Vouchers, code.as_str(), &stored, &used)?])
            })
            .await;

        match result {
            Ok(posted) if !posted.replayed => {
                tracing::info!(
                    code = %code,
                    account_id = %account_id,
                    amount = %voucher.amount,
                    balance = %posted.new_balance,
                    "Voucher redeemed"
                );
                Ok(Redemption {
                    code,
                    amount: voucher.amount,
                    new_balance: posted.new_balance,
                    transaction: posted.transaction,
                })
            }
            Ok(_) => Err(Error::VoucherAlreadyUsed(code.to_string())),
            // Lost a race: another redemption or an operator got there first
            Err(ledger_core::Error::PreconditionFailed { .. })
            | Err(ledger_core::Error::DuplicateReference(_)) => {
                let current = self.load(&code).await?;
                match Self::ensure_redeemable(&current.value, now) {
                    Err(e) => Err(e),
                    Ok(()) => Err(Error::VoucherAlreadyUsed(code.to_string())),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_redeemable(voucher: &Voucher, now: DateTime<Utc>) -> Result<()> {
        let code = voucher.code.to_string();
        match voucher.status {
            VoucherStatus::Used => Err(Error::VoucherAlreadyUsed(code)),
            VoucherStatus::Disabled => Err(Error::VoucherDisabled(code)),
            VoucherStatus::Expired => Err(Error::VoucherExpired(code)),
            VoucherStatus::Unused if voucher.is_expired_at(now) => Err(Error::VoucherExpired(code)),
            VoucherStatus::Unused => Ok(()),
        }
    }

    /// Flip an unused voucher past its expiry to `expired`
    ///
    /// Returns whether this call made the flip. Losing the race to a
    /// concurrent redemption or sweep is not an error.
    async fn expire_on_read(&self, stored: &StoredRecord<Voucher>, now: DateTime<Utc>) -> Result<bool> {
        if !stored.value.is_expired_at(now) {
            return Ok(false);
        }

        let mut expired = stored.value.clone();
        expired.status = VoucherStatus::Expired;
        let write = RecordWrite::update(RecordTable::Vouchers, expired.code.as_str(), stored, &expired)?;

        match self.engine.put_records(vec![write]).await {
            Ok(()) => {
                tracing::warn!(
                    code = %expired.code,
                    expires_at = %expired.expires_at,
                    "Voucher expired"
                );
                Ok(true)
            }
            Err(ledger_core::Error::PreconditionFailed { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Withdraw an unused voucher
    pub async fn disable(&self, code: &str, operator: &str) -> Result<Voucher> {
        let code = VoucherCode::parse(code)?;
        if operator.trim().is_empty() {
            return Err(Error::Validation("operator must not be empty".to_string()));
        }

        let stored = self.load(&code).await?;
        let now = Utc::now();
        if stored.value.status != VoucherStatus::Unused || stored.value.is_expired_at(now) {
            self.expire_on_read(&stored, now).await?;
            let current = self.load(&code).await?.value;
            return Err(Error::InvalidVoucherState {
                code: code.to_string(),
                status: if current.is_expired_at(now) {
                    VoucherStatus::Expired
                } else {
                    current.status
                },
            });
        }

        let mut disabled = stored.value.clone();
        disabled.status = VoucherStatus::Disabled;
        disabled.disabled_by = Some(operator.to_string());
        disabled.disabled_at = Some(now);
        let write = RecordWrite::update(RecordTable::Vouchers, code.as_str(), &stored, &disabled)?;

        match self.engine.put_records(vec![write]).await {
            Ok(()) => {
                tracing::info!(code = %code, operator, "Voucher disabled");
                Ok(disabled)
            }
            Err(ledger_core::Error::PreconditionFailed { .. }) => Err(Error::InvalidVoucherState {
                code: code.to_string(),
                status: self.load(&code).await?.value.status,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a voucher
    pub async fn get(&self, code: &str) -> Result<Voucher> {
        let code = VoucherCode::parse(code)?;
        Ok(self.load(&code).await?.value)
    }

    async fn load(&self, code: &VoucherCode) -> Result<StoredRecord<Voucher>> {
        self.engine
            .record::<Voucher>(RecordTable::Vouchers, code.as_str())
            .await?
            .ok_or_else(|| Error::VoucherNotFound(code.to_string()))
    }

    /// Mark every unused voucher past its expiry as `expired`
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;
        for stored in self
            .engine
            .records::<Voucher>(RecordTable::Vouchers)
            .await?
        {
            if self.expire_on_read(&stored, now).await? {
                expired += 1;
            }
        }

        if expired > 0 {
            tracing::info!(expired, "Voucher expiry sweep finished");
        }
        Ok(expired)
    }

    /// Redeemable vouchers matching the filter, oldest first
    pub async fn list_unused(&self, filter: &VoucherFilter) -> Result<Vec<Voucher>> {
        let now = Utc::now();
        let mut vouchers: Vec<Voucher> = self
            .engine
            .records::<Voucher>(RecordTable::Vouchers)
            .await?
            .into_iter()
            .map(|stored| stored.value)
            .filter(|v| v.status == VoucherStatus::Unused && !v.is_expired_at(now))
            .filter(|v| filter.matches(v))
            .collect();

        vouchers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.code.cmp(&b.code)));
        Ok(vouchers)
    }

    /// Export redeemable vouchers for distribution
    pub async fn export(&self, filter: &VoucherFilter, format: ExportFormat) -> Result<String> {
        let vouchers = self.list_unused(filter).await?;
        tracing::info!(count = vouchers.len(), format = format.extension(), "Vouchers exported");
        export::render(&vouchers, format, self.minor_unit_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::Config as LedgerConfig;
    use tempfile::TempDir;

    fn create_test_service() -> (VoucherService, Arc<TransactionEngine>, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = LedgerConfig::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let engine = Arc::new(TransactionEngine::open(&config).unwrap());
        let service = VoucherService::new(engine.clone(), VoucherConfig::default(), 2);
        (service, engine, temp_dir)
    }

    async fn account(engine: &TransactionEngine, id: &str) -> AccountId {
        let account_id = AccountId::new(id);
        engine.open_account(&account_id).await.unwrap();
        account_id
    }

    fn insert_voucher(engine: &TransactionEngine, code: &str, amount: u64, expires_at: DateTime<Utc>) {
        let voucher = Voucher {
            code: VoucherCode::parse(code).unwrap(),
            amount: Amount::from_minor(amount),
            status: VoucherStatus::Unused,
            vendor: "kiosk".to_string(),
            batch_id: Uuid::now_v7(),
            created_by: "ops".to_string(),
            used_by: None,
            used_at: None,
            disabled_by: None,
            disabled_at: None,
            expires_at,
            created_at: Utc::now(),
        };
        engine
            .storage()
            .put_records(vec![RecordWrite::insert(RecordTable::Vouchers, code, &voucher).unwrap()])
            .unwrap();
    }

    #[tokio::test]
    async fn test_generate_batch() {
        let (service, _engine, _temp) = create_test_service();
        let vouchers = service
            .generate_batch(Amount::from_minor(5_000), 25, "kiosk-a", Some(30), "ops")
            .await
            .unwrap();

        assert_eq!(vouchers.len(), 25);
        let codes: HashSet<_> = vouchers.iter().map(|v| v.code.clone()).collect();
        assert_eq!(codes.len(), 25);
        assert!(vouchers.iter().all(|v| v.batch_id == vouchers[0].batch_id));
        assert!(vouchers.iter().all(|v| v.status == VoucherStatus::Unused));

        let stored = service.get(vouchers[0].code.as_str()).await.unwrap();
        assert_eq!(stored, vouchers[0]);
    }

    #[tokio::test]
    async fn test_generate_batch_validation() {
        let (service, _engine, _temp) = create_test_service();
        let amount = Amount::from_minor(100);

        assert!(matches!(
            service.generate_batch(amount, 0, "v", None, "ops").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            service.generate_batch(amount, 1001, "v", None, "ops").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            service.generate_batch(Amount::ZERO, 1, "v", None, "ops").await,
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            service.generate_batch(amount, 1, "v", Some(0), "ops").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_redeem_credits_once() {
        let (service, engine, _temp) = create_test_service();
        let alice = account(&engine, "alice").await;
        let voucher = service
            .generate_batch(Amount::from_minor(50), 1, "kiosk", None, "ops")
            .await
            .unwrap()
            .remove(0);

        let redemption = service.redeem(voucher.code.as_str(), &alice).await.unwrap();
        assert_eq!(redemption.amount, Amount::from_minor(50));
        assert_eq!(redemption.new_balance, Amount::from_minor(50));
        assert_eq!(redemption.transaction.tx_type, TransactionType::VoucherRedeem);
        assert_eq!(redemption.transaction.reference, voucher.code.as_str());

        let used = service.get(voucher.code.as_str()).await.unwrap();
        assert_eq!(used.status, VoucherStatus::Used);
        assert_eq!(used.used_by, Some(alice.clone()));

        let again = service.redeem(voucher.code.as_str(), &alice).await;
        assert!(matches!(again, Err(Error::VoucherAlreadyUsed(_))));
        assert_eq!(engine.account(&alice).await.unwrap().balance, Amount::from_minor(50));
    }

    #[tokio::test]
    async fn test_redeem_normalizes_code() {
        let (service, engine, _temp) = create_test_service();
        let alice = account(&engine, "alice").await;
        insert_voucher(&engine, "1234567890", 70, Utc::now() + Duration::days(1));

        let redemption = service.redeem(" 12345-67890 ", &alice).await.unwrap();
        assert_eq!(redemption.code.as_str(), "1234567890");
    }

    #[tokio::test]
    async fn test_redeem_invalid_and_unknown_codes() {
        let (service, engine, _temp) = create_test_service();
        let alice = account(&engine, "alice").await;

        assert!(matches!(service.redeem("12ab", &alice).await, Err(Error::InvalidVoucherCode(_))));
        assert!(matches!(service.redeem("9999999999", &alice).await, Err(Error::VoucherNotFound(_))));
    }

    #[tokio::test]
    async fn test_redeem_expired_flips_status() {
        let (service, engine, _temp) = create_test_service();
        let alice = account(&engine, "alice").await;
        insert_voucher(&engine, "1111111111", 70, Utc::now() - Duration::hours(1));

        let err = service.redeem("1111111111", &alice).await.unwrap_err();
        assert!(matches!(err, Error::VoucherExpired(_)));
        assert_eq!(service.get("1111111111").await.unwrap().status, VoucherStatus::Expired);
        assert_eq!(engine.account(&alice).await.unwrap().balance, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_disable() {
        let (service, engine, _temp) = create_test_service();
        let alice = account(&engine, "alice").await;
        insert_voucher(&engine, "2222222222", 70, Utc::now() + Duration::days(1));

        let disabled = service.disable("2222222222", "ops").await.unwrap();
        assert_eq!(disabled.status, VoucherStatus::Disabled);
        assert_eq!(disabled.disabled_by.as_deref(), Some("ops"));

        assert!(matches!(service.redeem("2222222222", &alice).await, Err(Error::VoucherDisabled(_))));
        assert!(matches!(
            service.disable("2222222222", "ops").await,
            Err(Error::InvalidVoucherState { status: VoucherStatus::Disabled, .. })
        ));
    }

    #[tokio::test]
    async fn test_disable_used_voucher_fails() {
        let (service, engine, _temp) = create_test_service();
        let alice = account(&engine, "alice").await;
        insert_voucher(&engine, "3333333333", 70, Utc::now() + Duration::days(1));
        service.redeem("3333333333", &alice).await.unwrap();

        assert!(matches!(
            service.disable("3333333333", "ops").await,
            Err(Error::InvalidVoucherState { status: VoucherStatus::Used, .. })
        ));
    }

    #[tokio::test]
    async fn test_expire_due() {
        let (service, engine, _temp) = create_test_service();
        insert_voucher(&engine, "4444444444", 10, Utc::now() - Duration::days(2));
        insert_voucher(&engine, "5555555555", 10, Utc::now() - Duration::days(1));
        insert_voucher(&engine, "6666666666", 10, Utc::now() + Duration::days(1));

        assert_eq!(service.expire_due(Utc::now()).await.unwrap(), 2);
        assert_eq!(service.expire_due(Utc::now()).await.unwrap(), 0);
        assert_eq!(service.get("6666666666").await.unwrap().status, VoucherStatus::Unused);
    }

    #[tokio::test]
    async fn test_list_unused_and_export() {
        let (service, engine, _temp) = create_test_service();
        let alice = account(&engine, "alice").await;
        service
            .generate_batch(Amount::from_minor(1_000), 3, "kiosk-a", None, "ops")
            .await
            .unwrap();
        let other = service
            .generate_batch(Amount::from_minor(2_000), 2, "kiosk-b", None, "ops")
            .await
            .unwrap();
        service.redeem(other[0].code.as_str(), &alice).await.unwrap();

        let all = service.list_unused(&VoucherFilter::default()).await.unwrap();
        assert_eq!(all.len(), 4);

        let filter = VoucherFilter {
            vendor: Some("kiosk-b".to_string()),
            amount: None,
        };
        let text = service.export(&filter, ExportFormat::Text).await.unwrap();
        assert_eq!(text, format!("{}\n", other[1].code));

        let csv = service
            .export(&VoucherFilter { vendor: None, amount: Some(Amount::from_minor(1_000)) }, ExportFormat::Csv)
            .await
            .unwrap();
        assert_eq!(csv.lines().count(), 4);
        assert!(csv.lines().skip(1).all(|line| line.contains(",10.00,kiosk-a,")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redemption_single_winner() {
        let (service, engine, _temp) = create_test_service();
        let service = Arc::new(service);
        let alice = account(&engine, "alice").await;
        let bob = account(&engine, "bob").await;
        insert_voucher(&engine, "7777777777", 50, Utc::now() + Duration::days(1));

        let mut handles = Vec::new();
        for i in 0..8 {
            let service = service.clone();
            let who = if i % 2 == 0 { alice.clone() } else { bob.clone() };
            handles.push(tokio::spawn(async move { service.redeem("7777777777", &who).await }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(Error::VoucherAlreadyUsed(_)) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(wins, 1);
        let total = engine.account(&alice).await.unwrap().balance.minor()
            + engine.account(&bob).await.unwrap().balance.minor();
        assert_eq!(total, 50);
    }
}
