//! End-to-end wallet scenarios
//!
//! Each test drives the public `WalletService` API against a fresh RocksDB
//! directory and checks balances against transaction history at the end.

use ledger_core::{AccountId, Amount, TransactionType};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;
use wallet::{
    AdjustmentDirection, Config, Error, ExportFormat, OfferStatus, TopUpStatus, VoucherFilter,
    VoucherStatus, WalletService,
};

/// Create test service with temp directory
fn create_test_service() -> (Arc<WalletService>, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.ledger.data_dir = temp_dir.path().to_path_buf();
    config.ledger.locks.stripes = 64;
    (Arc::new(WalletService::open(config).unwrap()), temp_dir)
}

async fn open(service: &WalletService, id: &str) -> AccountId {
    let account_id = AccountId::new(id);
    service.open_account(&account_id).await.unwrap();
    account_id
}

async fn seed(service: &WalletService, account_id: &AccountId, minor: u64) {
    service
        .adjust(account_id, AdjustmentDirection::Add, Amount::from_minor(minor), "seed", "ops")
        .await
        .unwrap();
}

async fn assert_consistent(service: &WalletService, ids: &[&AccountId]) {
    for id in ids {
        let reconciliation = service.verify_account(id).await.unwrap();
        assert!(reconciliation.is_consistent(), "{:?}", reconciliation);
    }
}

#[tokio::test]
async fn voucher_redeemed_once() {
    let (service, _temp) = create_test_service();
    let alice = open(&service, "alice").await;

    let voucher = service
        .vouchers()
        .generate_batch(Amount::from_minor(50), 1, "kiosk", None, "ops")
        .await
        .unwrap()
        .remove(0);

    let redemption = service.redeem_voucher(&alice, voucher.code.as_str()).await.unwrap();
    assert_eq!(redemption.amount, Amount::from_minor(50));
    assert_eq!(redemption.new_balance, Amount::from_minor(50));
    assert_eq!(
        service.vouchers().get(voucher.code.as_str()).await.unwrap().status,
        VoucherStatus::Used
    );

    let second = service.redeem_voucher(&alice, voucher.code.as_str()).await;
    assert!(matches!(second, Err(Error::VoucherAlreadyUsed(_))));
    assert_eq!(service.wallet(&alice).await.unwrap().balance, Amount::from_minor(50));
    assert_consistent(&service, &[&alice]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_double_redemption() {
    let (service, _temp) = create_test_service();
    let alice = open(&service, "alice").await;
    let bob = open(&service, "bob").await;

    let code = service
        .vouchers()
        .generate_batch(Amount::from_minor(80), 1, "kiosk", None, "ops")
        .await
        .unwrap()
        .remove(0)
        .code;

    let (a, b) = tokio::join!(
        {
            let service = service.clone();
            let code = code.clone();
            let alice = alice.clone();
            tokio::spawn(async move { service.redeem_voucher(&alice, code.as_str()).await })
        },
        {
            let service = service.clone();
            let code = code.clone();
            let bob = bob.clone();
            tokio::spawn(async move { service.redeem_voucher(&bob, code.as_str()).await })
        }
    );
    let results = [a.unwrap(), b.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::VoucherAlreadyUsed(_)))));

    let total = service.wallet(&alice).await.unwrap().balance.minor()
        + service.wallet(&bob).await.unwrap().balance.minor();
    assert_eq!(total, 80);
    assert_consistent(&service, &[&alice, &bob]).await;
}

#[tokio::test]
async fn topup_approved_once() {
    let (service, _temp) = create_test_service();
    let alice = open(&service, "alice").await;

    let request = service
        .create_topup(&alice, Amount::from_minor(200), "mpesa", "RCPT-77")
        .await
        .unwrap();
    assert_eq!(service.wallet(&alice).await.unwrap().pending_balance, Amount::from_minor(200));

    service.topups().approve(request.id, "ops").await.unwrap();
    let again = service.topups().approve(request.id, "ops").await;
    assert!(matches!(again, Err(Error::RequestNotPending { .. })));

    let history = service.engine().history(&alice, None).await.unwrap();
    let topups: Vec<_> = history.iter().filter(|t| t.tx_type == TransactionType::Topup).collect();
    assert_eq!(topups.len(), 1);
    assert_eq!(topups[0].amount, Amount::from_minor(200));
    assert_eq!(service.topups().get(request.id).await.unwrap().status, TopUpStatus::Approved);

    let snapshot = service.wallet(&alice).await.unwrap();
    assert_eq!(snapshot.balance, Amount::from_minor(200));
    assert_eq!(snapshot.pending_balance, Amount::ZERO);
}

#[tokio::test]
async fn topup_rejected_without_credit() {
    let (service, _temp) = create_test_service();
    let alice = open(&service, "alice").await;

    let request = service
        .create_topup(&alice, Amount::from_minor(900), "mpesa", "RCPT-78")
        .await
        .unwrap();
    service.topups().reject(request.id, "ops", "receipt not found").await.unwrap();

    assert_eq!(service.wallet(&alice).await.unwrap().balance, Amount::ZERO);
    assert!(matches!(
        service.topups().reject(request.id, "ops", "again").await,
        Err(Error::RequestNotPending { .. })
    ));
}

#[tokio::test]
async fn offer_exceeding_balance_stays_pending() {
    let (service, _temp) = create_test_service();
    let alice = open(&service, "alice").await;
    let bob = open(&service, "bob").await;
    seed(&service, &alice, 300).await;

    let offer = service
        .offers()
        .create_offer("listing-5", &alice, &bob, Amount::from_minor(300), vec!["headphones".into()])
        .await
        .unwrap();
    service
        .adjust(&alice, AdjustmentDirection::Deduct, Amount::from_minor(50), "correction", "ops")
        .await
        .unwrap();

    let err = service.accept_offer(offer.id, &bob).await.unwrap_err();
    assert!(matches!(err, Error::InsufficientBalanceAtSettlement { .. }));
    assert!(err.is_client_error());

    assert_eq!(service.offers().get(offer.id).await.unwrap().status, OfferStatus::Pending);
    assert_eq!(service.wallet(&alice).await.unwrap().balance, Amount::from_minor(250));
    assert_eq!(service.wallet(&bob).await.unwrap().balance, Amount::ZERO);
    assert_consistent(&service, &[&alice, &bob]).await;
}

#[tokio::test]
async fn offer_accepted_after_counter() {
    let (service, _temp) = create_test_service();
    let alice = open(&service, "alice").await;
    let bob = open(&service, "bob").await;
    seed(&service, &alice, 1_000).await;

    let offer = service
        .offers()
        .create_offer("listing-6", &alice, &bob, Amount::ZERO, vec!["camera".into()])
        .await
        .unwrap();
    let counter = service
        .offers()
        .counter(offer.id, &bob, Amount::ZERO, vec!["lens".into()])
        .await
        .unwrap();

    // The counter goes back to alice, who now holds the receiver role
    assert!(matches!(
        service.accept_offer(counter.id, &bob).await,
        Err(Error::NotOfferRecipient { .. })
    ));
    let accepted = service.accept_offer(counter.id, &alice).await.unwrap();
    assert_eq!(accepted.status, OfferStatus::Accepted);
    assert_eq!(service.wallet(&alice).await.unwrap().balance, Amount::from_minor(1_000));
}

#[tokio::test]
async fn admin_deduct_below_zero() {
    let (service, _temp) = create_test_service();
    let alice = open(&service, "alice").await;
    seed(&service, &alice, 100).await;

    let err = service
        .adjust(&alice, AdjustmentDirection::Deduct, Amount::from_minor(150), "fraud reversal", "ops")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "would_result_in_negative_balance");
    assert_eq!(service.wallet(&alice).await.unwrap().balance, Amount::from_minor(100));

    let trail = service.admin().audit_trail(Some(&alice)).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].direction, AdjustmentDirection::Add);
}

#[tokio::test]
async fn voucher_export_after_redemption() {
    let (service, _temp) = create_test_service();
    let alice = open(&service, "alice").await;

    let batch = service
        .vouchers()
        .generate_batch(Amount::from_minor(2_500), 5, "kiosk-north", Some(90), "ops")
        .await
        .unwrap();
    service.redeem_voucher(&alice, batch[2].code.as_str()).await.unwrap();
    service.vouchers().disable(batch[3].code.as_str(), "ops").await.unwrap();

    let filter = VoucherFilter {
        vendor: Some("kiosk-north".to_string()),
        amount: None,
    };
    let text = service.export_vouchers(&filter, ExportFormat::Text).await.unwrap();
    let exported: Vec<&str> = text.lines().collect();
    assert_eq!(exported.len(), 3);
    assert!(!exported.contains(&batch[2].code.as_str()));
    assert!(!exported.contains(&batch[3].code.as_str()));

    let csv = service.export_vouchers(&filter, ExportFormat::Csv).await.unwrap();
    assert!(csv.lines().skip(1).all(|line| line.contains(",25.00,kiosk-north,")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_transfers_conserve_credit() {
    let (service, _temp) = create_test_service();
    let alice = open(&service, "alice").await;
    let bob = open(&service, "bob").await;
    seed(&service, &alice, 5_000).await;
    seed(&service, &bob, 5_000).await;

    let mut handles = Vec::new();
    for i in 0..40u64 {
        let service = service.clone();
        let (from, to) = if i % 2 == 0 {
            (alice.clone(), "bob")
        } else {
            (bob.clone(), "alice")
        };
        handles.push(tokio::spawn(async move {
            service.transfer(&from, to, Amount::from_minor(1 + i * 7), None).await
        }));
    }
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) | Err(Error::InsufficientBalance { .. }) | Err(Error::ConcurrentModification { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    let total = service.wallet(&alice).await.unwrap().balance.minor()
        + service.wallet(&bob).await.unwrap().balance.minor();
    assert_eq!(total, 10_000);
    assert_consistent(&service, &[&alice, &bob]).await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: any mix of workflow operations keeps balances equal to history
    #[test]
    fn prop_workflows_keep_balance_consistent(
        steps in prop::collection::vec((0u8..5, 1u64..2_000u64), 1..25),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (service, _temp) = create_test_service();
            let alice = open(&service, "alice").await;
            let bob = open(&service, "bob").await;

            for (i, (kind, minor)) in steps.into_iter().enumerate() {
                let amount = Amount::from_minor(minor);
                let _ = match kind {
                    0 => service.adjust(&alice, AdjustmentDirection::Add, amount, "promo", "ops").await.map(|_| ()),
                    1 => service.adjust(&alice, AdjustmentDirection::Deduct, amount, "fee", "ops").await.map(|_| ()),
                    2 => service.transfer(&alice, "bob", amount, None).await.map(|_| ()),
                    3 => service.charge_listing_fee(&bob, amount, &format!("listing-{}", i)).await.map(|_| ()),
                    _ => match service.create_topup(&bob, amount.max(Amount::from_minor(100)), "mpesa", "r").await {
                        Ok(request) => service.topups().approve(request.id, "ops").await.map(|_| ()),
                        Err(e) => Err(e),
                    },
                };
            }

            for id in [&alice, &bob] {
                let reconciliation = service.verify_account(id).await.unwrap();
                prop_assert!(reconciliation.is_consistent());
            }
            Ok(())
        })?;
    }
}
