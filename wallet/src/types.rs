//! Core types for the wallet workflows

use chrono::{DateTime, Utc};
use ledger_core::{AccountId, Amount, Transaction};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of digits in a voucher code
pub const VOUCHER_CODE_LEN: usize = 10;

/// Size of the voucher code space (10^10)
const VOUCHER_CODE_SPACE: u64 = 10_000_000_000;

/// Normalized 10-digit voucher code
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoucherCode(String);

impl VoucherCode {
    /// Normalize user input (trim, drop spaces and dashes) and validate
    pub fn parse(input: &str) -> crate::Result<Self> {
        let normalized: String = input
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();

        if normalized.len() != VOUCHER_CODE_LEN || !normalized.bytes().all(|b| b.is_ascii_digit()) {
            return Err(crate::Error::InvalidVoucherCode(input.to_string()));
        }
        Ok(Self(normalized))
    }

    /// Draw a uniformly random code
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let value = rng.gen_range(0..VOUCHER_CODE_SPACE);
        Self(format!("{:010}", value))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoucherCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Voucher status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    /// Issued, redeemable
    Unused,
    /// Redeemed exactly once
    Used,
    /// Withdrawn by an operator
    Disabled,
    /// Passed its expiry while unused
    Expired,
}

impl VoucherStatus {
    /// No further transitions allowed
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VoucherStatus::Unused)
    }
}

impl fmt::Display for VoucherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoucherStatus::Unused => "unused",
            VoucherStatus::Used => "used",
            VoucherStatus::Disabled => "disabled",
            VoucherStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Prepaid single-use voucher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// Globally unique code
    pub code: VoucherCode,

    /// Face value
    pub amount: Amount,

    /// Status
    pub status: VoucherStatus,

    /// Distributing vendor
    pub vendor: String,

    /// Generation batch
    pub batch_id: Uuid,

    /// Operator that generated the batch
    pub created_by: String,

    /// Redeeming account
    pub used_by: Option<AccountId>,

    /// Redemption time
    pub used_at: Option<DateTime<Utc>>,

    /// Operator that disabled the voucher
    pub disabled_by: Option<String>,

    /// Disable time
    pub disabled_at: Option<DateTime<Utc>>,

    /// Last redeemable instant
    pub expires_at: DateTime<Utc>,

    /// Issue time
    pub created_at: DateTime<Utc>,
}

impl Voucher {
    /// Still unused but past its expiry
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == VoucherStatus::Unused && now > self.expires_at
    }
}

/// Successful voucher redemption
#[derive(Debug, Clone)]
pub struct Redemption {
    /// Redeemed code
    pub code: VoucherCode,
    /// Credited amount
    pub amount: Amount,
    /// Balance after the credit
    pub new_balance: Amount,
    /// `voucher_redeem` transaction
    pub transaction: Transaction,
}

/// Filter for voucher listings and exports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoucherFilter {
    /// Only this vendor
    pub vendor: Option<String>,
    /// Only this face value
    pub amount: Option<Amount>,
}

impl VoucherFilter {
    /// Check a voucher against the filter
    pub fn matches(&self, voucher: &Voucher) -> bool {
        self.vendor.as_deref().map_or(true, |v| voucher.vendor == v)
            && self.amount.map_or(true, |a| voucher.amount == a)
    }
}

/// Voucher export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated with header
    Csv,
    /// One code per line
    Text,
    /// Array of voucher objects
    Json,
}

impl ExportFormat {
    /// File extension
    pub fn extension(&self) -> &str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Text => "txt",
            ExportFormat::Json => "json",
        }
    }

    /// MIME type
    pub fn mime_type(&self) -> &str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Text => "text/plain",
            ExportFormat::Json => "application/json",
        }
    }
}

/// Top-up request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopUpStatus {
    /// Awaiting operator review
    Pending,
    /// Funds credited
    Approved,
    /// Declined, nothing credited
    Rejected,
}

impl fmt::Display for TopUpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TopUpStatus::Pending => "pending",
            TopUpStatus::Approved => "approved",
            TopUpStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Externally deposited funds awaiting review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopUpRequest {
    /// Request ID (also the ledger reference on approval)
    pub id: Uuid,

    /// Requesting user
    pub user_id: AccountId,

    /// Deposited amount
    pub amount: Amount,

    /// Mobile-money provider / bank
    pub bank_id: String,

    /// Proof-of-payment reference
    pub receipt_reference: String,

    /// Status
    pub status: TopUpStatus,

    /// Reason given on rejection
    pub rejection_reason: Option<String>,

    /// Submission time
    pub created_at: DateTime<Utc>,

    /// Review time
    pub processed_at: Option<DateTime<Utc>>,

    /// Reviewing operator
    pub processed_by: Option<String>,

    /// `topup` transaction created on approval
    pub resulting_transaction_id: Option<Uuid>,
}

/// Approved top-up
#[derive(Debug, Clone)]
pub struct TopUpApproval {
    /// Request after approval
    pub request: TopUpRequest,
    /// `topup` transaction
    pub transaction: Transaction,
    /// Balance after the credit
    pub new_balance: Amount,
}

/// Trade offer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    /// Awaiting the receiver
    Pending,
    /// Accepted and settled
    Accepted,
    /// Declined
    Rejected,
    /// Superseded by a counter-offer
    Countered,
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
            OfferStatus::Countered => "countered",
        };
        f.write_str(s)
    }
}

/// Offer combining wallet credit with physical items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOffer {
    /// Offer ID (also the settlement reference prefix)
    pub id: Uuid,

    /// Listing the offer is made on
    pub listing_id: String,

    /// Paying side
    pub sender_account_id: AccountId,

    /// Listing owner, the only party that may resolve the offer
    pub receiver_account_id: AccountId,

    /// Credit moved on acceptance (may be zero)
    pub wallet_amount: Amount,

    /// Non-monetary items offered
    pub trade_item_descriptions: Vec<String>,

    /// Status
    pub status: OfferStatus,

    /// Credit leg of the settlement
    pub settlement_transaction_id: Option<Uuid>,

    /// Offer created when this one was countered
    pub counter_offer_id: Option<Uuid>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Acceptance / rejection / counter time
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TradeOffer {
    /// Offers something: credit, items, or both
    pub fn is_economically_valid(&self) -> bool {
        !self.wallet_amount.is_zero() || !self.trade_item_descriptions.is_empty()
    }
}

/// Admin adjustment direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentDirection {
    /// Credit the user
    Add,
    /// Debit the user
    Deduct,
}

/// Admin adjustment audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry ID (time-ordered)
    pub id: Uuid,

    /// Operator that made the adjustment
    pub operator: String,

    /// Adjusted user
    pub user_id: AccountId,

    /// Add or deduct
    pub direction: AdjustmentDirection,

    /// Adjusted amount
    pub amount: Amount,

    /// Operator-supplied reason
    pub description: String,

    /// Resulting ledger transaction
    pub transaction_id: Uuid,

    /// Adjustment time
    pub timestamp: DateTime<Utc>,
}

/// Completed admin adjustment
#[derive(Debug, Clone)]
pub struct Adjustment {
    /// Audit record written with the posting
    pub audit: AuditEntry,
    /// `admin_credit` / `admin_debit` transaction
    pub transaction: Transaction,
    /// Balance after the adjustment
    pub new_balance: Amount,
}

/// Balance query result
#[derive(Debug, Clone, Serialize)]
pub struct WalletSnapshot {
    /// Account
    pub account_id: AccountId,
    /// Spendable balance
    pub balance: Amount,
    /// Sum of pending top-ups (not spendable)
    pub pending_balance: Amount,
    /// Latest transactions, newest first
    pub recent_transactions: Vec<Transaction>,
}

/// Completed wallet transfer, from the sender's point of view
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    /// Sender's `transfer_out` transaction
    pub transaction: Transaction,
    /// Sender's balance after the transfer
    pub new_balance: Amount,
    /// Receiver's `transfer_in` transaction
    pub credit: Transaction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_voucher_code_normalization() {
        assert_eq!(VoucherCode::parse(" 12345-67890 ").unwrap().as_str(), "1234567890");
        assert_eq!(VoucherCode::parse("123 456 7890").unwrap().as_str(), "1234567890");
        assert_eq!(VoucherCode::parse("0000000001").unwrap().as_str(), "0000000001");
    }

    #[test]
    fn test_voucher_code_rejects_malformed() {
        for input in ["", "123456789", "12345678901", "12345abcde", "１２３４５６７８９０"] {
            assert!(
                matches!(VoucherCode::parse(input), Err(crate::Error::InvalidVoucherCode(_))),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_random_codes_are_ten_digits() {
        let mut rng = OsRng;
        for _ in 0..100 {
            let code = VoucherCode::random(&mut rng);
            assert_eq!(code.as_str().len(), VOUCHER_CODE_LEN);
            assert!(VoucherCode::parse(code.as_str()).is_ok());
        }
    }

    #[test]
    fn test_offer_economic_validity() {
        let mut offer = TradeOffer {
            id: Uuid::now_v7(),
            listing_id: "listing-1".to_string(),
            sender_account_id: AccountId::new("alice"),
            receiver_account_id: AccountId::new("bob"),
            wallet_amount: Amount::ZERO,
            trade_item_descriptions: vec![],
            status: OfferStatus::Pending,
            settlement_transaction_id: None,
            counter_offer_id: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        assert!(!offer.is_economically_valid());

        offer.trade_item_descriptions.push("bicycle".to_string());
        assert!(offer.is_economically_valid());

        offer.trade_item_descriptions.clear();
        offer.wallet_amount = Amount::from_minor(1);
        assert!(offer.is_economically_valid());
    }

    #[test]
    fn test_voucher_filter() {
        let voucher = Voucher {
            code: VoucherCode::parse("1234567890").unwrap(),
            amount: Amount::from_minor(5_000),
            status: VoucherStatus::Unused,
            vendor: "kiosk-a".to_string(),
            batch_id: Uuid::now_v7(),
            created_by: "ops".to_string(),
            used_by: None,
            used_at: None,
            disabled_by: None,
            disabled_at: None,
            expires_at: Utc::now(),
            created_at: Utc::now(),
        };

        assert!(VoucherFilter::default().matches(&voucher));
        let by_vendor = VoucherFilter { vendor: Some("kiosk-b".to_string()), amount: None };
        assert!(!by_vendor.matches(&voucher));
        let by_amount = VoucherFilter { vendor: None, amount: Some(Amount::from_minor(5_000)) };
        assert!(by_amount.matches(&voucher));
    }
}
