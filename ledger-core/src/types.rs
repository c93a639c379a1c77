//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (integer minor units for money, no floats anywhere)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Wallet account identifier (one account per platform user)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Longest accepted id, in bytes
    pub const MAX_LEN: usize = 256;

    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Non-blank and at most [`AccountId::MAX_LEN`] bytes
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty() && self.0.len() <= Self::MAX_LEN
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Amount of platform credit in minor units of the single platform currency
///
/// Always a non-negative magnitude. Direction lives on the transaction,
/// signed deltas are plain `i64`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    /// Zero credit
    pub const ZERO: Amount = Amount(0);

    /// Create from minor units
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Minor units
    pub const fn minor(self) -> u64 {
        self.0
    }

    /// True for a zero amount
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Validate an untyped boundary value as a strictly positive amount
    pub fn positive(minor: i64) -> crate::Result<Self> {
        if minor <= 0 {
            return Err(crate::Error::InvalidAmount(format!(
                "amount must be positive, got {}",
                minor
            )));
        }
        Ok(Self(minor as u64))
    }

    /// Signed credit delta for this amount
    pub fn as_credit(self) -> crate::Result<i64> {
        i64::try_from(self.0).map_err(|_| {
            crate::Error::InvalidAmount(format!("amount {} exceeds ledger range", self.0))
        })
    }

    /// Signed debit delta for this amount
    pub fn as_debit(self) -> crate::Result<i64> {
        self.as_credit().map(|credit| -credit)
    }

    /// Checked addition
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction (None when the result would be negative)
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Apply a signed delta. None when the result would be negative or overflow.
    pub fn apply_delta(self, delta: i64) -> Option<Amount> {
        if delta >= 0 {
            self.0.checked_add(delta as u64).map(Amount)
        } else {
            self.0.checked_sub(delta.unsigned_abs()).map(Amount)
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wallet account (balance is a projection of its completed transactions)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub account_id: AccountId,

    /// Current balance, never negative
    pub balance: Amount,

    /// Optimistic concurrency counter, bumped on every committed posting
    pub version: u64,

    /// Opened timestamp
    pub created_at: DateTime<Utc>,

    /// Last balance change
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Fresh zero-balance account
    pub fn new(account_id: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            balance: Amount::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Approved mobile-money top-up
    Topup,
    /// Incoming wallet-to-wallet transfer
    TransferIn,
    /// Outgoing wallet-to-wallet transfer
    TransferOut,
    /// Voucher code redeemed
    VoucherRedeem,
    /// Monetary leg of an accepted trade offer
    TradeSettlement,
    /// Operator credit
    AdminCredit,
    /// Operator debit
    AdminDebit,
    /// Reversal credit
    Refund,
    /// Listing fee charge
    ListingFee,
}

impl TransactionType {
    /// Stable wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Topup => "topup",
            TransactionType::TransferIn => "transfer_in",
            TransactionType::TransferOut => "transfer_out",
            TransactionType::VoucherRedeem => "voucher_redeem",
            TransactionType::TradeSettlement => "trade_settlement",
            TransactionType::AdminCredit => "admin_credit",
            TransactionType::AdminDebit => "admin_debit",
            TransactionType::Refund => "refund",
            TransactionType::ListingFee => "listing_fee",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Recorded, not yet applied
    Pending,
    /// Applied to the balance (immutable from here on)
    Completed,
    /// Rejected without effect
    Failed,
    /// Undone by a later transaction
    Reversed,
}

/// Which way a transaction moves the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Balance increases
    Credit,
    /// Balance decreases
    Debit,
}

/// Ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Account this transaction belongs to
    pub account_id: AccountId,

    /// Transaction type
    pub tx_type: TransactionType,

    /// Credit or debit
    pub direction: Direction,

    /// Positive magnitude
    pub amount: Amount,

    /// Optional fee charged on top of the movement
    pub fee: Option<Amount>,

    /// Status
    pub status: TransactionStatus,

    /// Other side of a two-account move
    pub counterparty_account_id: Option<AccountId>,

    /// Idempotency key, applied at most once
    pub reference: String,

    /// Human-readable description
    pub description: String,

    /// Account balance right after this transaction committed
    pub balance_after: Amount,

    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Signed contribution to the account balance
    pub fn signed_amount(&self) -> i128 {
        match self.direction {
            Direction::Credit => self.amount.minor() as i128,
            Direction::Debit => -(self.amount.minor() as i128),
        }
    }

    /// Check if the transaction counts towards the balance
    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }
}
