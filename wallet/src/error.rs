//! Error types for the wallet workflows

use crate::types::{OfferStatus, TopUpStatus, VoucherStatus};
use ledger_core::{AccountId, Amount};
use thiserror::Error;
use uuid::Uuid;

/// Result type for wallet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wallet errors
#[derive(Error, Debug)]
pub enum Error {
    /// Debit larger than the available balance
    #[error("Insufficient balance on {account_id}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        /// Paying account
        account_id: AccountId,
        /// Balance at check time
        balance: Amount,
        /// Requested amount
        requested: Amount,
    },

    /// Account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Optimistic retries exhausted on a contended account
    #[error("Concurrent modification of {account_id}, retry later")]
    ConcurrentModification {
        /// Contended account
        account_id: AccountId,
    },

    /// Reference already used by a different operation
    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    /// Voucher code unknown
    #[error("Voucher not found: {0}")]
    VoucherNotFound(String),

    /// Voucher passed its expiry
    #[error("Voucher expired: {0}")]
    VoucherExpired(String),

    /// Voucher already redeemed
    #[error("Voucher already used: {0}")]
    VoucherAlreadyUsed(String),

    /// Voucher withdrawn by an operator
    #[error("Voucher disabled: {0}")]
    VoucherDisabled(String),

    /// Could not draw a free code
    #[error("Voucher code space exhausted after {attempts} draws")]
    CodeSpaceExhausted {
        /// Draws attempted for one code
        attempts: u32,
    },

    /// Voucher is not in a state that allows the operation
    #[error("Voucher {code} is {status}")]
    InvalidVoucherState {
        /// Voucher code
        code: String,
        /// Current status
        status: VoucherStatus,
    },

    /// Top-up request already processed
    #[error("Top-up request {id} is {status}, not pending")]
    RequestNotPending {
        /// Request ID
        id: Uuid,
        /// Current status
        status: TopUpStatus,
    },

    /// Top-up request unknown
    #[error("Top-up request not found: {0}")]
    RequestNotFound(Uuid),

    /// Sender cannot cover the offer at acceptance time
    #[error("Insufficient balance to settle offer {offer_id}: balance {balance}, required {required}")]
    InsufficientBalanceAtSettlement {
        /// Offer being accepted
        offer_id: Uuid,
        /// Sender balance at check time
        balance: Amount,
        /// Offer wallet amount
        required: Amount,
    },

    /// Trade offer unknown
    #[error("Offer not found: {0}")]
    OfferNotFound(Uuid),

    /// Trade offer already resolved
    #[error("Offer {id} is {status}, not pending")]
    OfferNotPending {
        /// Offer ID
        id: Uuid,
        /// Current status
        status: OfferStatus,
    },

    /// Caller is not the offer receiver
    #[error("{account_id} is not the recipient of offer {offer_id}")]
    NotOfferRecipient {
        /// Offer ID
        offer_id: Uuid,
        /// Caller
        account_id: AccountId,
    },

    /// Admin deduction would take the balance below zero
    #[error("Deducting {requested} from {account_id} would result in a negative balance ({balance})")]
    WouldResultInNegativeBalance {
        /// Adjusted account
        account_id: AccountId,
        /// Balance at check time
        balance: Amount,
        /// Requested deduction
        requested: Amount,
    },

    /// Invalid amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed voucher code
    #[error("Invalid voucher code: {0:?}")]
    InvalidVoucherCode(String),

    /// Request validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(ledger_core::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::AccountNotFound(_) => "account_not_found",
            Error::ConcurrentModification { .. } => "concurrent_modification",
            Error::DuplicateReference(_) => "duplicate_reference",
            Error::VoucherNotFound(_) => "voucher_not_found",
            Error::VoucherExpired(_) => "voucher_expired",
            Error::VoucherAlreadyUsed(_) => "voucher_already_used",
            Error::VoucherDisabled(_) => "voucher_disabled",
            Error::CodeSpaceExhausted { .. } => "code_space_exhausted",
            Error::InvalidVoucherState { .. } => "invalid_voucher_state",
            Error::RequestNotPending { .. } => "request_not_pending",
            Error::RequestNotFound(_) => "request_not_found",
            Error::InsufficientBalanceAtSettlement { .. } => "insufficient_balance_at_settlement",
            Error::OfferNotFound(_) => "offer_not_found",
            Error::OfferNotPending { .. } => "offer_not_pending",
            Error::NotOfferRecipient { .. } => "not_offer_recipient",
            Error::WouldResultInNegativeBalance { .. } => "would_result_in_negative_balance",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::InvalidVoucherCode(_) => "invalid_voucher_code",
            Error::Validation(_) => "validation",
            Error::Ledger(e) => e.kind(),
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }

    /// Caused by the request rather than the system (4xx rather than 5xx)
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Error::ConcurrentModification { .. }
                | Error::CodeSpaceExhausted { .. }
                | Error::Ledger(_)
                | Error::Serialization(_)
                | Error::Config(_)
                | Error::Io(_)
        )
    }
}

impl From<ledger_core::Error> for Error {
    fn from(err: ledger_core::Error) -> Self {
        use ledger_core::Error as Ledger;

        match err {
            Ledger::AccountNotFound(account_id) => Error::AccountNotFound(account_id),
            Ledger::InsufficientBalance {
                account_id,
                balance,
                requested,
            } => Error::InsufficientBalance {
                account_id,
                balance,
                requested,
            },
            Ledger::ConcurrentModification { account_id, .. } => {
                Error::ConcurrentModification { account_id }
            }
            Ledger::DuplicateReference(reference) => Error::DuplicateReference(reference),
            Ledger::InvalidAmount(msg) => Error::InvalidAmount(msg),
            Ledger::InvalidEntry(msg) => Error::Validation(msg),
            other => Error::Ledger(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_are_lifted() {
        let err: Error = ledger_core::Error::InsufficientBalance {
            account_id: AccountId::new("alice"),
            balance: Amount::from_minor(10),
            requested: Amount::from_minor(20),
        }
        .into();
        assert_eq!(err.kind(), "insufficient_balance");
        assert!(err.is_client_error());

        let err: Error = ledger_core::Error::Storage("disk full".to_string()).into();
        assert_eq!(err.kind(), "storage");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_domain_kinds() {
        assert_eq!(Error::VoucherAlreadyUsed("1234567890".into()).kind(), "voucher_already_used");
        let err = Error::RequestNotPending {
            id: Uuid::nil(),
            status: TopUpStatus::Approved,
        };
        assert_eq!(err.kind(), "request_not_pending");
        assert!(err.to_string().contains("approved"));
    }
}
