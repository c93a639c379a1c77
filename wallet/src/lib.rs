//! Wallet Service
//!
//! Workflows around the wallet ledger: vouchers, mobile-money top-ups, trade
//! offer settlement and admin adjustments.
//!
//! # Architecture
//!
//! Every workflow keeps its own records (vouchers, top-up requests, offers,
//! audit entries) but changes balances only through
//! [`ledger_core::TransactionEngine`]. A workflow status flip and the ledger
//! movement it causes commit in one atomic unit:
//!
//! 1. **Vouchers**: `unused → used` with the `voucher_redeem` credit
//! 2. **Top-ups**: `pending → approved` with the `topup` credit
//! 3. **Offers**: `pending → accepted` with the credit leg of the settlement
//! 4. **Admin**: audit entry with the `admin_credit` / `admin_debit` posting
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{AccountId, Amount};
//! use wallet::{Config, WalletService};
//!
//! #[tokio::main]
//! async fn main() -> wallet::Result<()> {
//!     let service = WalletService::open(Config::default())?;
//!     let alice = AccountId::new("alice");
//!     service.open_account(&alice).await?;
//!
//!     let vouchers = service
//!         .vouchers()
//!         .generate_batch(Amount::from_minor(5_000), 10, "kiosk-1", None, "ops")
//!         .await?;
//!     let redemption = service.redeem_voucher(&alice, vouchers[0].code.as_str()).await?;
//!     println!("New balance: {}", redemption.new_balance);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod admin;
pub mod config;
pub mod error;
pub mod export;
pub mod offers;
pub mod service;
pub mod topup;
pub mod types;
pub mod voucher;

// Re-exports
pub use admin::AdminGateway;
pub use config::Config;
pub use error::{Error, Result};
pub use offers::SettlementCoordinator;
pub use service::WalletService;
pub use topup::TopUpWorkflow;
pub use types::*;
pub use voucher::VoucherService;
