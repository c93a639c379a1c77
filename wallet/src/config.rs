//! Configuration for the wallet service

use ledger_core::Amount;
use serde::{Deserialize, Serialize};

/// Wallet service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Ledger store and engine configuration
    pub ledger: ledger_core::Config,

    /// Voucher configuration
    pub voucher: VoucherConfig,

    /// Top-up workflow configuration
    pub topup: TopUpConfig,

    /// Trade offer configuration
    pub offers: OfferConfig,

    /// Balance query and display configuration
    pub wallet: WalletConfig,

    /// Metrics listen address
    pub metrics_listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "wallet-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            ledger: ledger_core::Config::default(),
            voucher: VoucherConfig::default(),
            topup: TopUpConfig::default(),
            offers: OfferConfig::default(),
            wallet: WalletConfig::default(),
            metrics_listen_addr: "0.0.0.0:9092".to_string(),
        }
    }
}

/// Voucher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoucherConfig {
    /// Maximum vouchers per generated batch
    pub max_batch_size: u32,

    /// Redraws for one code before giving up
    pub max_draw_attempts: u32,

    /// Expiry used when a batch does not specify one
    pub default_expiry_days: u32,

    /// Interval of the background expiry sweep (seconds)
    pub expiry_sweep_interval_secs: u64,
}

impl Default for VoucherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            max_draw_attempts: 32,
            default_expiry_days: 365,
            expiry_sweep_interval_secs: 3600,
        }
    }
}

/// Top-up workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopUpConfig {
    /// Smallest accepted top-up (minor units)
    pub min_amount: u64,

    /// Largest accepted top-up (minor units)
    pub max_amount: u64,

    /// Accepted mobile-money providers; empty accepts any
    pub accepted_banks: Vec<String>,
}

impl Default for TopUpConfig {
    fn default() -> Self {
        Self {
            min_amount: 100,
            max_amount: 5_000_000,
            accepted_banks: Vec::new(),
        }
    }
}

impl TopUpConfig {
    /// Minimum as an amount
    pub fn min(&self) -> Amount {
        Amount::from_minor(self.min_amount)
    }

    /// Maximum as an amount
    pub fn max(&self) -> Amount {
        Amount::from_minor(self.max_amount)
    }
}

/// Trade offer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferConfig {
    /// Maximum trade items per offer
    pub max_trade_items: usize,
}

impl Default for OfferConfig {
    fn default() -> Self {
        Self { max_trade_items: 5 }
    }
}

/// Balance query and display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Transactions returned with a balance query
    pub recent_transactions_limit: usize,

    /// Decimal places of the platform currency (minor units per major unit = 10^scale)
    pub minor_unit_scale: u32,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            recent_transactions_limit: 20,
            minor_unit_scale: 2,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        self.ledger.apply_env()?;

        if let Ok(addr) = std::env::var("WALLET_METRICS_ADDR") {
            self.metrics_listen_addr = addr;
        }

        if let Ok(min) = std::env::var("WALLET_TOPUP_MIN") {
            self.topup.min_amount = min
                .parse()
                .map_err(|e| crate::Error::Config(format!("WALLET_TOPUP_MIN: {}", e)))?;
        }

        if let Ok(max) = std::env::var("WALLET_TOPUP_MAX") {
            self.topup.max_amount = max
                .parse()
                .map_err(|e| crate::Error::Config(format!("WALLET_TOPUP_MAX: {}", e)))?;
        }

        self.validate()
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> crate::Result<()> {
        self.ledger.validate()?;

        if self.voucher.max_batch_size == 0 {
            return Err(crate::Error::Config("voucher.max_batch_size must be > 0".to_string()));
        }
        if self.voucher.max_draw_attempts == 0 {
            return Err(crate::Error::Config("voucher.max_draw_attempts must be > 0".to_string()));
        }
        if self.topup.min_amount == 0 || self.topup.min_amount > self.topup.max_amount {
            return Err(crate::Error::Config(format!(
                "topup range [{}, {}] is empty",
                self.topup.min_amount, self.topup.max_amount
            )));
        }
        if self.wallet.minor_unit_scale > 18 {
            return Err(crate::Error::Config("wallet.minor_unit_scale must be <= 18".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.voucher.max_batch_size, 1000);
        assert_eq!(config.offers.max_trade_items, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_nested_ledger_section() {
        let config: Config = toml::from_str(
            r#"
            [ledger]
            data_dir = "/var/lib/wallet"

            [ledger.engine]
            max_retries = 4

            [topup]
            min_amount = 500
            accepted_banks = ["mpesa", "airtel"]
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.data_dir, std::path::PathBuf::from("/var/lib/wallet"));
        assert_eq!(config.ledger.engine.max_retries, 4);
        assert_eq!(config.topup.min(), Amount::from_minor(500));
        assert_eq!(config.topup.max_amount, 5_000_000);
        assert_eq!(config.topup.accepted_banks.len(), 2);
    }

    #[test]
    fn test_validate_rejects_inverted_topup_range() {
        let mut config = Config::default();
        config.topup.min_amount = 10_000;
        config.topup.max_amount = 100;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }
}
