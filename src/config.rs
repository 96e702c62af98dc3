use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::domain::GuaranteedRules;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub marketplace: MarketplaceConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket server
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the daily rolling log file
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared secret used to verify bearer tokens
    pub token_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceConfig {
    /// Minimum FICO score for guaranteed-pool eligibility
    #[serde(default = "default_guaranteed_min_fico")]
    pub guaranteed_min_fico: i32,
    /// Maximum loan amount for guaranteed-pool eligibility
    #[serde(default = "default_guaranteed_max_amount")]
    pub guaranteed_max_amount: Decimal,
    /// Credits granted to an allocation at every reset
    #[serde(default = "default_credits")]
    pub default_credits: i32,
    /// Days between allocation resets
    #[serde(default = "default_credit_reset_days")]
    pub credit_reset_days: i64,
    /// Guaranteed loans shown to an officer (held + recommended)
    #[serde(default = "default_recommendation_limit")]
    pub recommendation_limit: usize,
    /// Rebid cap applied to new loans
    #[serde(default = "default_max_bids")]
    pub default_max_bids: i32,
}

fn default_guaranteed_min_fico() -> i32 {
    680
}

fn default_guaranteed_max_amount() -> Decimal {
    Decimal::from(1_000_000)
}

fn default_credits() -> i32 {
    3
}

fn default_credit_reset_days() -> i64 {
    30
}

fn default_recommendation_limit() -> usize {
    3
}

fn default_max_bids() -> i32 {
    10
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            guaranteed_min_fico: default_guaranteed_min_fico(),
            guaranteed_max_amount: default_guaranteed_max_amount(),
            default_credits: default_credits(),
            credit_reset_days: default_credit_reset_days(),
            recommendation_limit: default_recommendation_limit(),
            default_max_bids: default_max_bids(),
        }
    }
}

impl MarketplaceConfig {
    pub fn guaranteed_rules(&self) -> GuaranteedRules {
        GuaranteedRules {
            min_fico: self.guaranteed_min_fico,
            max_amount: self.guaranteed_max_amount,
            default_credits: self.default_credits,
            credit_reset_days: self.credit_reset_days,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// Seconds between expiry / credit-reset sweeps (0 disables the sweep)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 10)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("LEADMARKET_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (LEADMARKET_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("LEADMARKET")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configuration for local development and tests
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/leadmarket".to_string(),
                max_connections: default_max_connections(),
            },
            logging: LoggingConfig::default(),
            auth: AuthConfig {
                token_secret: "development-secret".to_string(),
            },
            marketplace: MarketplaceConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.auth.token_secret.trim().len() < 16 {
            errors.push("auth.token_secret must be at least 16 characters".to_string());
        }

        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be positive".to_string());
        }

        let market = &self.marketplace;
        if !(300..=850).contains(&market.guaranteed_min_fico) {
            errors.push("marketplace.guaranteed_min_fico must be between 300 and 850".to_string());
        }

        if market.guaranteed_max_amount <= Decimal::ZERO {
            errors.push("marketplace.guaranteed_max_amount must be positive".to_string());
        }

        if market.default_credits < 0 {
            errors.push("marketplace.default_credits must not be negative".to_string());
        }

        if market.credit_reset_days <= 0 {
            errors.push("marketplace.credit_reset_days must be positive".to_string());
        }

        if market.default_max_bids <= 0 {
            errors.push("marketplace.default_max_bids must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AppConfig::default_config().validate().is_ok());
    }

    #[test]
    fn validate_collects_every_problem() {
        let mut cfg = AppConfig::default_config();
        cfg.auth.token_secret = "short".to_string();
        cfg.marketplace.credit_reset_days = 0;
        cfg.marketplace.guaranteed_min_fico = 900;

        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("token_secret")));
    }

    #[test]
    fn marketplace_defaults_match_guaranteed_rules() {
        let rules = MarketplaceConfig::default().guaranteed_rules();
        assert_eq!(rules, GuaranteedRules::default());
    }
}
