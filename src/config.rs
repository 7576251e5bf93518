use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::money::AssetKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub server: ServerConfig,
    /// PostgreSQL connection URL; the in-memory store is used when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub currencies: Vec<CurrencyConfig>,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub deposit_pollers: Vec<DepositPollerConfig>,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub proof_of_reserves: ProofOfReservesConfig,
    #[serde(default)]
    pub withdrawals: WithdrawalConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Account credited with trade and withdrawal fees
    #[serde(default)]
    pub fee_account: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// Upper bound on waiting for a wallet row lock
    pub lock_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 50,
            acquire_timeout_ms: 5_000,
            lock_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CurrencyConfig {
    pub code: String,
    pub decimals: u32,
    pub kind: AssetKind,
    #[serde(default)]
    pub required_confirmations: u32,
}

/// Chain RPC endpoint serving one or more currencies
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChainConfig {
    pub kind: ChainKind,
    pub currencies: Vec<String>,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub rpc_user: Option<String>,
    #[serde(default)]
    pub rpc_password: Option<String>,
    #[serde(default = "default_chain_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_chain_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Bitcoin,
    Evm,
    Mock,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DepositPollerConfig {
    pub name: String,
    pub currencies: Vec<String>,
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    100
}

impl DepositPollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconciliationConfig {
    pub interval_secs: u64,
    /// Fractional variance above which an asset is flagged (0.01 = 1%)
    pub variance_threshold: rust_decimal::Decimal,
    pub chain_timeout_ms: u64,
    pub address_concurrency: usize,
    /// Cap on discrepancy rows embedded in one report
    pub max_reported_discrepancies: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3_600,
            variance_threshold: rust_decimal::Decimal::new(1, 2),
            chain_timeout_ms: 30_000,
            address_concurrency: 8,
            max_reported_discrepancies: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProofOfReservesConfig {
    pub interval_secs: u64,
}

impl Default for ProofOfReservesConfig {
    fn default() -> Self {
        Self {
            interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WithdrawalConfig {
    pub worker_interval_secs: u64,
    pub broadcast_timeout_ms: u64,
    pub confirmation_timeout_ms: u64,
    pub batch_size: usize,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            worker_interval_secs: 10,
            broadcast_timeout_ms: 30_000,
            confirmation_timeout_ms: 30_000,
            batch_size: 50,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
            path: config_path.clone(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.postgres_url = Some(url);
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Poller and chain entries must reference configured currencies.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.currencies.is_empty() {
            return Err(ConfigError::Invalid("no currencies configured".into()));
        }
        let known = |code: &str| self.currencies.iter().any(|c| c.code == code);
        for poller in &self.deposit_pollers {
            if poller.interval_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "poller {} has zero interval",
                    poller.name
                )));
            }
            if let Some(unknown) = poller.currencies.iter().find(|c| !known(c)) {
                return Err(ConfigError::Invalid(format!(
                    "poller {} references unknown currency {}",
                    poller.name, unknown
                )));
            }
        }
        for chain in &self.chains {
            if let Some(unknown) = chain.currencies.iter().find(|c| !known(c)) {
                return Err(ConfigError::Invalid(format!(
                    "chain references unknown currency {}",
                    unknown
                )));
            }
        }
        if self.reconciliation.variance_threshold.is_sign_negative() {
            return Err(ConfigError::Invalid(
                "variance_threshold must not be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }
}
