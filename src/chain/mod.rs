//! Blockchain collaborators
//!
//! The ledger only consumes two facts from a chain: how many confirmations a
//! transaction has, and what an address currently holds.

pub mod bitcoin;
pub mod evm;
#[cfg(any(test, feature = "mock-api"))]
pub mod mock;
mod rpc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ChainConfig, ChainKind};
use crate::error::LedgerError;
use crate::retry::Retryable;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("RPC connection error: {0}")]
    Connection(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Transaction failed on chain: {0}")]
    TransactionFailed(String),

    #[error("Chain request timed out")]
    Timeout,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl Retryable for ChainError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::Connection(_) | ChainError::Timeout | ChainError::Rpc { .. }
        )
    }
}

impl From<ChainError> for LedgerError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Timeout => LedgerError::Timeout("chain request".into()),
            other => LedgerError::ExternalService(other.to_string()),
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync + std::fmt::Debug {
    /// Confirmations of a transaction; 0 while unconfirmed.
    async fn get_confirmations(&self, txid: &str) -> Result<u64, ChainError>;

    /// Current balance held at `address`, in whole units of the currency.
    async fn get_address_balance(&self, address: &str) -> Result<Decimal, ChainError>;
}

/// Chain clients keyed by currency code
#[derive(Debug, Clone, Default)]
pub struct ChainClients {
    clients: HashMap<String, Arc<dyn ChainClient>>,
}

impl ChainClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, currency: impl Into<String>, client: Arc<dyn ChainClient>) {
        self.clients.insert(currency.into(), client);
    }

    pub fn with(mut self, currency: impl Into<String>, client: Arc<dyn ChainClient>) -> Self {
        self.insert(currency, client);
        self
    }

    pub fn get(&self, currency: &str) -> Option<&Arc<dyn ChainClient>> {
        self.clients.get(currency)
    }

    /// Build clients from config. Mock entries need the `mock-api` feature.
    pub fn from_config(
        chains: &[ChainConfig],
        currencies: &crate::money::CurrencyRegistry,
    ) -> Result<Self, LedgerError> {
        let mut out = Self::new();
        for chain in chains {
            for currency in &chain.currencies {
                let spec = currencies.get(currency)?;
                let client: Arc<dyn ChainClient> = match chain.kind {
                    ChainKind::Evm => Arc::new(evm::EvmRpcClient::new(chain, spec.decimals)?),
                    ChainKind::Bitcoin => Arc::new(bitcoin::BitcoinRpcClient::new(chain)?),
                    #[cfg(feature = "mock-api")]
                    ChainKind::Mock => Arc::new(mock::MockChainClient::new()),
                    #[cfg(not(feature = "mock-api"))]
                    ChainKind::Mock => {
                        return Err(LedgerError::Validation(
                            "mock chain clients require the mock-api feature".into(),
                        ));
                    }
                };
                out.insert(currency.clone(), client);
            }
        }
        Ok(out)
    }
}
