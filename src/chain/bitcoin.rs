//! bitcoind JSON-RPC client
//!
//! Confirmations come from `getrawtransaction` (requires `txindex=1`),
//! address balances from `scantxoutset`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::rpc::RpcTransport;
use super::{ChainClient, ChainError};
use crate::config::ChainConfig;

/// bitcoind RPC_INVALID_ADDRESS_OR_KEY, returned for unknown txids
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

#[derive(Deserialize, Debug)]
struct RawTransaction {
    #[serde(default)]
    confirmations: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct ScanTxOutSet {
    success: bool,
    total_amount: serde_json::Number,
}

#[derive(Debug)]
pub struct BitcoinRpcClient {
    transport: RpcTransport,
}

impl BitcoinRpcClient {
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        let url = config
            .rpc_url
            .as_deref()
            .ok_or_else(|| ChainError::Connection("bitcoin chain requires rpc_url".into()))?;
        let auth = match (&config.rpc_user, &config.rpc_password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };
        info!(url = %url, "Initializing bitcoind RPC client");
        Ok(Self {
            transport: RpcTransport::new(url, "1.0", auth, Duration::from_millis(config.timeout_ms))?,
        })
    }
}

/// bitcoind reports BTC amounts as JSON numbers
fn parse_btc_amount(n: &serde_json::Number) -> Result<Decimal, ChainError> {
    let s = n.to_string();
    Decimal::from_str(&s)
        .or_else(|_| Decimal::from_scientific(&s))
        .map_err(|e| ChainError::InvalidResponse(format!("bad amount {}: {}", s, e)))
}

#[async_trait]
impl ChainClient for BitcoinRpcClient {
    async fn get_confirmations(&self, txid: &str) -> Result<u64, ChainError> {
        let tx: Option<RawTransaction> = match self
            .transport
            .call("getrawtransaction", json!([txid, true]))
            .await
        {
            Err(ChainError::Rpc { code, .. }) if code == RPC_INVALID_ADDRESS_OR_KEY => {
                return Err(ChainError::TransactionNotFound(txid.to_string()));
            }
            other => other?,
        };
        Ok(tx.and_then(|t| t.confirmations).unwrap_or(0))
    }

    async fn get_address_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        let descriptor = format!("addr({})", address);
        let scan: ScanTxOutSet = self
            .transport
            .call("scantxoutset", json!(["start", [descriptor]]))
            .await?
            .ok_or_else(|| ChainError::InvalidResponse("null scantxoutset result".into()))?;
        if !scan.success {
            return Err(ChainError::InvalidResponse(format!(
                "scantxoutset did not complete for {}",
                address
            )));
        }
        parse_btc_amount(&scan.total_amount)
    }
}
