//! EVM JSON-RPC client (Ethereum, Polygon, ...)

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::rpc::{RpcTransport, parse_hex_u128};
use super::{ChainClient, ChainError};
use crate::config::ChainConfig;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    block_number: Option<String>,
    status: Option<String>,
}

#[derive(Debug)]
pub struct EvmRpcClient {
    transport: RpcTransport,
    decimals: u32,
}

impl EvmRpcClient {
    pub fn new(config: &ChainConfig, decimals: u32) -> Result<Self, ChainError> {
        let url = config
            .rpc_url
            .as_deref()
            .ok_or_else(|| ChainError::Connection("evm chain requires rpc_url".into()))?;
        info!(url = %url, currencies = ?config.currencies, "Initializing EVM RPC client");
        Ok(Self {
            transport: RpcTransport::new(
                url,
                "2.0",
                None,
                Duration::from_millis(config.timeout_ms),
            )?,
            decimals,
        })
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let hex: String = self
            .transport
            .call("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| ChainError::InvalidResponse("null block number".into()))?;
        u64::try_from(parse_hex_u128(&hex)?)
            .map_err(|_| ChainError::InvalidResponse(format!("block number out of range: {}", hex)))
    }
}

/// Convert a wei quantity to whole units
fn from_base_units(wei: u128, decimals: u32) -> Result<Decimal, ChainError> {
    let wei = i128::try_from(wei)
        .map_err(|_| ChainError::InvalidResponse("balance out of range".into()))?;
    Decimal::try_from_i128_with_scale(wei, decimals)
        .map(|d| d.normalize())
        .map_err(|e| ChainError::InvalidResponse(format!("balance out of range: {}", e)))
}

#[async_trait]
impl ChainClient for EvmRpcClient {
    async fn get_confirmations(&self, txid: &str) -> Result<u64, ChainError> {
        let receipt: Option<TransactionReceipt> = self
            .transport
            .call("eth_getTransactionReceipt", json!([txid]))
            .await?;

        // No receipt yet: still in the mempool
        let Some(receipt) = receipt else {
            debug!(txid = %txid, "No receipt yet");
            return Ok(0);
        };
        if receipt.status.as_deref() == Some("0x0") {
            return Err(ChainError::TransactionFailed(txid.to_string()));
        }
        let Some(mined_at) = receipt.block_number else {
            return Ok(0);
        };
        let mined_at = u64::try_from(parse_hex_u128(&mined_at)?)
            .map_err(|_| ChainError::InvalidResponse("block number out of range".into()))?;
        let head = self.block_number().await?;
        Ok(head.saturating_sub(mined_at) + 1)
    }

    async fn get_address_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        let hex: String = self
            .transport
            .call("eth_getBalance", json!([address, "latest"]))
            .await?
            .ok_or_else(|| ChainError::InvalidResponse("null balance".into()))?;
        from_base_units(parse_hex_u128(&hex)?, self.decimals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainKind;
    use std::str::FromStr;

    #[test]
    fn test_wei_conversion() {
        assert_eq!(
            from_base_units(1_500_000_000_000_000_000, 18).unwrap(),
            Decimal::from_str("1.5").unwrap()
        );
        assert_eq!(from_base_units(0, 18).unwrap(), Decimal::ZERO);
        assert_eq!(
            from_base_units(1, 18).unwrap(),
            Decimal::from_str("0.000000000000000001").unwrap()
        );
    }

    #[test]
    fn test_requires_rpc_url() {
        let config = ChainConfig {
            kind: ChainKind::Evm,
            currencies: vec!["ETH".into()],
            rpc_url: None,
            rpc_user: None,
            rpc_password: None,
            timeout_ms: 1_000,
        };
        assert!(EvmRpcClient::new(&config, 18).is_err());
    }

    #[test]
    fn test_receipt_deserialize() {
        let receipt: TransactionReceipt =
            serde_json::from_str(r#"{"blockNumber":"0x10","status":"0x1","gasUsed":"0x5208"}"#)
                .unwrap();
        assert_eq!(receipt.block_number.as_deref(), Some("0x10"));
        assert_eq!(receipt.status.as_deref(), Some("0x1"));
    }
}
