//! Minimal JSON-RPC transport shared by the chain clients

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::ChainError;

#[derive(Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<R> {
    result: Option<R>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug)]
pub(crate) struct RpcTransport {
    client: reqwest::Client,
    url: String,
    version: &'static str,
    auth: Option<(String, String)>,
    next_id: AtomicU64,
}

impl RpcTransport {
    pub(crate) fn new(
        url: &str,
        version: &'static str,
        auth: Option<(String, String)>,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Connection(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
            version,
            auth,
            next_id: AtomicU64::new(1),
        })
    }

    /// Call `method`; a JSON `null` result is returned as `None`.
    pub(crate) async fn call<P, R>(&self, method: &str, params: P) -> Result<Option<R>, ChainError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: self.version,
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some((user, password)) = &self.auth {
            builder = builder.basic_auth(user, Some(password));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ChainError::Timeout
            } else {
                ChainError::Connection(e.to_string())
            }
        })?;

        let body: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

        if let Some(err) = body.error {
            debug!(method, code = err.code, message = %err.message, "RPC returned error");
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result)
    }
}

/// Parse a 0x-prefixed hex quantity
pub(crate) fn parse_hex_u128(value: &str) -> Result<u128, ChainError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidResponse(format!("missing 0x prefix: {}", value)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("bad hex quantity {}: {}", value, e)))
}
