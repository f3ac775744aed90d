//! JSON-RPC read client
//!
//! Provides eth_call and receipt reads with automatic failover across a
//! primary endpoint and an ordered list of fallbacks.

use alloy_primitives::{Address, Bytes, B256};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RpcConfig;

/// Mined transaction receipt, reduced to the fields the pipeline needs.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
    /// False means the transaction reverted on chain.
    pub success: bool,
}

/// Read-only chain access. The provider connection is shared; read usage
/// is always safe. Kept as a trait so the pipeline is testable against an
/// in-memory fake.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn call(&self, to: Address, data: &Bytes) -> Result<Bytes>;
    async fn receipt(&self, hash: B256) -> Result<Option<TxReceipt>>;
}

/// JSON-RPC client with endpoint failover.
pub struct RpcClient {
    endpoints: Vec<String>,
    active_index: RwLock<usize>,
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let mut endpoints = vec![config.primary_url.clone()];
        endpoints.extend(config.fallback_urls.iter().cloned());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build HTTP client")?;

        info!(
            fallbacks = endpoints.len() - 1,
            "RPC client initialized"
        );

        Ok(Self {
            endpoints,
            active_index: RwLock::new(0),
            client,
        })
    }

    async fn active_endpoint(&self) -> String {
        let index = *self.active_index.read().await;
        self.endpoints
            .get(index)
            .cloned()
            .unwrap_or_else(|| self.endpoints[0].clone())
    }

    /// Rotate to the next endpoint. Returns false when there is nowhere
    /// left to rotate to.
    async fn failover(&self) -> bool {
        if self.endpoints.len() < 2 {
            return false;
        }
        let mut index = self.active_index.write().await;
        *index = (*index + 1) % self.endpoints.len();
        warn!(index = *index, "RPC failover");
        true
    }

    /// Issue one JSON-RPC request, rotating through endpoints on transport
    /// failure. A JSON-RPC level error is returned as-is; it is the
    /// node's answer, not a connectivity problem.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut last_err = None;
        for attempt in 0..self.endpoints.len() {
            let endpoint = self.active_endpoint().await;
            let started = Instant::now();

            let response = self.client.post(&endpoint).json(&body).send().await;
            match response {
                Ok(response) => {
                    let envelope: RpcEnvelope = response
                        .json()
                        .await
                        .with_context(|| format!("malformed JSON-RPC response from {endpoint}"))?;
                    debug!(method, elapsed_ms = started.elapsed().as_millis() as u64, "rpc call");

                    if let Some(error) = envelope.error {
                        return Err(anyhow!(
                            "RPC error {} calling {method}: {}",
                            error.code,
                            error.message
                        ));
                    }
                    return envelope
                        .result
                        .ok_or_else(|| anyhow!("JSON-RPC response for {method} has no result"));
                }
                Err(e) => {
                    warn!(method, attempt, error = %e, "rpc transport failure");
                    last_err = Some(e);
                    if !self.failover().await {
                        break;
                    }
                }
            }
        }

        Err(anyhow!(
            "all RPC endpoints failed for {method}: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        ))
    }

    /// eth_call against `to` with pre-encoded call data.
    pub async fn eth_call(&self, to: Address, data: &Bytes) -> Result<Bytes> {
        let result = self
            .request(
                "eth_call",
                json!([{ "to": to, "data": data }, "latest"]),
            )
            .await?;
        let hex = result
            .as_str()
            .ok_or_else(|| anyhow!("eth_call result is not a string"))?;
        Bytes::from_str(hex).context("eth_call returned invalid hex")
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let result = self.request("eth_chainId", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| anyhow!("eth_chainId result is not a string"))?;
        u64::from_str_radix(hex.trim_start_matches("0x"), 16).context("invalid chain id")
    }

    /// Fetch the receipt for `hash`, `None` while still pending.
    pub async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>> {
        let result = self
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let raw: RawReceipt =
            serde_json::from_value(result).context("malformed transaction receipt")?;
        let block_number = raw
            .block_number
            .as_deref()
            .and_then(|h| u64::from_str_radix(h.trim_start_matches("0x"), 16).ok());
        let success = raw
            .status
            .as_deref()
            .map(|s| s == "0x1")
            .unwrap_or(true);
        Ok(Some(TxReceipt {
            transaction_hash: raw.transaction_hash,
            block_number,
            success,
        }))
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn call(&self, to: Address, data: &Bytes) -> Result<Bytes> {
        self.eth_call(to, data).await
    }

    async fn receipt(&self, hash: B256) -> Result<Option<TxReceipt>> {
        self.transaction_receipt(hash).await
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: B256,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
}
