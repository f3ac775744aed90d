//! Wallet gateway
//!
//! Submission goes through the user's wallet, which may refuse. The
//! gateway trait keeps the executor testable against an in-memory fake;
//! the JSON-RPC implementation talks to an EIP-1193 style wallet bridge
//! via `eth_sendTransaction`, where error code 4001 is a user rejection.

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Well-known string code wallets attach to a rejected signature prompt.
pub const ACTION_REJECTED: &str = "ACTION_REJECTED";
/// EIP-1193 userRejectedRequest error code.
pub const USER_REJECTED_CODE: i64 = 4001;

/// A transaction as handed to the wallet.
#[derive(Debug, Clone, Serialize)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    #[serde(skip_serializing_if = "U256::is_zero")]
    pub value: U256,
}

impl TxRequest {
    pub fn new(from: Address, to: Address, data: Bytes) -> Self {
        Self { from, to, data, value: U256::ZERO }
    }
}

/// Raw error surfaced by a wallet or provider.
#[derive(Debug, Clone, Default, thiserror::Error)]
#[error("{}", self.display_reason())]
pub struct WalletError {
    /// String code, e.g. "ACTION_REJECTED".
    pub code: Option<String>,
    /// Numeric provider code, e.g. 4001.
    pub error_code: Option<i64>,
    /// Revert reason, when the provider decoded one.
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl WalletError {
    pub fn network(message: impl Into<String>) -> Self {
        Self { message: Some(message.into()), ..Self::default() }
    }

    pub fn rejected() -> Self {
        Self {
            code: Some(ACTION_REJECTED.to_string()),
            error_code: Some(USER_REJECTED_CODE),
            message: Some("user rejected transaction".to_string()),
            ..Self::default()
        }
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        Self { reason: Some(reason.into()), ..Self::default() }
    }

    /// The user declined the signature prompt.
    pub fn is_user_rejection(&self) -> bool {
        if self.code.as_deref() == Some(ACTION_REJECTED) {
            return true;
        }
        if self.error_code == Some(USER_REJECTED_CODE) {
            return true;
        }
        self.message
            .as_deref()
            .map(|m| m.to_lowercase().contains("user rejected"))
            .unwrap_or(false)
    }

    /// `reason ?? message ?? "Unknown error"`.
    pub fn display_reason(&self) -> String {
        self.reason
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

/// Classified transaction failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxFailure {
    #[error("transaction rejected in wallet")]
    UserRejected,
    #[error("reverted: {reason}")]
    Reverted { reason: String },
    #[error("network failure: {message}")]
    Network { message: String },
}

impl From<WalletError> for TxFailure {
    fn from(error: WalletError) -> Self {
        if error.is_user_rejection() {
            return TxFailure::UserRejected;
        }
        if error.reason.is_some() {
            return TxFailure::Reverted { reason: error.display_reason() };
        }
        TxFailure::Network { message: error.display_reason() }
    }
}

impl TxFailure {
    /// Reason string rendered into the step error message.
    pub fn display_reason(&self) -> String {
        match self {
            TxFailure::UserRejected => "Transaction cancelled".to_string(),
            TxFailure::Reverted { reason } => reason.clone(),
            TxFailure::Network { message } => message.clone(),
        }
    }
}

/// Seam between the executor and whatever signs transactions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletGateway: Send + Sync {
    /// The account transactions are sent from.
    fn sender(&self) -> Address;

    /// Hand the transaction to the wallet and return the submitted hash.
    async fn send_transaction(&self, request: &TxRequest) -> Result<B256, WalletError>;
}

/// Wallet bridge speaking `eth_sendTransaction` over JSON-RPC. The node
/// or bridge behind `url` owns the key and prompts the user.
pub struct JsonRpcWallet {
    url: String,
    from: Address,
    client: reqwest::Client,
}

impl JsonRpcWallet {
    pub fn new(url: impl Into<String>, from: Address, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            url: url.into(),
            from,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl WalletGateway for JsonRpcWallet {
    fn sender(&self) -> Address {
        self.from
    }

    async fn send_transaction(&self, request: &TxRequest) -> Result<B256, WalletError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_sendTransaction",
            "params": [request],
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::network(e.to_string()))?;

        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WalletError::network(format!("malformed wallet response: {e}")))?;

        if let Some(error) = envelope.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64());
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string);
            warn!(?code, ?message, "wallet returned an error");
            return Err(WalletError {
                code: None,
                error_code: code,
                reason: None,
                message,
            });
        }

        let hash = envelope
            .get("result")
            .and_then(|r| r.as_str())
            .ok_or_else(|| WalletError::network("wallet response has no result"))?;
        let hash = B256::from_str(hash)
            .map_err(|e| WalletError::network(format!("invalid transaction hash: {e}")))?;
        debug!(%hash, "transaction handed to wallet");
        Ok(hash)
    }
}
