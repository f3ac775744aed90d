//! Configuration module
//!
//! Handles loading and validation of the application configuration.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub chain: ChainConfig,
    pub rpc: RpcConfig,
    pub wallet: WalletConfig,
    pub events: EventStreamConfig,
    pub telemetry: TelemetryConfig,
    /// Known contract deployments: contract-key -> address, on this chain.
    #[serde(default)]
    pub contracts: HashMap<String, Address>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chain.chain_id > 0, "chain_id must be positive");
        anyhow::ensure!(
            !self.rpc.primary_url.is_empty(),
            "rpc.primary_url must be set"
        );
        anyhow::ensure!(
            self.rpc.request_timeout_ms > 0,
            "rpc.request_timeout_ms must be positive"
        );
        anyhow::ensure!(
            self.chain.confirmation_timeout_secs > 0,
            "confirmation_timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.chain.confirmation_poll_ms >= 100,
            "confirmation_poll_ms must be at least 100"
        );
        anyhow::ensure!(!self.events.url.is_empty(), "events.url must be set");
        anyhow::ensure!(
            self.events.max_reconnect_attempts > 0,
            "events.max_reconnect_attempts must be positive"
        );
        Ok(())
    }

    /// Create a default config for testing
    #[cfg(test)]
    pub fn default_for_test() -> Self {
        Self {
            chain: ChainConfig {
                chain_id: 137,
                confirmation_poll_ms: 500,
                confirmation_timeout_secs: 120,
            },
            rpc: RpcConfig {
                primary_url: "https://polygon-rpc.com".to_string(),
                fallback_urls: vec![],
                request_timeout_ms: 10000,
                max_retries: 3,
            },
            wallet: WalletConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                from: Address::ZERO,
                request_timeout_ms: 600_000,
            },
            events: EventStreamConfig {
                url: "https://automation.example.com/events".to_string(),
                reconnect_delay_ms: 1000,
                max_reconnect_attempts: 10,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                json_logs: false,
                log_file: None,
                metrics_port: 9090,
                enable_metrics: false,
            },
            contracts: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(default = "default_confirmation_poll")]
    pub confirmation_poll_ms: u64,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
}

fn default_confirmation_poll() -> u64 { 500 }
fn default_confirmation_timeout() -> u64 { 120 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub primary_url: String,
    #[serde(default)]
    pub fallback_urls: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_request_timeout() -> u64 { 10000 }
fn default_max_retries() -> u32 { 3 }

/// The wallet bridge that owns the signing key and prompts the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    pub rpc_url: String,
    pub from: Address,
    /// Long by design: the user may sit on the prompt.
    #[serde(default = "default_wallet_timeout")]
    pub request_timeout_ms: u64,
}

fn default_wallet_timeout() -> u64 { 600_000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStreamConfig {
    pub url: String,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnects")]
    pub max_reconnect_attempts: u32,
}

fn default_reconnect_delay() -> u64 { 1000 }
fn default_max_reconnects() -> u32 { 10 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    pub log_file: Option<String>,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

fn default_metrics_port() -> u16 { 9090 }
fn default_true() -> bool { true }
