//! Vault Pilot
//!
//! Off-chain strategy configuration pipeline for DeFi liquidity vaults:
//! - Tracks vault configuration on chain and mirrors it locally
//! - Plans the minimal transaction sequence for a configuration change
//! - Drives each step through the user's wallet with explicit resumability
//! - Reconciles the automation service's event stream into the cache

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use vault_pilot::chain::{ChainReader, Confirmer, JsonRpcWallet, ObservedReader, RpcClient};
use vault_pilot::config::AppConfig;
use vault_pilot::executor::PipelineExecutor;
use vault_pilot::network::{spawn_event_handler, AppEvent, EventBus, SseManager};
use vault_pilot::reconcile::Reconciler;
use vault_pilot::registry::{ContractRegistry, StrategyCatalog};
use vault_pilot::store::{Vault, VaultStore};
use vault_pilot::telemetry::{init_logging, init_metrics, record_cached_vaults};
use vault_pilot::utils::short_address;

/// Vault Pilot - strategy configuration pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Vault addresses to track
    #[arg(long = "vault")]
    vaults: Vec<String>,

    /// Deactivate the strategy on this vault, then exit
    #[arg(long)]
    deactivate: Option<String>,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.telemetry.log_level = level;
    }

    let _log_guard = init_logging(&config.telemetry)?;

    info!("Starting Vault Pilot v{}", env!("CARGO_PKG_VERSION"));
    info!("Chain id: {}", config.chain.chain_id);

    if config.telemetry.enable_metrics {
        init_metrics(config.telemetry.metrics_port)?;
    }

    // Contract registry: built-in ABIs plus configured deployments
    let catalog = Arc::new(StrategyCatalog::builtin());
    let mut registry = ContractRegistry::with_builtin_abis(&catalog)?;
    for (key, address) in &config.contracts {
        registry
            .set_address(key, config.chain.chain_id, *address)
            .with_context(|| format!("configuring deployment of '{key}'"))?;
    }
    let registry = Arc::new(registry);

    let rpc = Arc::new(RpcClient::new(&config.rpc)?);
    let chain: Arc<dyn ChainReader> = rpc.clone();
    let wallet = Arc::new(JsonRpcWallet::new(
        config.wallet.rpc_url.clone(),
        config.wallet.from,
        Duration::from_millis(config.wallet.request_timeout_ms),
    )?);

    let store = Arc::new(VaultStore::new());
    let bus = Arc::new(EventBus::default());

    let reader = Arc::new(ObservedReader::new(
        chain.clone(),
        registry.clone(),
        catalog.clone(),
        config.chain.chain_id,
    ));

    // Seed tracked vaults and read their observed state once
    for raw in &args.vaults {
        let address = alloy_primitives::Address::from_str(raw)
            .with_context(|| format!("invalid vault address '{raw}'"))?;
        store.upsert(Vault::new(address, config.wallet.from, short_address(&address)));
        match reader.read(address).await {
            Ok(snapshot) => {
                reader.apply_to_store(&store, &snapshot);
                info!(vault = %short_address(&address), "observed state loaded");
            }
            Err(e) => warn!(vault = %short_address(&address), error = %e, "initial read failed"),
        }
    }
    record_cached_vaults(store.len());

    let confirmer = Confirmer::new(
        Duration::from_millis(config.chain.confirmation_poll_ms),
        Duration::from_secs(config.chain.confirmation_timeout_secs),
    );
    let executor = Arc::new(PipelineExecutor::new(
        chain.clone(),
        wallet,
        registry.clone(),
        catalog.clone(),
        store.clone(),
        bus.clone(),
        confirmer,
        config.chain.chain_id,
    ));

    // One-shot deactivation mode
    if let Some(raw) = &args.deactivate {
        let address = alloy_primitives::Address::from_str(raw)
            .with_context(|| format!("invalid vault address '{raw}'"))?;
        if !store.contains(&address) {
            store.upsert(Vault::new(address, config.wallet.from, short_address(&address)));
            if let Ok(snapshot) = reader.read(address).await {
                reader.apply_to_store(&store, &snapshot);
            }
        }
        let outcome = executor.deactivate(address).await?;
        info!(vault = %short_address(&address), ?outcome, "deactivation finished");
        return Ok(());
    }

    // Reconciler consumes stream frames and refresh signals from the bus
    let reconciler = Arc::new(Reconciler::new(store.clone(), bus.clone()));
    {
        let reconciler = reconciler.clone();
        let store = store.clone();
        let reader = reader.clone();
        spawn_event_handler(&bus, "reconciler", move |event| {
            let reconciler = reconciler.clone();
            let store = store.clone();
            let reader = reader.clone();
            async move {
                match event {
                    AppEvent::StreamFrame { event, data } => {
                        reconciler.apply(&event, &data);
                    }
                    AppEvent::Refresh => {
                        for vault in store.addresses() {
                            match reader.read(vault).await {
                                Ok(snapshot) => reader.apply_to_store(&store, &snapshot),
                                Err(e) => {
                                    warn!(vault = %short_address(&vault), error = %e, "refresh failed")
                                }
                            }
                        }
                        record_cached_vaults(store.len());
                    }
                    _ => {}
                }
            }
        });
    }

    // Single stream connection per process
    let sse = SseManager::new(&config.events.url, bus.sender()).with_reconnect_policy(
        config.events.max_reconnect_attempts,
        Duration::from_millis(config.events.reconnect_delay_ms),
    );
    sse.start().await?;

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, gracefully stopping..."),
        Err(err) => error!("Error listening for shutdown signal: {}", err),
    }

    sse.stop().await;
    info!("Vault Pilot stopped");
    Ok(())
}
