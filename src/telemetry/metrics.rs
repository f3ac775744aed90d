//! Prometheus metrics export

use anyhow::Result;
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

pub fn init_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_metrics();
    info!("Prometheus metrics server started on {}", addr);
    Ok(())
}

fn register_metrics() {
    // Pipeline metrics
    describe_counter!("vault_pilot_plans_started_total", "Configuration plans started");
    describe_counter!("vault_pilot_plans_completed_total", "Configuration plans fully confirmed");
    describe_counter!("vault_pilot_plans_failed_total", "Steps halted on revert or network failure");
    describe_counter!("vault_pilot_steps_confirmed_total", "Individual steps confirmed on chain");
    describe_counter!("vault_pilot_wallet_rejections_total", "Wallet prompts rejected by the user");

    // Event stream metrics
    describe_counter!("vault_pilot_events_total", "Automation events received, by kind");
    describe_gauge!("vault_pilot_stream_connected", "Event stream connection status");
    describe_gauge!("vault_pilot_stream_reconnects", "Event stream reconnect count");

    // Cache metrics
    describe_gauge!("vault_pilot_cached_vaults", "Vault records currently cached");
}

pub fn record_stream_connected(connected: bool) {
    gauge!("vault_pilot_stream_connected").set(if connected { 1.0 } else { 0.0 });
}

pub fn record_stream_reconnects(count: u32) {
    gauge!("vault_pilot_stream_reconnects").set(count as f64);
}

pub fn record_cached_vaults(count: usize) {
    gauge!("vault_pilot_cached_vaults").set(count as f64);
}
