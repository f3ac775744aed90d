//! Event reconciler
//!
//! Consumes automation-service events, mutates the cached vault records,
//! and dispatches refresh signals. Handler failures are logged and never
//! propagated; an in-flight plan must not be interrupted by a bad frame.

use alloy_primitives::Address;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::network::{AppEvent, EventBus};
use crate::store::{RetryStatus, TransactionRecord, VaultStore};
use crate::utils::current_timestamp_millis;

/// Diagnostics ring buffer size.
const EVENT_BUFFER_CAP: usize = 50;

/// Recognized automation event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    VaultLoadFailed,
    VaultLoadRecovered,
    VaultUnrecoverable,
    VaultBlacklisted,
    VaultUnblacklisted,
    TransactionLogged,
    NewPositionCreated,
    PositionsClosed,
    PositionRebalanced,
    LiquidityAddedToPosition,
    FeesCollected,
    TokensSwapped,
}

impl EventKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "VaultLoadFailed" => Self::VaultLoadFailed,
            "VaultLoadRecovered" => Self::VaultLoadRecovered,
            "VaultUnrecoverable" => Self::VaultUnrecoverable,
            "VaultBlacklisted" => Self::VaultBlacklisted,
            "VaultUnblacklisted" => Self::VaultUnblacklisted,
            "TransactionLogged" => Self::TransactionLogged,
            "NewPositionCreated" => Self::NewPositionCreated,
            "PositionsClosed" => Self::PositionsClosed,
            "PositionRebalanced" => Self::PositionRebalanced,
            "LiquidityAddedToPosition" => Self::LiquidityAddedToPosition,
            "FeesCollected" => Self::FeesCollected,
            "TokensSwapped" => Self::TokensSwapped,
            _ => return None,
        })
    }

    /// Kinds whose arrival means observed state is stale.
    pub fn triggers_refresh(&self) -> bool {
        matches!(
            self,
            Self::NewPositionCreated
                | Self::PositionsClosed
                | Self::PositionRebalanced
                | Self::LiquidityAddedToPosition
                | Self::FeesCollected
                | Self::TokensSwapped
                | Self::VaultUnrecoverable
        )
    }
}

/// Wire envelope: `{data, timestamp}` with `data.vaultAddress` set for
/// every per-vault event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// One retained event for diagnostics.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: Uuid,
    pub kind: EventKind,
    pub vault: Option<Address>,
    pub received_at: i64,
    pub payload: Value,
}

/// Applies automation events to the vault cache.
pub struct Reconciler {
    store: Arc<VaultStore>,
    bus: Arc<EventBus>,
    buffer: Mutex<VecDeque<EventRecord>>,
}

impl Reconciler {
    pub fn new(store: Arc<VaultStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            buffer: Mutex::new(VecDeque::with_capacity(EVENT_BUFFER_CAP)),
        }
    }

    /// Recent events, oldest first.
    pub fn recent_events(&self) -> Vec<EventRecord> {
        self.buffer.lock().iter().cloned().collect()
    }

    /// Handle one raw stream frame. Never returns an error; anything
    /// malformed is logged and dropped.
    pub fn apply(&self, event_name: &str, raw_data: &str) {
        let Some(kind) = EventKind::parse(event_name) else {
            debug!(event = event_name, "ignoring unknown event kind");
            return;
        };

        let envelope: EventEnvelope = match serde_json::from_str(raw_data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(event = event_name, error = %e, "malformed event payload dropped");
                return;
            }
        };

        let vault = envelope
            .data
            .get("vaultAddress")
            .and_then(Value::as_str)
            .and_then(|s| Address::from_str(s).ok());

        metrics::counter!("vault_pilot_events_total", "kind" => event_name.to_string())
            .increment(1);

        self.remember(kind, vault, &envelope);

        if let Some(vault) = vault {
            self.mutate(kind, vault, &envelope);
        } else {
            warn!(event = event_name, "per-vault event without vaultAddress");
        }

        if kind.triggers_refresh() {
            self.bus.publish(AppEvent::Refresh);
        }
    }

    fn remember(&self, kind: EventKind, vault: Option<Address>, envelope: &EventEnvelope) {
        let mut buffer = self.buffer.lock();
        if buffer.len() == EVENT_BUFFER_CAP {
            buffer.pop_front();
        }
        buffer.push_back(EventRecord {
            id: Uuid::new_v4(),
            kind,
            vault,
            received_at: envelope.timestamp.unwrap_or_else(current_timestamp_millis),
            payload: envelope.data.clone(),
        });
    }

    fn mutate(&self, kind: EventKind, vault: Address, envelope: &EventEnvelope) {
        let data = &envelope.data;
        match kind {
            EventKind::VaultLoadFailed => {
                let status = RetryStatus {
                    message: str_field(data, "message").unwrap_or_default(),
                    attempts: data.get("attempts").and_then(Value::as_u64).unwrap_or(0) as u32,
                    last_attempt: data
                        .get("lastAttempt")
                        .and_then(Value::as_i64)
                        .or(envelope.timestamp)
                        .unwrap_or(0),
                };
                self.store.mark_retrying(&vault, status);
                self.bus.publish(AppEvent::VaultUpdated { vault });
            }
            EventKind::VaultLoadRecovered => {
                self.store.clear_retrying(&vault);
                self.store.clear_blacklisted(&vault);
                self.bus.publish(AppEvent::VaultUpdated { vault });
            }
            EventKind::VaultUnrecoverable | EventKind::VaultBlacklisted => {
                let reason = str_field(data, "reason")
                    .or_else(|| str_field(data, "message"))
                    .unwrap_or_else(|| "unrecoverable".to_string());
                self.store.mark_blacklisted(&vault, reason);
                self.bus.publish(AppEvent::VaultUpdated { vault });
            }
            EventKind::VaultUnblacklisted => {
                self.store.clear_blacklisted(&vault);
                self.bus.publish(AppEvent::VaultUpdated { vault });
            }
            EventKind::TransactionLogged => {
                self.store.append_history(
                    &vault,
                    TransactionRecord {
                        label: str_field(data, "label")
                            .or_else(|| str_field(data, "type"))
                            .unwrap_or_else(|| "automation".to_string()),
                        tx_hash: str_field(data, "txHash"),
                        timestamp: envelope
                            .timestamp
                            .unwrap_or_else(current_timestamp_millis),
                        detail: data.clone(),
                    },
                );
                self.bus.publish(AppEvent::VaultUpdated { vault });
            }
            // Position and fee events carry no cache mutation of their
            // own; the refresh signal re-reads observed state.
            EventKind::NewPositionCreated
            | EventKind::PositionsClosed
            | EventKind::PositionRebalanced
            | EventKind::LiquidityAddedToPosition
            | EventKind::FeesCollected
            | EventKind::TokensSwapped => {}
        }
    }
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Vault;
    use alloy_primitives::address;

    fn vault_addr() -> Address {
        address!("00000000000000000000000000000000000000b1")
    }

    fn reconciler_with_vault() -> (Arc<VaultStore>, Arc<EventBus>, Reconciler) {
        let store = Arc::new(VaultStore::new());
        let bus = Arc::new(EventBus::new(64));
        store.upsert(Vault::new(
            vault_addr(),
            address!("0000000000000000000000000000000000000002"),
            "v",
        ));
        let reconciler = Reconciler::new(store.clone(), bus.clone());
        (store, bus, reconciler)
    }

    fn payload(extra: &str) -> String {
        format!(
            r#"{{"data":{{"vaultAddress":"{}"{}}},"timestamp":1700000000000}}"#,
            vault_addr(),
            extra
        )
    }

    #[test]
    fn unrecoverable_blacklists_and_clears_retry() {
        let (store, _bus, reconciler) = reconciler_with_vault();
        reconciler.apply("VaultLoadFailed", &payload(r#","message":"timeout","attempts":3"#));
        assert!(store.get(&vault_addr()).unwrap().is_retrying);

        reconciler.apply("VaultUnrecoverable", &payload(r#","reason":"timeout"#));
        let v = store.get(&vault_addr()).unwrap();
        assert!(v.is_blacklisted);
        assert!(!v.is_retrying);
        assert_eq!(v.blacklist_reason.as_deref(), Some("timeout"));
    }

    #[test]
    fn recovery_clears_both_flags() {
        let (store, _bus, reconciler) = reconciler_with_vault();
        reconciler.apply("VaultBlacklisted", &payload(r#","reason":"gone"#));
        reconciler.apply("VaultLoadRecovered", &payload(""));
        let v = store.get(&vault_addr()).unwrap();
        assert!(!v.is_blacklisted);
        assert!(!v.is_retrying);
    }

    #[test]
    fn transaction_logged_appends_history() {
        let (store, _bus, reconciler) = reconciler_with_vault();
        reconciler.apply(
            "TransactionLogged",
            &payload(r#","label":"rebalance","txHash":"0xabc""#),
        );
        let v = store.get(&vault_addr()).unwrap();
        assert_eq!(v.history.len(), 1);
        assert_eq!(v.history[0].label, "rebalance");
        assert_eq!(v.history[0].tx_hash.as_deref(), Some("0xabc"));
    }

    #[test]
    fn position_events_trigger_refresh() {
        let (_store, bus, reconciler) = reconciler_with_vault();
        let mut rx = bus.subscribe();
        reconciler.apply("PositionRebalanced", &payload(""));
        let mut saw_refresh = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, AppEvent::Refresh) {
                saw_refresh = true;
            }
        }
        assert!(saw_refresh);
    }

    #[test]
    fn blacklist_does_not_trigger_refresh() {
        let (_store, bus, reconciler) = reconciler_with_vault();
        let mut rx = bus.subscribe();
        reconciler.apply("VaultBlacklisted", &payload(r#","reason":"x"#));
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, AppEvent::Refresh));
        }
    }

    #[test]
    fn unknown_kinds_and_garbage_are_ignored() {
        let (store, _bus, reconciler) = reconciler_with_vault();
        reconciler.apply("SomethingNew", &payload(""));
        reconciler.apply("PositionRebalanced", "not json");
        // neither frame reaches the buffer or the cache
        assert!(reconciler.recent_events().is_empty());
        assert!(!store.get(&vault_addr()).unwrap().is_retrying);
    }

    #[test]
    fn ring_buffer_is_capped_at_fifty() {
        let (_store, _bus, reconciler) = reconciler_with_vault();
        for _ in 0..60 {
            reconciler.apply("FeesCollected", &payload(""));
        }
        assert_eq!(reconciler.recent_events().len(), EVENT_BUFFER_CAP);
    }
}
