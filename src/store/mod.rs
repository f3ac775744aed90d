//! Cached vault store
//!
//! Holds one record per observed vault. Two writers mutate it: the
//! transaction pipeline (owner-initiated changes) and the event reconciler
//! (automation-initiated changes). Mutator methods keep the record
//! invariants: `has_active_strategy` mirrors a non-zero strategy address,
//! and a blacklisted vault is never also marked retrying.

use alloy_primitives::{Address, U256};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::codec::ParamValue;

const HISTORY_CAP: usize = 200;

/// One token holding inside a vault.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenBalance {
    pub raw: U256,
    pub decimals: u8,
    pub fiat_value: Decimal,
}

/// An NFT-represented concentrated-liquidity position held by a vault.
/// Pool token symbols are resolved upstream by the position adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRef {
    pub id: String,
    pub token0: String,
    pub token1: String,
}

/// Aggregate vault metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultMetrics {
    pub total_value_usd: Decimal,
    pub pending_fees_usd: Decimal,
}

/// Automation retry status recorded from `VaultLoadFailed` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStatus {
    pub message: String,
    pub attempts: u32,
    pub last_attempt: i64,
}

/// One logged transaction, either from the automation service or from a
/// confirmed pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub label: String,
    pub tx_hash: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// Cached record of one on-chain vault.
#[derive(Debug, Clone)]
pub struct Vault {
    pub address: Address,
    pub name: String,
    pub created_at: i64,
    pub owner: Address,
    /// Zero when no executor is authorized.
    pub executor: Address,
    /// Zero when no strategy is active.
    pub strategy: Address,
    pub has_active_strategy: bool,
    pub strategy_id: Option<String>,
    pub active_template: Option<String>,
    pub parameters: BTreeMap<String, ParamValue>,
    pub target_tokens: BTreeSet<String>,
    pub target_platforms: BTreeSet<String>,
    pub balances: BTreeMap<String, TokenBalance>,
    pub positions: Vec<PositionRef>,
    pub metrics: VaultMetrics,
    pub is_retrying: bool,
    pub retry_status: Option<RetryStatus>,
    pub is_blacklisted: bool,
    pub blacklist_reason: Option<String>,
    pub history: Vec<TransactionRecord>,
}

impl Vault {
    pub fn new(address: Address, owner: Address, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            created_at: Utc::now().timestamp_millis(),
            owner,
            executor: Address::ZERO,
            strategy: Address::ZERO,
            has_active_strategy: false,
            strategy_id: None,
            active_template: None,
            parameters: BTreeMap::new(),
            target_tokens: BTreeSet::new(),
            target_platforms: BTreeSet::new(),
            balances: BTreeMap::new(),
            positions: Vec::new(),
            metrics: VaultMetrics::default(),
            is_retrying: false,
            retry_status: None,
            is_blacklisted: false,
            blacklist_reason: None,
            history: Vec::new(),
        }
    }

    pub fn set_strategy_address(&mut self, strategy: Address) {
        self.strategy = strategy;
        self.has_active_strategy = strategy != Address::ZERO;
        if strategy == Address::ZERO {
            self.strategy_id = None;
            self.active_template = None;
        }
    }

    pub fn set_executor_address(&mut self, executor: Address) {
        self.executor = executor;
    }

    pub fn has_executor(&self) -> bool {
        self.executor != Address::ZERO
    }
}

/// Central store of cached vault records.
#[derive(Debug, Default)]
pub struct VaultStore {
    vaults: DashMap<Address, Vault>,
}

impl VaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, vault: Vault) {
        self.vaults.insert(vault.address, vault);
    }

    pub fn get(&self, address: &Address) -> Option<Vault> {
        self.vaults.get(address).map(|v| v.clone())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.vaults.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.vaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.is_empty()
    }

    /// Removes the record; called on owner disconnect.
    pub fn remove(&self, address: &Address) {
        self.vaults.remove(address);
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.vaults.iter().map(|entry| *entry.key()).collect()
    }

    /// Run `mutate` against the record for `address`, if cached.
    pub fn with_mut<F>(&self, address: &Address, mutate: F) -> bool
    where
        F: FnOnce(&mut Vault),
    {
        match self.vaults.get_mut(address) {
            Some(mut entry) => {
                mutate(&mut entry);
                true
            }
            None => {
                debug!(vault = %address, "mutation against unknown vault dropped");
                false
            }
        }
    }

    pub fn mark_retrying(&self, address: &Address, status: RetryStatus) -> bool {
        self.with_mut(address, |v| {
            if v.is_blacklisted {
                // blacklist takes precedence over retry
                v.retry_status = Some(status);
                return;
            }
            v.is_retrying = true;
            v.retry_status = Some(status);
        })
    }

    pub fn clear_retrying(&self, address: &Address) -> bool {
        self.with_mut(address, |v| {
            v.is_retrying = false;
            v.retry_status = None;
        })
    }

    pub fn mark_blacklisted(&self, address: &Address, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.with_mut(address, |v| {
            v.is_blacklisted = true;
            v.blacklist_reason = Some(reason);
            v.is_retrying = false;
        })
    }

    pub fn clear_blacklisted(&self, address: &Address) -> bool {
        self.with_mut(address, |v| {
            v.is_blacklisted = false;
            v.blacklist_reason = None;
        })
    }

    pub fn append_history(&self, address: &Address, record: TransactionRecord) -> bool {
        self.with_mut(address, |v| {
            v.history.push(record);
            if v.history.len() > HISTORY_CAP {
                let overflow = v.history.len() - HISTORY_CAP;
                v.history.drain(..overflow);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn vault() -> Vault {
        Vault::new(
            address!("0000000000000000000000000000000000000001"),
            address!("0000000000000000000000000000000000000002"),
            "test vault",
        )
    }

    #[test]
    fn strategy_address_drives_active_flag() {
        let mut v = vault();
        assert!(!v.has_active_strategy);
        v.set_strategy_address(address!("00000000000000000000000000000000000000ff"));
        assert!(v.has_active_strategy);
        v.set_strategy_address(Address::ZERO);
        assert!(!v.has_active_strategy);
        assert_eq!(v.strategy_id, None);
    }

    #[test]
    fn blacklist_clears_retrying() {
        let store = VaultStore::new();
        let v = vault();
        let addr = v.address;
        store.upsert(v);

        store.mark_retrying(
            &addr,
            RetryStatus { message: "rpc timeout".into(), attempts: 3, last_attempt: 1 },
        );
        assert!(store.get(&addr).unwrap().is_retrying);

        store.mark_blacklisted(&addr, "timeout");
        let v = store.get(&addr).unwrap();
        assert!(v.is_blacklisted);
        assert!(!v.is_retrying);
        assert_eq!(v.blacklist_reason.as_deref(), Some("timeout"));
    }

    #[test]
    fn retry_does_not_override_blacklist() {
        let store = VaultStore::new();
        let v = vault();
        let addr = v.address;
        store.upsert(v);

        store.mark_blacklisted(&addr, "gone");
        store.mark_retrying(
            &addr,
            RetryStatus { message: "retrying".into(), attempts: 1, last_attempt: 2 },
        );
        let v = store.get(&addr).unwrap();
        assert!(v.is_blacklisted);
        assert!(!v.is_retrying, "at most one of the two flags may be set");
    }

    #[test]
    fn history_is_capped() {
        let store = VaultStore::new();
        let v = vault();
        let addr = v.address;
        store.upsert(v);
        for i in 0..(HISTORY_CAP + 10) {
            store.append_history(
                &addr,
                TransactionRecord {
                    label: format!("tx {i}"),
                    tx_hash: None,
                    timestamp: i as i64,
                    detail: serde_json::Value::Null,
                },
            );
        }
        let v = store.get(&addr).unwrap();
        assert_eq!(v.history.len(), HISTORY_CAP);
        assert_eq!(v.history.last().unwrap().label, format!("tx {}", HISTORY_CAP + 9));
    }

    #[test]
    fn mutation_against_unknown_vault_is_dropped() {
        let store = VaultStore::new();
        assert!(!store.clear_retrying(&Address::ZERO));
    }
}
