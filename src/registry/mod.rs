//! Contract-data registry and strategy descriptors
//!
//! The registry is a process-wide mapping from contract-key to ABI plus
//! per-chain deployment addresses. Strategy descriptors carry the data
//! that differs per strategy: parameter layout, setter grouping, and the
//! template enum table. Dispatch is by lookup, not inheritance.

pub mod strategies;

pub use strategies::{
    ParameterGroup, ParameterSpec, SelectOption, StrategyCatalog, StrategyDescriptor,
    TemplateDescriptor,
};

use alloy_json_abi::JsonAbi;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// ABI plus deployment addresses for one contract-key.
#[derive(Debug, Clone)]
pub struct ContractData {
    pub abi: Arc<JsonAbi>,
    /// chain-id -> deployed address
    pub addresses: HashMap<u64, Address>,
}

/// Process-wide contract-key -> contract-data mapping.
#[derive(Debug, Default)]
pub struct ContractRegistry {
    entries: HashMap<String, ContractData>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, data: ContractData) {
        self.entries.insert(key.into(), data);
    }

    pub fn get(&self, key: &str) -> Result<&ContractData> {
        self.entries
            .get(key)
            .with_context(|| format!("contract key '{key}' is not registered"))
    }

    pub fn abi(&self, key: &str) -> Result<Arc<JsonAbi>> {
        Ok(self.get(key)?.abi.clone())
    }

    /// Deployed address of `key` on `chain_id`.
    pub fn address(&self, key: &str, chain_id: u64) -> Result<Address> {
        self.get(key)?
            .addresses
            .get(&chain_id)
            .copied()
            .with_context(|| format!("contract '{key}' has no deployment on chain {chain_id}"))
    }

    /// Registry pre-populated with the vault ABI and every strategy ABI in
    /// `catalog`. Addresses are supplied by configuration at wiring time.
    pub fn with_builtin_abis(catalog: &StrategyCatalog) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(
            VAULT_CONTRACT_KEY,
            ContractData {
                abi: Arc::new(vault_abi()?),
                addresses: HashMap::new(),
            },
        );
        for descriptor in catalog.all() {
            registry.register(
                descriptor.contract_key.clone(),
                ContractData {
                    abi: Arc::new(strategy_abi(descriptor)?),
                    addresses: HashMap::new(),
                },
            );
        }
        Ok(registry)
    }

    pub fn set_address(&mut self, key: &str, chain_id: u64, address: Address) -> Result<()> {
        self.entries
            .get_mut(key)
            .with_context(|| format!("contract key '{key}' is not registered"))?
            .addresses
            .insert(chain_id, address);
        Ok(())
    }
}

/// Contract-key under which the vault ABI is registered.
pub const VAULT_CONTRACT_KEY: &str = "LiquidityVault";

fn vault_abi() -> Result<JsonAbi> {
    JsonAbi::parse([
        "function executor() view returns (address)",
        "function strategy() view returns (address)",
        "function getTargetTokens() view returns (string[])",
        "function getTargetPlatforms() view returns (string[])",
        "function setStrategy(address strategyAddress)",
        "function removeStrategy()",
        "function setExecutor(address executorAddress)",
        "function removeExecutor()",
        "function setTargetTokens(string[] symbols)",
        "function setTargetPlatforms(string[] platforms)",
        "function execute(address[] targets, bytes[] data)",
    ])
    .context("vault ABI failed to parse")
}

/// Strategy ABI assembled from the common surface plus the descriptor's
/// setter methods, one per parameter group.
fn strategy_abi(descriptor: &StrategyDescriptor) -> Result<JsonAbi> {
    let mut signatures: Vec<String> = vec![
        "function authorizedVaults(address vault) view returns (bool)".into(),
        "function selectedTemplate(address vault) view returns (uint256)".into(),
        "function customizationBitmap(address vault) view returns (uint256)".into(),
        "function authorizeVault(address vault)".into(),
        "function selectTemplate(uint256 template)".into(),
        descriptor.get_all_parameters_signature(),
    ];
    for group in &descriptor.parameter_groups {
        signatures.push(descriptor.setter_signature(group)?);
    }
    JsonAbi::parse(signatures.iter().map(String::as_str))
        .with_context(|| format!("strategy ABI for '{}' failed to parse", descriptor.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn builtin_registry_has_vault_and_strategies() {
        let catalog = StrategyCatalog::builtin();
        let registry = ContractRegistry::with_builtin_abis(&catalog).unwrap();
        assert!(registry.get(VAULT_CONTRACT_KEY).is_ok());
        for d in catalog.all() {
            let abi = registry.abi(&d.contract_key).unwrap();
            assert!(abi.function("authorizedVaults").is_some());
            for group in &d.parameter_groups {
                assert!(
                    abi.function(&group.setter_method).is_some(),
                    "missing setter {}",
                    group.setter_method
                );
            }
        }
    }

    #[test]
    fn address_lookup_is_per_chain() {
        let catalog = StrategyCatalog::builtin();
        let mut registry = ContractRegistry::with_builtin_abis(&catalog).unwrap();
        let addr = address!("00000000000000000000000000000000000000aa");
        registry.set_address(VAULT_CONTRACT_KEY, 137, addr).unwrap();
        assert_eq!(registry.address(VAULT_CONTRACT_KEY, 137).unwrap(), addr);
        assert!(registry.address(VAULT_CONTRACT_KEY, 1).is_err());
        assert!(registry.address("Nope", 137).is_err());
    }
}
