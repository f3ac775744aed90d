//! Observed-state reader
//!
//! Pulls the on-chain configuration of a vault into a [`ConfigState`]
//! snapshot plus the cache fields the pipeline maintains. Runs at
//! startup, after every completed plan, and on each refresh signal.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::codec::{self, ParamValue};
use crate::model::ConfigState;
use crate::registry::{ContractRegistry, StrategyCatalog, StrategyDescriptor, VAULT_CONTRACT_KEY};
use crate::store::VaultStore;

use super::contracts::{StrategyHandle, VaultHandle};
use super::rpc::ChainReader;

/// Result of one observation pass.
#[derive(Debug, Clone)]
pub struct ObservedSnapshot {
    pub vault: Address,
    pub executor: Address,
    pub strategy: Address,
    pub config: ConfigState,
    /// Raw customization bitmap, kept for diagnosis.
    pub customization_bitmap: Option<String>,
}

pub struct ObservedReader {
    rpc: Arc<dyn ChainReader>,
    registry: Arc<ContractRegistry>,
    catalog: Arc<StrategyCatalog>,
    chain_id: u64,
}

impl ObservedReader {
    pub fn new(
        rpc: Arc<dyn ChainReader>,
        registry: Arc<ContractRegistry>,
        catalog: Arc<StrategyCatalog>,
        chain_id: u64,
    ) -> Self {
        Self { rpc, registry, catalog, chain_id }
    }

    /// Resolve which catalog strategy is deployed at `address`.
    fn strategy_for_address(&self, address: Address) -> Option<&StrategyDescriptor> {
        self.catalog.all().find(|descriptor| {
            self.registry
                .address(&descriptor.contract_key, self.chain_id)
                .map(|a| a == address)
                .unwrap_or(false)
        })
    }

    /// Read the full observed configuration of `vault_address`.
    pub async fn read(&self, vault_address: Address) -> Result<ObservedSnapshot> {
        let vault = VaultHandle::new(vault_address, self.registry.abi(VAULT_CONTRACT_KEY)?);

        let executor = vault.executor(self.rpc.as_ref()).await.context("reading executor")?;
        let strategy_address = vault.strategy(self.rpc.as_ref()).await.context("reading strategy")?;
        let target_tokens = vault.target_tokens(self.rpc.as_ref()).await.context("reading target tokens")?;
        let target_platforms = vault
            .target_platforms(self.rpc.as_ref())
            .await
            .context("reading target platforms")?;

        let mut config = ConfigState {
            strategy_id: None,
            active_template: None,
            parameters: BTreeMap::new(),
            target_tokens: target_tokens.into_iter().collect(),
            target_platforms: target_platforms.into_iter().collect(),
        };
        let mut bitmap = None;

        if strategy_address != Address::ZERO {
            match self.strategy_for_address(strategy_address) {
                Some(descriptor) => {
                    let handle = StrategyHandle::new(
                        strategy_address,
                        self.registry.abi(&descriptor.contract_key)?,
                    );
                    config.strategy_id = Some(descriptor.id.clone());
                    config.active_template = self
                        .read_template(&handle, descriptor, vault_address)
                        .await;
                    config.parameters = self
                        .read_parameters(&handle, descriptor, vault_address)
                        .await;
                    bitmap = self.read_bitmap(&handle, vault_address).await;
                }
                None => {
                    warn!(strategy = %strategy_address, "vault points at an unknown strategy");
                }
            }
        }

        Ok(ObservedSnapshot {
            vault: vault_address,
            executor,
            strategy: strategy_address,
            config,
            customization_bitmap: bitmap,
        })
    }

    async fn read_template(
        &self,
        handle: &StrategyHandle,
        descriptor: &StrategyDescriptor,
        vault: Address,
    ) -> Option<String> {
        match handle.selected_template(self.rpc.as_ref(), vault).await {
            Ok(ordinal) => {
                codec::template_from_enum(&descriptor.template_enum_table(), ordinal)
                    .map(str::to_string)
            }
            Err(e) => {
                debug!(error = %e, "selectedTemplate read failed, assuming custom");
                None
            }
        }
    }

    async fn read_parameters(
        &self,
        handle: &StrategyHandle,
        descriptor: &StrategyDescriptor,
        vault: Address,
    ) -> BTreeMap<String, ParamValue> {
        let mut parameters = BTreeMap::new();
        match handle.get_all_parameters(self.rpc.as_ref(), vault).await {
            Ok(values) => {
                for (spec, value) in descriptor.parameters.iter().zip(values.iter()) {
                    match codec::raise(&spec.id, value)
                        .and_then(|raw| codec::decode(&spec.id, spec.kind, raw))
                    {
                        Ok(decoded) => {
                            parameters.insert(spec.id.clone(), decoded);
                        }
                        Err(e) => warn!(param = %spec.id, error = %e, "parameter decode failed"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "getAllParameters read failed"),
        }
        parameters
    }

    async fn read_bitmap(&self, handle: &StrategyHandle, vault: Address) -> Option<String> {
        match handle.customization_bitmap(self.rpc.as_ref(), vault).await {
            Ok(bitmap) => Some(bitmap),
            Err(e) => {
                debug!(error = %e, "customizationBitmap read failed");
                None
            }
        }
    }

    /// Fold a snapshot into the cached vault record.
    pub fn apply_to_store(&self, store: &VaultStore, snapshot: &ObservedSnapshot) {
        store.with_mut(&snapshot.vault, |vault| {
            vault.set_executor_address(snapshot.executor);
            vault.set_strategy_address(snapshot.strategy);
            vault.strategy_id = snapshot.config.strategy_id.clone();
            vault.active_template = snapshot.config.active_template.clone();
            vault.parameters = snapshot.config.parameters.clone();
            vault.target_tokens = snapshot.config.target_tokens.clone();
            vault.target_platforms = snapshot.config.target_platforms.clone();
        });
    }
}
