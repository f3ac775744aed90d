//! Typed vault and strategy surfaces
//!
//! Thin wrappers over registry ABIs: read helpers issue `eth_call`
//! through the RPC client, write helpers produce the call data a step
//! submits through the wallet.

use alloy_dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy_json_abi::{Function, JsonAbi};
use alloy_primitives::{Address, Bytes, U256};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

use crate::codec::{self, EncodedParam};
use crate::plan::GroupCall;
use crate::registry::StrategyDescriptor;

use super::rpc::ChainReader;

/// One deployed contract: address plus ABI.
#[derive(Debug, Clone)]
pub struct ContractHandle {
    pub address: Address,
    abi: Arc<JsonAbi>,
}

impl ContractHandle {
    pub fn new(address: Address, abi: Arc<JsonAbi>) -> Self {
        Self { address, abi }
    }

    fn function(&self, name: &str) -> Result<&Function> {
        self.abi
            .function(name)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| anyhow!("ABI has no function '{name}'"))
    }

    /// Selector-prefixed call data for `name(args)`.
    pub fn encode_call(&self, name: &str, args: &[DynSolValue]) -> Result<Bytes> {
        let function = self.function(name)?;
        let data = function
            .abi_encode_input(args)
            .with_context(|| format!("failed to encode call to {name}"))?;
        Ok(Bytes::from(data))
    }

    /// eth_call `name(args)` and decode the return values.
    pub async fn call(
        &self,
        rpc: &dyn ChainReader,
        name: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>> {
        let data = self.encode_call(name, args)?;
        let output = rpc.call(self.address, &data).await?;
        let function = self.function(name)?;
        function
            .abi_decode_output(&output, true)
            .with_context(|| format!("failed to decode return of {name}"))
    }
}

/// Vault contract surface.
#[derive(Debug, Clone)]
pub struct VaultHandle {
    pub inner: ContractHandle,
}

impl VaultHandle {
    pub fn new(address: Address, abi: Arc<JsonAbi>) -> Self {
        Self { inner: ContractHandle::new(address, abi) }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub async fn executor(&self, rpc: &dyn ChainReader) -> Result<Address> {
        single_address(self.inner.call(rpc, "executor", &[]).await?)
    }

    pub async fn strategy(&self, rpc: &dyn ChainReader) -> Result<Address> {
        single_address(self.inner.call(rpc, "strategy", &[]).await?)
    }

    pub async fn target_tokens(&self, rpc: &dyn ChainReader) -> Result<Vec<String>> {
        string_array(self.inner.call(rpc, "getTargetTokens", &[]).await?)
    }

    pub async fn target_platforms(&self, rpc: &dyn ChainReader) -> Result<Vec<String>> {
        string_array(self.inner.call(rpc, "getTargetPlatforms", &[]).await?)
    }

    pub fn set_strategy_data(&self, strategy: Address) -> Result<Bytes> {
        self.inner.encode_call("setStrategy", &[DynSolValue::Address(strategy)])
    }

    pub fn remove_strategy_data(&self) -> Result<Bytes> {
        self.inner.encode_call("removeStrategy", &[])
    }

    pub fn set_executor_data(&self, executor: Address) -> Result<Bytes> {
        self.inner.encode_call("setExecutor", &[DynSolValue::Address(executor)])
    }

    pub fn remove_executor_data(&self) -> Result<Bytes> {
        self.inner.encode_call("removeExecutor", &[])
    }

    pub fn set_target_tokens_data(&self, symbols: &[String]) -> Result<Bytes> {
        self.inner.encode_call("setTargetTokens", &[string_array_value(symbols)])
    }

    pub fn set_target_platforms_data(&self, platforms: &[String]) -> Result<Bytes> {
        self.inner.encode_call("setTargetPlatforms", &[string_array_value(platforms)])
    }

    /// The batched meta-transaction entry point.
    pub fn execute_data(&self, targets: &[Address], data: &[Bytes]) -> Result<Bytes> {
        let targets = DynSolValue::Array(
            targets.iter().map(|a| DynSolValue::Address(*a)).collect(),
        );
        let data = DynSolValue::Array(
            data.iter().map(|d| DynSolValue::Bytes(d.to_vec())).collect(),
        );
        self.inner.encode_call("execute", &[targets, data])
    }
}

/// Strategy contract surface.
#[derive(Debug, Clone)]
pub struct StrategyHandle {
    pub inner: ContractHandle,
}

impl StrategyHandle {
    pub fn new(address: Address, abi: Arc<JsonAbi>) -> Self {
        Self { inner: ContractHandle::new(address, abi) }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub async fn authorized_vaults(&self, rpc: &dyn ChainReader, vault: Address) -> Result<bool> {
        let values = self
            .inner
            .call(rpc, "authorizedVaults", &[DynSolValue::Address(vault)])
            .await?;
        values
            .first()
            .and_then(DynSolValue::as_bool)
            .ok_or_else(|| anyhow!("authorizedVaults returned no bool"))
    }

    pub async fn selected_template(&self, rpc: &dyn ChainReader, vault: Address) -> Result<u64> {
        let values = self
            .inner
            .call(rpc, "selectedTemplate", &[DynSolValue::Address(vault)])
            .await?;
        let raw = values
            .first()
            .and_then(DynSolValue::as_uint)
            .map(|(u, _)| u)
            .ok_or_else(|| anyhow!("selectedTemplate returned no uint"))?;
        u64::try_from(raw).map_err(|_| anyhow!("selectedTemplate out of range"))
    }

    /// Read back opaquely; decoded lazily if ever needed for diagnosis.
    pub async fn customization_bitmap(&self, rpc: &dyn ChainReader, vault: Address) -> Result<String> {
        let values = self
            .inner
            .call(rpc, "customizationBitmap", &[DynSolValue::Address(vault)])
            .await?;
        let raw: U256 = values
            .first()
            .and_then(DynSolValue::as_uint)
            .map(|(u, _)| u)
            .ok_or_else(|| anyhow!("customizationBitmap returned no uint"))?;
        Ok(raw.to_string())
    }

    /// Raw parameter tuple in descriptor declaration order.
    pub async fn get_all_parameters(
        &self,
        rpc: &dyn ChainReader,
        vault: Address,
    ) -> Result<Vec<DynSolValue>> {
        self.inner
            .call(rpc, "getAllParameters", &[DynSolValue::Address(vault)])
            .await
    }

    pub fn authorize_vault_data(&self, vault: Address) -> Result<Bytes> {
        self.inner.encode_call("authorizeVault", &[DynSolValue::Address(vault)])
    }

    pub fn select_template_data(&self, template_enum: u8) -> Result<Bytes> {
        self.inner.encode_call(
            "selectTemplate",
            &[DynSolValue::Uint(U256::from(template_enum), 256)],
        )
    }

    /// Call data for one parameter-group setter, arguments encoded and
    /// lowered to the setter's ABI types.
    pub fn group_call_data(
        &self,
        descriptor: &StrategyDescriptor,
        group: &GroupCall,
    ) -> Result<Bytes> {
        let function = self.inner.function(&group.setter_method)?;
        if function.inputs.len() != group.args.len() {
            return Err(anyhow!(
                "setter {} expects {} arguments, plan has {}",
                group.setter_method,
                function.inputs.len(),
                group.args.len()
            ));
        }
        let mut lowered = Vec::with_capacity(group.args.len());
        for ((param_id, value), input) in group.args.iter().zip(&function.inputs) {
            descriptor
                .parameter(param_id)
                .ok_or_else(|| anyhow!("unknown parameter '{param_id}'"))?;
            let encoded: EncodedParam = codec::encode(param_id, value)?;
            lowered.push(codec::lower(param_id, encoded, &input.ty)?);
        }
        self.inner.encode_call(&group.setter_method, &lowered)
    }
}

fn single_address(values: Vec<DynSolValue>) -> Result<Address> {
    values
        .first()
        .and_then(DynSolValue::as_address)
        .ok_or_else(|| anyhow!("expected a single address return"))
}

fn string_array(values: Vec<DynSolValue>) -> Result<Vec<String>> {
    let array = values
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("expected an array return"))?;
    match array {
        DynSolValue::Array(items) => items
            .into_iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("expected string array element"))
            })
            .collect(),
        _ => Err(anyhow!("expected an array return")),
    }
}

fn string_array_value(items: &[String]) -> DynSolValue {
    DynSolValue::Array(items.iter().map(|s| DynSolValue::String(s.clone())).collect())
}
