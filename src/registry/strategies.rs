//! Strategy descriptors
//!
//! Static, data-driven description of each automated strategy: display
//! name, contract key, parameter specs, setter grouping, and the template
//! enum table with per-template preset defaults.

use crate::codec::{ParamKind, ParamValue};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One selectable option of a `select` parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub ordinal: i64,
}

/// Specification of one strategy parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub id: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub min: Option<Decimal>,
    #[serde(default)]
    pub max: Option<Decimal>,
    #[serde(default)]
    pub step: Option<Decimal>,
    #[serde(default)]
    pub options: Vec<SelectOption>,
}

/// The subset of parameters the strategy contract accepts in one setter
/// call, in the argument order the setter expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterGroup {
    pub setter_method: String,
    pub param_ids: Vec<String>,
}

/// A named preset: on-chain enum plus the default value bundle.
#[derive(Debug, Clone)]
pub struct TemplateDescriptor {
    pub id: String,
    pub enum_value: u8,
    pub defaults: BTreeMap<String, ParamValue>,
}

/// Everything the pipeline needs to know about one strategy.
#[derive(Debug, Clone)]
pub struct StrategyDescriptor {
    pub id: String,
    pub display_name: String,
    pub contract_key: String,
    pub parameters: Vec<ParameterSpec>,
    pub parameter_groups: Vec<ParameterGroup>,
    pub templates: Vec<TemplateDescriptor>,
}

impl StrategyDescriptor {
    pub fn parameter(&self, id: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.id == id)
    }

    pub fn template(&self, id: &str) -> Option<&TemplateDescriptor> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// `(template-id, enum)` table in declaration order. Custom is not
    /// listed; it always maps to 0.
    pub fn template_enum_table(&self) -> Vec<(String, u8)> {
        self.templates
            .iter()
            .map(|t| (t.id.clone(), t.enum_value))
            .collect()
    }

    /// Preset default values for `template`, or `None` for unknown ids.
    pub fn preset_defaults(&self, template: &str) -> Option<&BTreeMap<String, ParamValue>> {
        self.template(template).map(|t| &t.defaults)
    }

    /// Human-readable signature for a group's setter, argument types taken
    /// from the parameter kinds (booleans stay `bool`, everything else is
    /// carried as `uint256`).
    pub fn setter_signature(&self, group: &ParameterGroup) -> Result<String> {
        let mut args = Vec::with_capacity(group.param_ids.len());
        for id in &group.param_ids {
            let spec = self
                .parameter(id)
                .with_context(|| format!("group '{}' names unknown parameter '{id}'", group.setter_method))?;
            let sol = match spec.kind {
                ParamKind::Boolean => "bool",
                _ => "uint256",
            };
            args.push(format!("{sol} {id}"));
        }
        Ok(format!("function {}({})", group.setter_method, args.join(", ")))
    }

    /// Signature of the aggregate read, returning every parameter in
    /// declaration order.
    pub fn get_all_parameters_signature(&self) -> String {
        let returns: Vec<&str> = self
            .parameters
            .iter()
            .map(|p| match p.kind {
                ParamKind::Boolean => "bool",
                _ => "uint256",
            })
            .collect();
        format!(
            "function getAllParameters(address vault) view returns ({})",
            returns.join(", ")
        )
    }
}

/// Lookup table of every known strategy, keyed by strategy-id.
#[derive(Debug, Default)]
pub struct StrategyCatalog {
    by_id: HashMap<String, StrategyDescriptor>,
}

impl StrategyCatalog {
    pub fn new(descriptors: impl IntoIterator<Item = StrategyDescriptor>) -> Self {
        Self {
            by_id: descriptors.into_iter().map(|d| (d.id.clone(), d)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&StrategyDescriptor> {
        self.by_id.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &StrategyDescriptor> {
        self.by_id.values()
    }

    /// The strategies this deployment ships with.
    pub fn builtin() -> Self {
        Self::new([bob_descriptor()])
    }
}

/// "Bob" - the balanced-optimal-backtested rebalancing strategy.
fn bob_descriptor() -> StrategyDescriptor {
    let conservative: BTreeMap<String, ParamValue> = [
        ("maxSlippage".to_string(), ParamValue::Percent(dec!(0.5))),
        ("priceImpact".to_string(), ParamValue::Decimal(dec!(0.3))),
        ("minFeeValue".to_string(), ParamValue::FiatCurrency(dec!(5.00))),
        ("autoCompound".to_string(), ParamValue::Boolean(true)),
        ("rebalanceInterval".to_string(), ParamValue::Integer(86_400)),
        ("riskLevel".to_string(), ParamValue::Select(0)),
    ]
    .into_iter()
    .collect();

    let mut aggressive = conservative.clone();
    aggressive.insert("maxSlippage".to_string(), ParamValue::Percent(dec!(1.0)));
    aggressive.insert("priceImpact".to_string(), ParamValue::Decimal(dec!(1.0)));
    aggressive.insert("minFeeValue".to_string(), ParamValue::FiatCurrency(dec!(1.00)));
    aggressive.insert("rebalanceInterval".to_string(), ParamValue::Integer(3_600));
    aggressive.insert("riskLevel".to_string(), ParamValue::Select(2));

    StrategyDescriptor {
        id: "bob".to_string(),
        display_name: "Bob".to_string(),
        contract_key: "BobStrategy".to_string(),
        parameters: vec![
            ParameterSpec {
                id: "maxSlippage".into(),
                kind: ParamKind::Percent,
                min: Some(dec!(0.01)),
                max: Some(dec!(5)),
                step: Some(dec!(0.01)),
                options: vec![],
            },
            ParameterSpec {
                id: "priceImpact".into(),
                kind: ParamKind::Decimal,
                min: Some(dec!(0)),
                max: Some(dec!(10)),
                step: Some(dec!(0.1)),
                options: vec![],
            },
            ParameterSpec {
                id: "minFeeValue".into(),
                kind: ParamKind::FiatCurrency,
                min: Some(dec!(0)),
                max: None,
                step: Some(dec!(0.01)),
                options: vec![],
            },
            ParameterSpec {
                id: "autoCompound".into(),
                kind: ParamKind::Boolean,
                min: None,
                max: None,
                step: None,
                options: vec![],
            },
            ParameterSpec {
                id: "rebalanceInterval".into(),
                kind: ParamKind::Integer,
                min: Some(dec!(600)),
                max: Some(dec!(604800)),
                step: Some(dec!(1)),
                options: vec![],
            },
            ParameterSpec {
                id: "riskLevel".into(),
                kind: ParamKind::Select,
                min: None,
                max: None,
                step: None,
                options: vec![
                    SelectOption { label: "Low".into(), ordinal: 0 },
                    SelectOption { label: "Medium".into(), ordinal: 1 },
                    SelectOption { label: "High".into(), ordinal: 2 },
                ],
            },
        ],
        parameter_groups: vec![
            ParameterGroup {
                setter_method: "setSwapLimits".into(),
                param_ids: vec!["maxSlippage".into(), "priceImpact".into()],
            },
            ParameterGroup {
                setter_method: "setFeePolicy".into(),
                param_ids: vec!["minFeeValue".into(), "autoCompound".into()],
            },
            ParameterGroup {
                setter_method: "setSchedule".into(),
                param_ids: vec!["rebalanceInterval".into(), "riskLevel".into()],
            },
        ],
        templates: vec![
            TemplateDescriptor {
                id: "conservative".into(),
                enum_value: 1,
                defaults: conservative,
            },
            TemplateDescriptor {
                id: "aggressive".into(),
                enum_value: 2,
                defaults: aggressive,
            },
        ],
    }
}
