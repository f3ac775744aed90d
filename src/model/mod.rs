//! Desired-state model
//!
//! Two configuration snapshots are kept per vault: `observed` reflects the
//! last successful read from chain, `desired` reflects edits. Change flags
//! are derived by diffing the two; the parameter baseline switches to the
//! preset defaults while a new preset selection is pending, so picking a
//! preset without further edits is not a parameter change.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::codec::ParamValue;
use crate::registry::StrategyCatalog;
use crate::store::Vault;

/// One configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigState {
    pub strategy_id: Option<String>,
    /// `None` means custom (no preset selected).
    pub active_template: Option<String>,
    pub parameters: BTreeMap<String, ParamValue>,
    pub target_tokens: BTreeSet<String>,
    pub target_platforms: BTreeSet<String>,
}

impl ConfigState {
    pub fn from_vault(vault: &Vault) -> Self {
        Self {
            strategy_id: vault.strategy_id.clone(),
            active_template: vault.active_template.clone(),
            parameters: vault.parameters.clone(),
            target_tokens: vault.target_tokens.clone(),
            target_platforms: vault.target_platforms.clone(),
        }
    }
}

/// Derived change-tracking flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    pub strategy_changed: bool,
    pub template_changed: bool,
    pub tokens_changed: bool,
    pub platforms_changed: bool,
    pub params_changed: bool,
}

impl ChangeFlags {
    pub fn any(&self) -> bool {
        self.strategy_changed
            || self.template_changed
            || self.tokens_changed
            || self.platforms_changed
            || self.params_changed
    }
}

/// Holds the observed/desired pair and answers diff queries.
#[derive(Debug, Clone)]
pub struct DesiredState {
    observed: ConfigState,
    desired: ConfigState,
    catalog: Arc<StrategyCatalog>,
}

impl DesiredState {
    pub fn new(catalog: Arc<StrategyCatalog>) -> Self {
        Self {
            observed: ConfigState::default(),
            desired: ConfigState::default(),
            catalog,
        }
    }

    /// Reset both snapshots from a cached vault record.
    pub fn load_from_observed(&mut self, vault: &Vault) {
        self.observed = ConfigState::from_vault(vault);
        self.desired = self.observed.clone();
    }

    /// Replace the observed snapshot (after a chain read) without touching
    /// pending edits.
    pub fn set_observed(&mut self, observed: ConfigState) {
        self.observed = observed;
    }

    pub fn observed(&self) -> &ConfigState {
        &self.observed
    }

    pub fn desired(&self) -> &ConfigState {
        &self.desired
    }

    pub fn set_strategy(&mut self, id: impl Into<String>) {
        self.desired.strategy_id = Some(id.into());
    }

    /// Select a preset (or `None` for custom). Selecting a preset loads
    /// its defaults into the desired parameter map.
    pub fn set_template(&mut self, template: Option<String>) {
        if let (Some(strategy_id), Some(template_id)) =
            (self.desired.strategy_id.clone(), template.as_deref())
        {
            if let Some(defaults) = self
                .catalog
                .get(&strategy_id)
                .and_then(|d| d.preset_defaults(template_id))
            {
                self.desired.parameters = defaults.clone();
            }
        }
        self.desired.active_template = template;
    }

    pub fn set_parameter(&mut self, param_id: impl Into<String>, value: ParamValue) {
        self.desired.parameters.insert(param_id.into(), value);
    }

    pub fn set_target_tokens(&mut self, tokens: BTreeSet<String>) {
        self.desired.target_tokens = tokens;
    }

    pub fn set_target_platforms(&mut self, platforms: BTreeSet<String>) {
        self.desired.target_platforms = platforms;
    }

    /// Discard edits, returning to the observed snapshot.
    pub fn revert(&mut self) {
        self.desired = self.observed.clone();
    }

    /// Mark the desired state as committed: observed becomes desired and
    /// every change flag derives to false.
    pub fn commit(&mut self) {
        self.observed = self.desired.clone();
    }

    /// Derive the change flags from the two snapshots.
    pub fn diff(&self) -> ChangeFlags {
        let baseline = self.param_baseline();
        ChangeFlags {
            strategy_changed: self.desired.strategy_id != self.observed.strategy_id,
            template_changed: self.desired.active_template != self.observed.active_template,
            tokens_changed: self.desired.target_tokens != self.observed.target_tokens,
            platforms_changed: self.desired.target_platforms != self.observed.target_platforms,
            params_changed: self.desired.parameters != *baseline,
        }
    }

    /// The comparison baseline for `params_changed`.
    ///
    /// While a newly selected preset is pending, the preset defaults are
    /// the baseline, so selecting a preset without edits reports no
    /// parameter change. Once the selection is committed (or when the
    /// selection is custom), the observed parameters are the baseline.
    fn param_baseline(&self) -> &BTreeMap<String, ParamValue> {
        if self.desired.active_template != self.observed.active_template {
            if let (Some(strategy_id), Some(template_id)) = (
                self.desired.strategy_id.as_deref(),
                self.desired.active_template.as_deref(),
            ) {
                if let Some(defaults) = self
                    .catalog
                    .get(strategy_id)
                    .and_then(|d| d.preset_defaults(template_id))
                {
                    return defaults;
                }
            }
        }
        &self.observed.parameters
    }
}
