//! Plan builder
//!
//! Computes a minimal ordered step list from the diff between observed and
//! desired configuration. One step is one wallet transaction; the batched
//! parameter step fans out to several strategy setters through the vault's
//! `execute` entry point but still costs a single signature.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::ParamValue;
use crate::model::{ChangeFlags, ConfigState};
use crate::registry::StrategyDescriptor;

/// Logical transaction kinds, in canonical plan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    AuthorizeVault,
    SetStrategy,
    SetTargetTokens,
    SetTargetPlatforms,
    BatchedParams,
    RemoveExecutor,
    RemoveStrategy,
}

/// One sub-call of the batched parameter step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCall {
    pub setter_method: String,
    /// `(param-id, value)` in the setter's argument order.
    pub args: Vec<(String, ParamValue)>,
}

/// Content of the batched meta-transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    /// Template enum to select, emitted as the first sub-call.
    pub template: Option<u8>,
    pub groups: Vec<GroupCall>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.template.is_none() && self.groups.is_empty()
    }

    pub fn sub_call_count(&self) -> usize {
        self.groups.len() + usize::from(self.template.is_some())
    }
}

/// Step payloads carry the logical arguments; addresses and call data are
/// resolved at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepPayload {
    None,
    SetStrategy { strategy_id: String },
    Tokens(Vec<String>),
    Platforms(Vec<String>),
    Batch(BatchPlan),
}

/// One logical transaction of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    pub description: String,
    pub kind: StepKind,
    pub payload: StepPayload,
}

impl Step {
    fn simple(kind: StepKind, title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: description.to_string(),
            kind,
            payload: StepPayload::None,
        }
    }
}

/// Build the configuration plan.
///
/// Step order is strict: authorize, strategy, tokens, platforms, batched
/// parameters. Each step appears at most once, and only when its condition
/// holds. A zero-step plan is valid and means there is nothing to do.
pub fn build_plan(
    observed: &ConfigState,
    desired: &ConfigState,
    flags: ChangeFlags,
    descriptor: &StrategyDescriptor,
    observed_strategy_is_zero: bool,
    needs_authorization: bool,
) -> Vec<Step> {
    let mut steps = Vec::new();

    if needs_authorization {
        steps.push(Step::simple(
            StepKind::AuthorizeVault,
            "Authorize vault",
            "Grant the strategy permission to act for this vault",
        ));
    }

    if observed_strategy_is_zero || observed.strategy_id != desired.strategy_id {
        steps.push(Step {
            title: "Set strategy".to_string(),
            description: format!("Activate the {} strategy on the vault", descriptor.display_name),
            kind: StepKind::SetStrategy,
            payload: StepPayload::SetStrategy { strategy_id: descriptor.id.clone() },
        });
    }

    if flags.tokens_changed && !desired.target_tokens.is_empty() {
        steps.push(Step {
            title: "Set target tokens".to_string(),
            description: "Update the token set the strategy manages".to_string(),
            kind: StepKind::SetTargetTokens,
            payload: StepPayload::Tokens(desired.target_tokens.iter().cloned().collect()),
        });
    }

    if flags.platforms_changed && !desired.target_platforms.is_empty() {
        steps.push(Step {
            title: "Set target platforms".to_string(),
            description: "Update the platforms the strategy may deploy liquidity on".to_string(),
            kind: StepKind::SetTargetPlatforms,
            payload: StepPayload::Platforms(desired.target_platforms.iter().cloned().collect()),
        });
    }

    if flags.template_changed || (flags.params_changed && !desired.parameters.is_empty()) {
        let batch = build_batch(desired, flags, descriptor);
        if !batch.is_empty() {
            steps.push(Step {
                title: "Configure parameters".to_string(),
                description: format!(
                    "Apply {} strategy call(s) in one transaction through the vault",
                    batch.sub_call_count()
                ),
                kind: StepKind::BatchedParams,
                payload: StepPayload::Batch(batch),
            });
        }
    }

    debug!(steps = steps.len(), "plan built");
    steps
}

/// Assemble the batched meta-transaction content.
///
/// The template selection, when pending, is the first sub-call. Parameter
/// groups are included when the parameters changed or the strategy itself
/// is newly set (a fresh strategy has no configuration yet); a group is
/// skipped unless every one of its parameter ids has a value.
fn build_batch(desired: &ConfigState, flags: ChangeFlags, descriptor: &StrategyDescriptor) -> BatchPlan {
    let template = if flags.template_changed {
        Some(crate::codec::template_to_enum(
            &descriptor.template_enum_table(),
            desired.active_template.as_deref(),
        ))
    } else {
        None
    };

    let mut groups = Vec::new();
    if flags.params_changed || flags.strategy_changed {
        for group in &descriptor.parameter_groups {
            let complete = group
                .param_ids
                .iter()
                .all(|id| desired.parameters.contains_key(id));
            if !complete {
                debug!(setter = %group.setter_method, "skipping incomplete parameter group");
                continue;
            }
            groups.push(GroupCall {
                setter_method: group.setter_method.clone(),
                args: group
                    .param_ids
                    .iter()
                    .map(|id| (id.clone(), desired.parameters[id].clone()))
                    .collect(),
            });
        }
    }

    BatchPlan { template, groups }
}

/// Build a deactivation plan. With an executor present the removal takes
/// two wallet transactions; without one, a single transaction suffices.
pub fn build_deactivation_plan(has_executor: bool) -> Vec<Step> {
    let mut steps = Vec::new();
    if has_executor {
        steps.push(Step::simple(
            StepKind::RemoveExecutor,
            "Remove executor",
            "Revoke the automation executor's access to the vault",
        ));
    }
    steps.push(Step::simple(
        StepKind::RemoveStrategy,
        "Deactivate strategy",
        "Detach the strategy from the vault",
    ));
    steps
}

/// Canonical position of each kind inside a configuration plan.
pub fn canonical_order(kind: StepKind) -> u8 {
    match kind {
        StepKind::AuthorizeVault => 0,
        StepKind::SetStrategy => 1,
        StepKind::SetTargetTokens => 2,
        StepKind::SetTargetPlatforms => 3,
        StepKind::BatchedParams => 4,
        StepKind::RemoveExecutor => 5,
        StepKind::RemoveStrategy => 6,
    }
}
