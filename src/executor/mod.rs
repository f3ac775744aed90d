//! Step executor
//!
//! Drives a plan step by step: submit through the wallet, await block
//! inclusion, classify the outcome, advance the cursor. A halted run is
//! never retried silently; the user re-submits, which rebuilds the plan
//! from the now-observed state so already-landed steps are skipped.

pub mod state_machine;

pub use state_machine::{RunState, RunStateMachine, StateTransition};

use alloy_primitives::{Address, Bytes};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chain::{
    ChainReader, Confirmer, StrategyHandle, TxFailure, TxRequest, VaultHandle, WalletGateway,
};
use crate::model::DesiredState;
use crate::network::{AppEvent, EventBus};
use crate::plan::{self, BatchPlan, Step, StepKind, StepPayload};
use crate::registry::{ContractRegistry, StrategyCatalog, StrategyDescriptor, VAULT_CONTRACT_KEY};
use crate::store::{TransactionRecord, VaultStore};
use crate::validate::{self, ValidationWarning};

/// Progress of the current (or last) run, as a renderable snapshot.
#[derive(Debug, Clone, Default)]
pub struct StepProgress {
    pub steps: Vec<Step>,
    /// Index of the step currently being driven; equals `steps.len()`
    /// once every step confirmed.
    pub cursor: usize,
    pub loading: bool,
    pub error: Option<String>,
    pub warning: Option<String>,
}

/// Display status of one step, derived from cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    Pending,
    WaitingForWallet,
    Failed,
    Upcoming,
    /// Upcoming while an earlier step already failed or was cancelled.
    CancelledDownstream,
}

/// Derive the status icon for `index` from a progress snapshot.
pub fn step_status(progress: &StepProgress, index: usize) -> StepStatus {
    let halted = progress.error.is_some() || progress.warning.is_some();
    if index < progress.cursor {
        StepStatus::Completed
    } else if index == progress.cursor {
        if halted {
            StepStatus::Failed
        } else if progress.loading {
            StepStatus::Pending
        } else {
            StepStatus::WaitingForWallet
        }
    } else if halted {
        StepStatus::CancelledDownstream
    } else {
        StepStatus::Upcoming
    }
}

/// Outcome of one `save` or `deactivate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The diff was empty.
    NothingToDo,
    Completed { transactions: usize },
    UserCancelled { step: usize },
    Failed { step: usize, message: String },
    /// A run is already in progress; the call was ignored.
    Busy,
}

/// Coordinates plan building and execution for one wallet session.
pub struct PipelineExecutor {
    rpc: Arc<dyn ChainReader>,
    wallet: Arc<dyn WalletGateway>,
    registry: Arc<ContractRegistry>,
    catalog: Arc<StrategyCatalog>,
    store: Arc<VaultStore>,
    bus: Arc<EventBus>,
    confirmer: Confirmer,
    chain_id: u64,
    machine: RwLock<RunStateMachine>,
    progress: RwLock<StepProgress>,
}

impl PipelineExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rpc: Arc<dyn ChainReader>,
        wallet: Arc<dyn WalletGateway>,
        registry: Arc<ContractRegistry>,
        catalog: Arc<StrategyCatalog>,
        store: Arc<VaultStore>,
        bus: Arc<EventBus>,
        confirmer: Confirmer,
        chain_id: u64,
    ) -> Self {
        Self {
            rpc,
            wallet,
            registry,
            catalog,
            store,
            bus,
            confirmer,
            chain_id,
            machine: RwLock::new(RunStateMachine::new()),
            progress: RwLock::new(StepProgress::default()),
        }
    }

    pub fn run_state(&self) -> RunState {
        self.machine.read().current_state()
    }

    pub fn progress(&self) -> StepProgress {
        self.progress.read().clone()
    }

    pub fn step_statuses(&self) -> Vec<StepStatus> {
        let progress = self.progress.read();
        (0..progress.steps.len())
            .map(|i| step_status(&progress, i))
            .collect()
    }

    /// Close a finished or halted run, returning to idle. Progress is
    /// discarded from the executor's view only; chain state keeps the
    /// completed steps.
    pub fn close(&self) -> bool {
        let transitioned = self
            .machine
            .write()
            .transition_to_with_reason(RunState::Idle, Some("close".to_string()));
        if transitioned {
            *self.progress.write() = StepProgress::default();
        }
        transitioned
    }

    /// Cancel is close, guarded against an in-flight wallet prompt.
    pub fn cancel(&self) -> bool {
        if self.progress.read().loading {
            warn!("cancel ignored while a transaction is in flight");
            return false;
        }
        self.close()
    }

    /// Pre-flight checks for the desired configuration. Non-blocking:
    /// the caller surfaces the warnings and the user confirms or cancels
    /// before `save` is invoked.
    pub fn validate(&self, vault_address: Address, model: &DesiredState) -> Vec<ValidationWarning> {
        match self.store.get(&vault_address) {
            Some(record) => validate::check(&record, model.desired()),
            None => Vec::new(),
        }
    }

    /// Drive the desired configuration onto the chain.
    pub async fn save(&self, vault_address: Address, model: &mut DesiredState) -> Result<RunOutcome> {
        if !self.begin_run() {
            return Ok(RunOutcome::Busy);
        }

        let outcome = self.save_inner(vault_address, model).await;
        if outcome.is_err() {
            // planning failed before any submission; release the run
            self.machine
                .write()
                .transition_to_with_reason(RunState::Failed, Some("plan build failed".into()));
        }
        outcome
    }

    async fn save_inner(
        &self,
        vault_address: Address,
        model: &mut DesiredState,
    ) -> Result<RunOutcome> {
        let desired = model.desired().clone();
        let strategy_id = desired
            .strategy_id
            .clone()
            .ok_or_else(|| anyhow!("no strategy selected"))?;
        let descriptor = self
            .catalog
            .get(&strategy_id)
            .with_context(|| format!("unknown strategy '{strategy_id}'"))?
            .clone();

        let vault = VaultHandle::new(vault_address, self.registry.abi(VAULT_CONTRACT_KEY)?);
        let strategy_address = self.registry.address(&descriptor.contract_key, self.chain_id)?;
        let strategy = StrategyHandle::new(strategy_address, self.registry.abi(&descriptor.contract_key)?);

        let needs_authorization = self.needs_authorization(&strategy, vault_address).await;
        let observed_strategy_is_zero = self
            .store
            .get(&vault_address)
            .map(|v| v.strategy == Address::ZERO)
            .unwrap_or(true);

        let steps = plan::build_plan(
            model.observed(),
            &desired,
            model.diff(),
            &descriptor,
            observed_strategy_is_zero,
            needs_authorization,
        );

        if steps.is_empty() {
            info!(vault = %vault_address, "nothing to do");
            let mut machine = self.machine.write();
            machine.transition_to_with_reason(RunState::Success, Some("empty plan".into()));
            machine.transition_to(RunState::Idle);
            return Ok(RunOutcome::NothingToDo);
        }

        self.bus.publish(AppEvent::PlanStarted {
            vault: vault_address,
            steps: steps.len(),
        });
        metrics::counter!("vault_pilot_plans_started_total").increment(1);

        let outcome = self
            .run_steps(vault_address, &vault, &strategy, &descriptor, steps)
            .await?;

        if let RunOutcome::Completed { .. } = outcome {
            // observed state now equals the committed desired state
            model.commit();
            self.store.with_mut(&vault_address, |record| {
                record.set_strategy_address(strategy_address);
                record.strategy_id = Some(descriptor.id.clone());
                record.active_template = desired.active_template.clone();
                record.parameters = desired.parameters.clone();
                record.target_tokens = desired.target_tokens.clone();
                record.target_platforms = desired.target_platforms.clone();
            });
            self.bus.publish(AppEvent::PlanCompleted { vault: vault_address });
            self.bus.publish(AppEvent::Refresh);
            metrics::counter!("vault_pilot_plans_completed_total").increment(1);
        }

        Ok(outcome)
    }

    /// Deactivate the vault's strategy; with an executor present it is
    /// removed first, costing one extra wallet transaction.
    pub async fn deactivate(&self, vault_address: Address) -> Result<RunOutcome> {
        if !self.begin_run() {
            return Ok(RunOutcome::Busy);
        }

        let outcome = self.deactivate_inner(vault_address).await;
        if outcome.is_err() {
            self.machine
                .write()
                .transition_to_with_reason(RunState::Failed, Some("plan build failed".into()));
        }
        outcome
    }

    async fn deactivate_inner(&self, vault_address: Address) -> Result<RunOutcome> {
        let vault = VaultHandle::new(vault_address, self.registry.abi(VAULT_CONTRACT_KEY)?);
        let has_executor = self
            .store
            .get(&vault_address)
            .map(|v| v.has_executor())
            .unwrap_or(false);

        let steps = plan::build_deactivation_plan(has_executor);
        self.bus.publish(AppEvent::PlanStarted {
            vault: vault_address,
            steps: steps.len(),
        });
        metrics::counter!("vault_pilot_plans_started_total").increment(1);

        let outcome = self
            .run_deactivation_steps(vault_address, &vault, steps)
            .await?;

        if let RunOutcome::Completed { .. } = outcome {
            self.store.with_mut(&vault_address, |record| {
                record.set_executor_address(Address::ZERO);
                record.set_strategy_address(Address::ZERO);
                record.parameters.clear();
                record.target_tokens.clear();
                record.target_platforms.clear();
            });
            self.bus.publish(AppEvent::PlanCompleted { vault: vault_address });
            self.bus.publish(AppEvent::Refresh);
            metrics::counter!("vault_pilot_plans_completed_total").increment(1);
        }

        Ok(outcome)
    }

    fn begin_run(&self) -> bool {
        let mut machine = self.machine.write();
        if machine.is_running() {
            warn!("start ignored: a run is already in progress");
            return false;
        }
        if !machine.can_transition_to(RunState::Running) {
            warn!(state = %machine.current_state(), "start ignored: close the previous run first");
            return false;
        }
        machine.transition_to(RunState::Running);
        *self.progress.write() = StepProgress::default();
        true
    }

    /// Reads `authorizedVaults(vault)`. False or a revert (older strategy
    /// without this read) both mean the authorize step is needed.
    async fn needs_authorization(&self, strategy: &StrategyHandle, vault: Address) -> bool {
        match strategy.authorized_vaults(self.rpc.as_ref(), vault).await {
            Ok(authorized) => !authorized,
            Err(e) => {
                warn!(error = %e, "authorizedVaults read failed; assuming authorization needed");
                true
            }
        }
    }

    async fn run_steps(
        &self,
        vault_address: Address,
        vault: &VaultHandle,
        strategy: &StrategyHandle,
        descriptor: &StrategyDescriptor,
        steps: Vec<Step>,
    ) -> Result<RunOutcome> {
        self.progress.write().steps = steps.clone();

        for (index, step) in steps.iter().enumerate() {
            let request = self.build_request(step, vault, strategy, descriptor)?;
            if let Some(halted) = self.drive_step(vault_address, &steps, index, request).await {
                return Ok(halted);
            }
        }

        self.finish_run(steps.len())
    }

    async fn run_deactivation_steps(
        &self,
        vault_address: Address,
        vault: &VaultHandle,
        steps: Vec<Step>,
    ) -> Result<RunOutcome> {
        self.progress.write().steps = steps.clone();

        for (index, step) in steps.iter().enumerate() {
            let data = match step.kind {
                StepKind::RemoveExecutor => vault.remove_executor_data()?,
                StepKind::RemoveStrategy => vault.remove_strategy_data()?,
                other => return Err(anyhow!("unexpected step {other:?} in deactivation plan")),
            };
            let request = TxRequest::new(self.wallet.sender(), vault.address(), data);
            if let Some(halted) = self.drive_step(vault_address, &steps, index, request).await {
                return Ok(halted);
            }
            // the step landed; mirror it in the cache even if a later
            // step halts the run
            self.store.with_mut(&vault_address, |record| match step.kind {
                StepKind::RemoveExecutor => record.set_executor_address(Address::ZERO),
                StepKind::RemoveStrategy => record.set_strategy_address(Address::ZERO),
                _ => {}
            });
        }

        self.finish_run(steps.len())
    }

    /// Submit one step and wait for inclusion. Returns `Some(outcome)`
    /// when the run halts on this step.
    async fn drive_step(
        &self,
        vault_address: Address,
        steps: &[Step],
        index: usize,
        request: TxRequest,
    ) -> Option<RunOutcome> {
        let step = &steps[index];
        {
            let mut progress = self.progress.write();
            progress.cursor = index;
            progress.loading = true;
            progress.error = None;
            progress.warning = None;
        }
        info!(step = %step.title, index, "submitting step");

        let failure = match self.wallet.send_transaction(&request).await {
            Ok(hash) => match self.confirmer.wait(self.rpc.as_ref(), hash).await {
                Ok(receipt) => {
                    metrics::counter!("vault_pilot_steps_confirmed_total").increment(1);
                    self.store.append_history(
                        &vault_address,
                        TransactionRecord {
                            label: step.title.clone(),
                            tx_hash: Some(receipt.transaction_hash.to_string()),
                            timestamp: Utc::now().timestamp_millis(),
                            detail: serde_json::json!({ "kind": step.kind }),
                        },
                    );
                    let mut progress = self.progress.write();
                    progress.cursor = index + 1;
                    progress.loading = false;
                    None
                }
                Err(failure) => Some(failure),
            },
            Err(wallet_error) => Some(TxFailure::from(wallet_error)),
        };

        let failure = failure?;
        self.halt(vault_address, steps, index, failure)
    }

    /// Classify a step failure and move the machine to its halted state.
    fn halt(
        &self,
        vault_address: Address,
        steps: &[Step],
        index: usize,
        failure: TxFailure,
    ) -> Option<RunOutcome> {
        let step = &steps[index];
        let outcome = match failure {
            TxFailure::UserRejected => {
                let warning = rejection_warning(steps, index);
                warn!(step = %step.title, "user rejected step");
                metrics::counter!("vault_pilot_wallet_rejections_total").increment(1);
                {
                    let mut progress = self.progress.write();
                    progress.loading = false;
                    progress.warning = Some(warning);
                }
                self.machine
                    .write()
                    .transition_to_with_reason(RunState::UserCancelled, Some(step.title.clone()));
                RunOutcome::UserCancelled { step: index }
            }
            failure => {
                let message = format!("Failed at {}: {}", step.title, failure.display_reason());
                warn!(step = %step.title, error = %message, "step failed");
                metrics::counter!("vault_pilot_plans_failed_total").increment(1);
                {
                    let mut progress = self.progress.write();
                    progress.loading = false;
                    progress.error = Some(message.clone());
                }
                self.machine
                    .write()
                    .transition_to_with_reason(RunState::Failed, Some(step.title.clone()));
                RunOutcome::Failed { step: index, message }
            }
        };
        self.bus.publish(AppEvent::PlanHalted { vault: vault_address, step: index });
        Some(outcome)
    }

    fn finish_run(&self, transactions: usize) -> Result<RunOutcome> {
        self.machine.write().transition_to(RunState::Success);
        Ok(RunOutcome::Completed { transactions })
    }

    /// Build the wallet transaction for one configuration step.
    fn build_request(
        &self,
        step: &Step,
        vault: &VaultHandle,
        strategy: &StrategyHandle,
        descriptor: &StrategyDescriptor,
    ) -> Result<TxRequest> {
        let from = self.wallet.sender();
        let (to, data) = match (&step.kind, &step.payload) {
            (StepKind::AuthorizeVault, _) => {
                (strategy.address(), strategy.authorize_vault_data(vault.address())?)
            }
            (StepKind::SetStrategy, _) => {
                (vault.address(), vault.set_strategy_data(strategy.address())?)
            }
            (StepKind::SetTargetTokens, StepPayload::Tokens(symbols)) => {
                (vault.address(), vault.set_target_tokens_data(symbols)?)
            }
            (StepKind::SetTargetPlatforms, StepPayload::Platforms(platforms)) => {
                (vault.address(), vault.set_target_platforms_data(platforms)?)
            }
            (StepKind::BatchedParams, StepPayload::Batch(batch)) => {
                (vault.address(), self.build_batch_data(vault, strategy, descriptor, batch)?)
            }
            (kind, payload) => {
                return Err(anyhow!("step {kind:?} has mismatched payload {payload:?}"));
            }
        };
        Ok(TxRequest::new(from, to, data))
    }

    /// One `execute(targets[], data[])` call fanning out to the strategy.
    /// The template selection, when present, is the first sub-call.
    fn build_batch_data(
        &self,
        vault: &VaultHandle,
        strategy: &StrategyHandle,
        descriptor: &StrategyDescriptor,
        batch: &BatchPlan,
    ) -> Result<Bytes> {
        let mut targets: Vec<Address> = Vec::with_capacity(batch.sub_call_count());
        let mut data: Vec<Bytes> = Vec::with_capacity(batch.sub_call_count());

        if let Some(template_enum) = batch.template {
            targets.push(strategy.address());
            data.push(strategy.select_template_data(template_enum)?);
        }
        for group in &batch.groups {
            targets.push(strategy.address());
            data.push(strategy.group_call_data(descriptor, group)?);
        }

        vault.execute_data(&targets, &data)
    }
}

/// Warning text for a rejected step. Deactivations that already removed
/// the executor get a more specific message: the vault is half-way.
fn rejection_warning(steps: &[Step], index: usize) -> String {
    let rejected = &steps[index];
    let executor_already_removed = steps[..index]
        .iter()
        .any(|s| s.kind == StepKind::RemoveExecutor);
    if rejected.kind == StepKind::RemoveStrategy && executor_already_removed {
        "Executor removed but strategy deactivation cancelled. The strategy is still active."
            .to_string()
    } else {
        "Transaction cancelled. Configuration incomplete.".to_string()
    }
}
