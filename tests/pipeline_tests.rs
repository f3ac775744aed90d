//! Integration tests for the strategy configuration pipeline
//!
//! Drives the executor end-to-end against an in-memory chain and wallet,
//! covering the full-configuration, incremental-edit, and deactivation
//! flows plus the event-stream reconciliation path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy_primitives::{address, Address, Bytes, B256};
use async_trait::async_trait;
use rust_decimal_macros::dec;

use vault_pilot::chain::{
    ChainReader, Confirmer, TxFailure, TxReceipt, TxRequest, WalletError, WalletGateway,
};
use vault_pilot::codec::ParamValue;
use vault_pilot::executor::{PipelineExecutor, RunOutcome, RunState};
use vault_pilot::model::DesiredState;
use vault_pilot::network::{AppEvent, EventBus, SseParser};
use vault_pilot::plan::StepKind;
use vault_pilot::reconcile::Reconciler;
use vault_pilot::registry::{ContractRegistry, StrategyCatalog, VAULT_CONTRACT_KEY};
use vault_pilot::store::{Vault, VaultStore};

const CHAIN_ID: u64 = 137;

fn vault_address() -> Address {
    address!("00000000000000000000000000000000000000a1")
}

fn owner_address() -> Address {
    address!("00000000000000000000000000000000000000ee")
}

fn strategy_address() -> Address {
    address!("00000000000000000000000000000000000000b0")
}

fn executor_address() -> Address {
    address!("00000000000000000000000000000000000000c0")
}

/// In-memory chain: canned eth_call responses keyed by target + selector,
/// receipts always succeed.
struct FakeChain {
    responses: Mutex<HashMap<(Address, [u8; 4]), Bytes>>,
}

impl FakeChain {
    fn new() -> Self {
        Self { responses: Mutex::new(HashMap::new()) }
    }

    fn respond(&self, to: Address, selector: [u8; 4], data: Bytes) {
        self.responses.lock().unwrap().insert((to, selector), data);
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn call(&self, to: Address, data: &Bytes) -> anyhow::Result<Bytes> {
        let selector: [u8; 4] = data[..4].try_into().unwrap();
        self.responses
            .lock()
            .unwrap()
            .get(&(to, selector))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("execution reverted"))
    }

    async fn receipt(&self, hash: B256) -> anyhow::Result<Option<TxReceipt>> {
        Ok(Some(TxReceipt {
            transaction_hash: hash,
            block_number: Some(1),
            success: true,
        }))
    }
}

/// In-memory wallet: records every prompt, optionally rejecting one.
struct FakeWallet {
    sender: Address,
    prompts: Mutex<Vec<TxRequest>>,
    reject_at: Option<usize>,
}

impl FakeWallet {
    fn new() -> Self {
        Self { sender: owner_address(), prompts: Mutex::new(Vec::new()), reject_at: None }
    }

    fn rejecting_prompt(index: usize) -> Self {
        Self { reject_at: Some(index), ..Self::new() }
    }

    fn prompts(&self) -> Vec<TxRequest> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletGateway for FakeWallet {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn send_transaction(&self, request: &TxRequest) -> Result<B256, WalletError> {
        let mut prompts = self.prompts.lock().unwrap();
        let index = prompts.len();
        prompts.push(request.clone());
        if self.reject_at == Some(index) {
            return Err(WalletError::rejected());
        }
        Ok(B256::with_last_byte(index as u8 + 1))
    }
}

fn encoded_bool(value: bool) -> Bytes {
    let mut word = [0u8; 32];
    word[31] = u8::from(value);
    Bytes::from(word.to_vec())
}

fn selector(registry: &ContractRegistry, key: &str, function: &str) -> [u8; 4] {
    registry
        .abi(key)
        .unwrap()
        .function(function)
        .and_then(|overloads| overloads.first())
        .unwrap()
        .selector()
        .into()
}

struct Harness {
    chain: Arc<FakeChain>,
    wallet: Arc<FakeWallet>,
    registry: Arc<ContractRegistry>,
    catalog: Arc<StrategyCatalog>,
    store: Arc<VaultStore>,
    bus: Arc<EventBus>,
    executor: PipelineExecutor,
}

fn harness(wallet: FakeWallet) -> Harness {
    let catalog = Arc::new(StrategyCatalog::builtin());
    let mut registry = ContractRegistry::with_builtin_abis(&catalog).unwrap();
    registry
        .set_address("BobStrategy", CHAIN_ID, strategy_address())
        .unwrap();
    let registry = Arc::new(registry);

    let chain = Arc::new(FakeChain::new());
    let wallet = Arc::new(wallet);
    let store = Arc::new(VaultStore::new());
    let bus = Arc::new(EventBus::new(256));

    let executor = PipelineExecutor::new(
        chain.clone(),
        wallet.clone(),
        registry.clone(),
        catalog.clone(),
        store.clone(),
        bus.clone(),
        Confirmer::default(),
        CHAIN_ID,
    );

    Harness { chain, wallet, registry, catalog, store, bus, executor }
}

fn fresh_vault_record() -> Vault {
    Vault::new(vault_address(), owner_address(), "test vault")
}

fn configured_vault_record(catalog: &StrategyCatalog) -> Vault {
    let mut vault = fresh_vault_record();
    vault.set_strategy_address(strategy_address());
    vault.strategy_id = Some("bob".into());
    vault.active_template = Some("conservative".into());
    vault.parameters = catalog
        .get("bob")
        .unwrap()
        .preset_defaults("conservative")
        .unwrap()
        .clone();
    vault.target_tokens = ["USDC".to_string(), "USDT".to_string()].into();
    vault.target_platforms = ["uniswapV3".to_string()].into();
    vault
}

/// Scenario: vault with no strategy gets the full five-step plan.
#[tokio::test]
async fn full_configuration_takes_five_transactions() {
    let h = harness(FakeWallet::new());
    h.store.upsert(fresh_vault_record());

    // authorizedVaults returns false: the authorize step is needed
    h.chain.respond(
        strategy_address(),
        selector(&h.registry, "BobStrategy", "authorizedVaults"),
        encoded_bool(false),
    );

    let mut model = DesiredState::new(h.catalog.clone());
    model.set_strategy("bob");
    model.set_template(Some("conservative".into()));
    model.set_target_tokens(["USDC".to_string(), "USDT".to_string()].into());
    model.set_target_platforms(["uniswapV3".to_string()].into());

    let outcome = h.executor.save(vault_address(), &mut model).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { transactions: 5 });

    let prompts = h.wallet.prompts();
    assert_eq!(prompts.len(), 5);

    // step 0 targets the strategy (authorize), the rest target the vault
    assert_eq!(prompts[0].to, strategy_address());
    for prompt in &prompts[1..] {
        assert_eq!(prompt.to, vault_address());
    }

    let kinds: Vec<StepKind> = h.executor.progress().steps.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StepKind::AuthorizeVault,
            StepKind::SetStrategy,
            StepKind::SetTargetTokens,
            StepKind::SetTargetPlatforms,
            StepKind::BatchedParams,
        ]
    );

    // observed equals desired, all flags reset
    assert!(!model.diff().any());

    let record = h.store.get(&vault_address()).unwrap();
    assert!(record.has_active_strategy);
    assert_eq!(record.strategy, strategy_address());
    assert_eq!(record.active_template.as_deref(), Some("conservative"));
}

/// Scenario: a single parameter edit under a preset is one transaction.
#[tokio::test]
async fn single_param_edit_is_one_batched_transaction() {
    let h = harness(FakeWallet::new());
    let record = configured_vault_record(&h.catalog);
    let mut model = DesiredState::new(h.catalog.clone());
    model.load_from_observed(&record);
    h.store.upsert(record);

    // vault already authorized
    h.chain.respond(
        strategy_address(),
        selector(&h.registry, "BobStrategy", "authorizedVaults"),
        encoded_bool(true),
    );

    model.set_parameter("maxSlippage", ParamValue::Percent(dec!(1.0)));

    let outcome = h.executor.save(vault_address(), &mut model).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { transactions: 1 });

    let prompts = h.wallet.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].to, vault_address());
    // the batch goes through execute(targets, data)
    let execute_selector = selector(&h.registry, VAULT_CONTRACT_KEY, "execute");
    assert_eq!(&prompts[0].data[..4], &execute_selector);

    // paramsChanged false afterward
    assert!(!model.diff().any());
    let record = h.store.get(&vault_address()).unwrap();
    assert_eq!(
        record.parameters.get("maxSlippage"),
        Some(&ParamValue::Percent(dec!(1.0)))
    );
}

/// Scenario: empty diff means no wallet interaction at all.
#[tokio::test]
async fn empty_diff_is_nothing_to_do() {
    let h = harness(FakeWallet::new());
    let record = configured_vault_record(&h.catalog);
    let mut model = DesiredState::new(h.catalog.clone());
    model.load_from_observed(&record);
    h.store.upsert(record);

    h.chain.respond(
        strategy_address(),
        selector(&h.registry, "BobStrategy", "authorizedVaults"),
        encoded_bool(true),
    );

    let mut rx = h.bus.subscribe();
    let outcome = h.executor.save(vault_address(), &mut model).await.unwrap();
    assert_eq!(outcome, RunOutcome::NothingToDo);
    assert!(h.wallet.prompts().is_empty());
    assert_eq!(h.executor.run_state(), RunState::Idle);
    // no progress events for an empty plan
    assert!(rx.try_recv().is_err());
}

/// Scenario: deactivation with an executor takes two transactions.
#[tokio::test]
async fn deactivation_with_executor_is_two_transactions() {
    let h = harness(FakeWallet::new());
    let mut record = configured_vault_record(&h.catalog);
    record.set_executor_address(executor_address());
    h.store.upsert(record);

    let outcome = h.executor.deactivate(vault_address()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { transactions: 2 });

    let prompts = h.wallet.prompts();
    assert_eq!(prompts.len(), 2);
    let remove_executor = selector(&h.registry, VAULT_CONTRACT_KEY, "removeExecutor");
    let remove_strategy = selector(&h.registry, VAULT_CONTRACT_KEY, "removeStrategy");
    assert_eq!(&prompts[0].data[..4], &remove_executor);
    assert_eq!(&prompts[1].data[..4], &remove_strategy);

    let record = h.store.get(&vault_address()).unwrap();
    assert_eq!(record.executor, Address::ZERO);
    assert_eq!(record.strategy, Address::ZERO);
    assert!(!record.has_active_strategy);
}

/// Scenario: deactivation without an executor is a single transaction.
#[tokio::test]
async fn deactivation_without_executor_is_one_transaction() {
    let h = harness(FakeWallet::new());
    h.store.upsert(configured_vault_record(&h.catalog));

    let outcome = h.executor.deactivate(vault_address()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { transactions: 1 });
    assert_eq!(h.wallet.prompts().len(), 1);
}

/// Scenario: the user rejects the second deactivation prompt. The
/// executor removal stands; the run halts with a specific warning and
/// the cursor stays on the rejected step.
#[tokio::test]
async fn rejected_second_prompt_halts_with_warning() {
    let h = harness(FakeWallet::rejecting_prompt(1));
    let mut record = configured_vault_record(&h.catalog);
    record.set_executor_address(executor_address());
    h.store.upsert(record);

    let outcome = h.executor.deactivate(vault_address()).await.unwrap();
    assert_eq!(outcome, RunOutcome::UserCancelled { step: 1 });
    assert_eq!(h.executor.run_state(), RunState::UserCancelled);

    let progress = h.executor.progress();
    assert_eq!(progress.cursor, 1);
    assert!(!progress.loading);
    assert!(progress.warning.as_deref().unwrap().starts_with("Executor removed"));
    assert!(progress.error.is_none());

    // the first step landed: executor gone, strategy still set
    let record = h.store.get(&vault_address()).unwrap();
    assert_eq!(record.executor, Address::ZERO);
    assert_eq!(record.strategy, strategy_address());

    // only close leads back to idle; a new run may then start
    assert!(h.executor.close());
    assert_eq!(h.executor.run_state(), RunState::Idle);
}

/// A revert during a save renders a step-specific error message.
#[tokio::test]
async fn reverted_step_reports_step_specific_error() {
    struct RevertingWallet(FakeWallet);

    #[async_trait]
    impl WalletGateway for RevertingWallet {
        fn sender(&self) -> Address {
            self.0.sender()
        }
        async fn send_transaction(&self, request: &TxRequest) -> Result<B256, WalletError> {
            self.0.prompts.lock().unwrap().push(request.clone());
            Err(WalletError::reverted("NOT_OWNER"))
        }
    }

    let catalog = Arc::new(StrategyCatalog::builtin());
    let mut registry = ContractRegistry::with_builtin_abis(&catalog).unwrap();
    registry.set_address("BobStrategy", CHAIN_ID, strategy_address()).unwrap();
    let registry = Arc::new(registry);
    let chain = Arc::new(FakeChain::new());
    let store = Arc::new(VaultStore::new());
    store.upsert(fresh_vault_record());
    let bus = Arc::new(EventBus::new(64));

    let executor = PipelineExecutor::new(
        chain.clone(),
        Arc::new(RevertingWallet(FakeWallet::new())),
        registry.clone(),
        catalog.clone(),
        store,
        bus,
        Confirmer::default(),
        CHAIN_ID,
    );

    // authorizedVaults read reverts too: authorize step included
    let mut model = DesiredState::new(catalog.clone());
    model.set_strategy("bob");
    model.set_template(Some("conservative".into()));
    model.set_target_tokens(["USDC".to_string()].into());

    let outcome = executor.save(vault_address(), &mut model).await.unwrap();
    match outcome {
        RunOutcome::Failed { step, message } => {
            assert_eq!(step, 0);
            assert!(message.starts_with("Failed at Authorize vault:"), "{message}");
            assert!(message.contains("NOT_OWNER"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(executor.run_state(), RunState::Failed);
    // nothing advanced, edits are retained for a retry
    assert!(model.diff().any());
}

/// A second start while a halted run is open is ignored.
#[tokio::test]
async fn start_requires_idle() {
    let h = harness(FakeWallet::rejecting_prompt(0));
    h.store.upsert(configured_vault_record(&h.catalog));

    let outcome = h.executor.deactivate(vault_address()).await.unwrap();
    assert_eq!(outcome, RunOutcome::UserCancelled { step: 0 });

    // halted, not closed: a new run is refused
    let second = h.executor.deactivate(vault_address()).await.unwrap();
    assert_eq!(second, RunOutcome::Busy);

    // close, then retry: the rebuilt single-step plan goes through
    h.executor.close();
    let third = h.executor.deactivate(vault_address()).await.unwrap();
    assert_eq!(third, RunOutcome::Completed { transactions: 1 });
}

/// Stream frames flow through the parser and reconciler into the cache.
#[tokio::test]
async fn stream_frames_reconcile_into_the_cache() {
    let store = Arc::new(VaultStore::new());
    let bus = Arc::new(EventBus::new(64));
    store.upsert(fresh_vault_record());
    let reconciler = Reconciler::new(store.clone(), bus.clone());

    let mut rx = bus.subscribe();
    let mut parser = SseParser::default();
    let wire = format!(
        "event: VaultUnrecoverable\ndata: {{\"data\":{{\"vaultAddress\":\"{}\",\"reason\":\"timeout\"}},\"timestamp\":1700000000000}}\n\n",
        vault_address()
    );
    let frames = parser.push(wire.as_bytes());
    assert_eq!(frames.len(), 1);
    for frame in frames {
        reconciler.apply(&frame.event, &frame.data);
    }

    let record = store.get(&vault_address()).unwrap();
    assert!(record.is_blacklisted);
    assert!(!record.is_retrying);
    assert_eq!(record.blacklist_reason.as_deref(), Some("timeout"));

    // VaultUnrecoverable also triggers a refresh
    let mut saw_refresh = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, AppEvent::Refresh) {
            saw_refresh = true;
        }
    }
    assert!(saw_refresh);
}

/// The batch sub-call count shows up in the step description: a preset
/// switch with no edits carries the template sub-call only.
#[tokio::test]
async fn preset_switch_batch_contains_only_the_template_call() {
    let h = harness(FakeWallet::new());
    let record = configured_vault_record(&h.catalog);
    let mut model = DesiredState::new(h.catalog.clone());
    model.load_from_observed(&record);
    h.store.upsert(record);

    h.chain.respond(
        strategy_address(),
        selector(&h.registry, "BobStrategy", "authorizedVaults"),
        encoded_bool(true),
    );

    model.set_template(Some("aggressive".into()));

    let outcome = h.executor.save(vault_address(), &mut model).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { transactions: 1 });

    let steps = h.executor.progress().steps;
    assert_eq!(steps.len(), 1);
    match &steps[0].payload {
        vault_pilot::plan::StepPayload::Batch(batch) => {
            assert_eq!(batch.template, Some(2));
            assert!(batch.groups.is_empty());
        }
        other => panic!("expected batch payload, got {other:?}"),
    }
}

/// The validation gate warns about stray balances and mismatched
/// positions before a plan is built; it never blocks the save.
#[tokio::test]
async fn validation_gate_warns_on_mismatched_holdings() {
    use rust_decimal::Decimal;
    use vault_pilot::store::{PositionRef, TokenBalance};
    use vault_pilot::validate::WarningKind;

    let h = harness(FakeWallet::new());
    let mut record = configured_vault_record(&h.catalog);
    record.balances.insert(
        "WETH".into(),
        TokenBalance { raw: alloy_primitives::U256::from(5u64), decimals: 18, fiat_value: Decimal::ONE },
    );
    record.positions.push(PositionRef {
        id: "17".into(),
        token0: "USDC".into(),
        token1: "WBTC".into(),
    });
    let mut model = DesiredState::new(h.catalog.clone());
    model.load_from_observed(&record);
    h.store.upsert(record);

    let warnings = h.executor.validate(vault_address(), &model);
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[0].kind, WarningKind::TokenBalanceMismatch);
    assert_eq!(warnings[0].symbols, vec!["WETH".to_string()]);
    assert_eq!(warnings[1].kind, WarningKind::PositionTokenMismatch);
    assert_eq!(warnings[1].positions, vec!["17".to_string()]);
}

#[test]
fn codec_scenario_values() {
    use vault_pilot::codec::{decode, encode, EncodedParam, ParamKind};

    assert_eq!(
        encode("maxSlippage", &ParamValue::Percent(dec!(12.5))).unwrap(),
        EncodedParam::Int(1250)
    );
    assert_eq!(
        encode("minFeeValue", &ParamValue::FiatCurrency(dec!(3.07))).unwrap(),
        EncodedParam::Int(307)
    );
    assert_eq!(encode("riskLevel", &ParamValue::Select(2)).unwrap(), EncodedParam::Int(2));
    assert_eq!(
        encode("autoCompound", &ParamValue::Boolean(true)).unwrap(),
        EncodedParam::Bool(true)
    );
    assert_eq!(
        decode("maxSlippage", ParamKind::Percent, EncodedParam::Int(1250)).unwrap(),
        ParamValue::Percent(dec!(12.5))
    );
}

#[test]
fn tx_request_serializes_for_the_wallet() {
    let request = TxRequest::new(owner_address(), vault_address(), Bytes::from(vec![1, 2, 3]));
    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["data"], "0x010203");
    assert!(value.get("value").is_none(), "zero value is elided");
    assert_eq!(TxFailure::UserRejected.display_reason(), "Transaction cancelled");
}
