//! Vault Pilot Library
//!
//! Off-chain strategy configuration pipeline for DeFi liquidity vaults:
//! plans the minimal transaction sequence from a configuration diff,
//! drives it through the user's wallet step by step, and keeps the local
//! vault cache consistent with the automation service's event stream.

pub mod chain;
pub mod codec;
pub mod config;
pub mod executor;
pub mod model;
pub mod network;
pub mod plan;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod utils;
pub mod validate;

// Re-export main types
pub use chain::{ChainReader, Confirmer, JsonRpcWallet, ObservedReader, RpcClient, TxFailure, WalletGateway};
pub use config::AppConfig;
pub use executor::{PipelineExecutor, RunOutcome, RunState, StepProgress, StepStatus};
pub use model::{ChangeFlags, ConfigState, DesiredState};
pub use network::{AppEvent, EventBus, SseManager};
pub use plan::{Step, StepKind};
pub use reconcile::Reconciler;
pub use registry::{ContractRegistry, StrategyCatalog};
pub use store::{Vault, VaultStore};
pub use validate::{ValidationWarning, WarningKind};
