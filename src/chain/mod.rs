//! Chain access layer
//!
//! JSON-RPC reads, wallet-mediated writes, confirmation polling, and the
//! observed-state reader the pipeline refreshes its cache from.

pub mod confirm;
pub mod contracts;
pub mod observe;
pub mod rpc;
pub mod wallet;

pub use confirm::Confirmer;
pub use contracts::{ContractHandle, StrategyHandle, VaultHandle};
pub use observe::{ObservedReader, ObservedSnapshot};
pub use rpc::{ChainReader, RpcClient, TxReceipt};
pub use wallet::{JsonRpcWallet, TxFailure, TxRequest, WalletError, WalletGateway};
