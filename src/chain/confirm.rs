//! Confirmation waiting
//!
//! Polls for the receipt of a submitted transaction until it is mined or
//! the timeout elapses. A mined-but-reverted receipt is a failure.

use alloy_primitives::B256;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::rpc::{ChainReader, TxReceipt};
use super::wallet::TxFailure;

pub struct Confirmer {
    poll_interval: Duration,
    timeout: Duration,
}

impl Confirmer {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self { poll_interval, timeout }
    }

    /// Wait for `hash` to be included in a block.
    pub async fn wait(&self, rpc: &dyn ChainReader, hash: B256) -> Result<TxReceipt, TxFailure> {
        let started = tokio::time::Instant::now();

        loop {
            if started.elapsed() > self.timeout {
                return Err(TxFailure::Network {
                    message: format!("confirmation timeout for {hash}"),
                });
            }

            match rpc.receipt(hash).await {
                Ok(Some(receipt)) => {
                    if !receipt.success {
                        warn!(%hash, "transaction reverted on chain");
                        return Err(TxFailure::Reverted {
                            reason: "execution reverted".to_string(),
                        });
                    }
                    debug!(%hash, block = ?receipt.block_number, "transaction confirmed");
                    return Ok(receipt);
                }
                Ok(None) => sleep(self.poll_interval).await,
                Err(e) => {
                    // transient read errors are retried until the timeout
                    warn!(%hash, error = %e, "receipt poll failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }
}

impl Default for Confirmer {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(120))
    }
}
