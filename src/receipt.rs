//! Receipt polling.

use alloy_primitives::B256;
use futures_util::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

use crate::error::DispatchError;
use crate::node::NodeClient;
use crate::types::PlacementReceipt;

/// Fixed interval between receipt polls.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polls the node for transaction receipts with a timeout, asserting
/// success status.
#[derive(Clone)]
pub struct ReceiptWaiter {
    node: Arc<dyn NodeClient>,
    poll_interval: Duration,
}

impl ReceiptWaiter {
    pub fn new(node: Arc<dyn NodeClient>) -> Self {
        Self {
            node,
            poll_interval: RECEIPT_POLL_INTERVAL,
        }
    }

    /// Replaces the poll interval. Mainly useful against fast local chains.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Waits for `hash` to mine, up to `timeout`.
    ///
    /// A receipt with a failure status surfaces as
    /// [`DispatchError::Generic`]; an exhausted budget as
    /// [`DispatchError::Timeout`].
    #[instrument(skip_all, err, fields(hash = %hash))]
    pub async fn wait(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<PlacementReceipt, DispatchError> {
        let deadline = Instant::now() + timeout;
        loop {
            let receipt = self
                .node
                .get_receipt(hash)
                .await
                .map_err(DispatchError::from_node)?;
            if let Some(receipt) = receipt {
                if receipt.succeeded() {
                    tracing::debug!(block = ?receipt.block_number, "transaction mined");
                    return Ok(receipt);
                }
                return Err(DispatchError::Generic(format!("transaction {hash} failed")));
            }
            if Instant::now() >= deadline {
                return Err(DispatchError::Timeout {
                    operation: "receipt polling",
                    waited: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Waits for every hash in parallel; fails fast on the first error.
    pub async fn wait_all(
        &self,
        hashes: &[B256],
        timeout: Duration,
    ) -> Result<Vec<PlacementReceipt>, DispatchError> {
        try_join_all(hashes.iter().map(|hash| self.wait(*hash, timeout))).await
    }
}
