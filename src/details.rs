//! Transaction status resolution.
//!
//! Combines receipt lookup, mempool inspection and the confirmed count to
//! answer "where is this transaction" for a hash or an (address, nonce)
//! pair. A node without the txpool namespace degrades both lookups to
//! [`TransactionStatus::Unsupported`].

use alloy_primitives::{Address, B256};
use std::sync::Arc;

use crate::error::DispatchError;
use crate::inspector::AccountInspector;
use crate::node::NodeClient;
use crate::types::{MempoolTransaction, PlacementReceipt, TransactionStatus};

/// Resolved view of a transaction located by hash.
#[derive(Debug, Clone)]
pub struct HashDetails {
    pub status: TransactionStatus,
    /// Present when the transaction is mined.
    pub receipt: Option<PlacementReceipt>,
    /// Present when the transaction is still in the mempool.
    pub transaction: Option<MempoolTransaction>,
}

impl HashDetails {
    fn status_only(status: TransactionStatus) -> Self {
        Self {
            status,
            receipt: None,
            transaction: None,
        }
    }
}

/// Status lookups for submitted transactions.
#[derive(Clone)]
pub struct TransactionDetails {
    node: Arc<dyn NodeClient>,
    inspector: AccountInspector,
}

impl TransactionDetails {
    pub fn new(node: Arc<dyn NodeClient>, inspector: AccountInspector) -> Self {
        Self { node, inspector }
    }

    /// Resolves the status of `hash`, expected to originate from `from`.
    ///
    /// A mined transaction resolves from its receipt alone; otherwise the
    /// content form of the mempool is searched under the checksummed
    /// sender, pending before queued.
    pub async fn by_hash(&self, from: Address, hash: B256) -> Result<HashDetails, DispatchError> {
        if let Some(receipt) = self
            .node
            .get_receipt(hash)
            .await
            .map_err(DispatchError::from_node)?
        {
            return Ok(HashDetails {
                status: TransactionStatus::Mined,
                receipt: Some(receipt),
                transaction: None,
            });
        }

        let Some(content) = self.inspector.mempool_content(from).await? else {
            return Ok(HashDetails::status_only(TransactionStatus::Unsupported));
        };

        if let Some(tx) = content.pending.values().find(|tx| tx.hash == hash) {
            return Ok(HashDetails {
                status: TransactionStatus::Pending,
                receipt: None,
                transaction: Some(tx.clone()),
            });
        }
        if let Some(tx) = content.queued.values().find(|tx| tx.hash == hash) {
            return Ok(HashDetails {
                status: TransactionStatus::Queued,
                receipt: None,
                transaction: Some(tx.clone()),
            });
        }
        Ok(HashDetails::status_only(TransactionStatus::Unknown))
    }

    /// Resolves the status of the transaction `from` sent under `nonce`.
    ///
    /// A nonce in neither sub-pool is mined when strictly below the
    /// confirmed count, otherwise unknown. Queued entries count as known
    /// but never resolve to mined.
    pub async fn by_nonce(
        &self,
        from: Address,
        nonce: u64,
    ) -> Result<TransactionStatus, DispatchError> {
        let Some(view) = self.inspector.inspect_mempool(from).await? else {
            return Ok(TransactionStatus::Unsupported);
        };
        if view.pending.contains_key(&nonce) {
            return Ok(TransactionStatus::Pending);
        }
        if view.queued.contains_key(&nonce) {
            return Ok(TransactionStatus::Queued);
        }
        let confirmed = self.inspector.confirmed_count(from).await?;
        if nonce < confirmed {
            Ok(TransactionStatus::Mined)
        } else {
            Ok(TransactionStatus::Unknown)
        }
    }
}
