//! Node-side account lookups: confirmed transaction count and the
//! per-address mempool view.

use alloy_primitives::Address;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{self, DispatchError};
use crate::node::{NodeClient, NodeError};
use crate::types::{AccountMempool, AccountMempoolContent, ChecksummedAddress, MempoolTransaction};

/// Read-only account state queries against the node.
///
/// The mempool queries normalize the address to its checksummed form before
/// indexing into the node's reply; a node without the txpool namespace
/// yields `None`, which callers treat as a degraded mode rather than an
/// error.
#[derive(Clone)]
pub struct AccountInspector {
    node: Arc<dyn NodeClient>,
}

impl AccountInspector {
    pub fn new(node: Arc<dyn NodeClient>) -> Self {
        Self { node }
    }

    /// Number of confirmed transactions from `address`, latest-block basis.
    pub async fn confirmed_count(&self, address: Address) -> Result<u64, DispatchError> {
        self.node
            .confirmed_count(address)
            .await
            .map_err(DispatchError::from_node)
    }

    /// Per-address slice of the inspect-form mempool, or `None` when the
    /// node does not serve `txpool_inspect`.
    pub async fn inspect_mempool(
        &self,
        address: Address,
    ) -> Result<Option<AccountMempool>, DispatchError> {
        let snapshot = match self.node.txpool_inspect().await {
            Ok(snapshot) => snapshot,
            Err(err) => return unsupported_as_none(err),
        };
        let key = ChecksummedAddress::from(address).to_string();
        let view = AccountMempool {
            pending: parse_nonce_keys(snapshot.pending.get(&key)),
            queued: parse_nonce_keys(snapshot.queued.get(&key)),
        };
        Ok(Some(view))
    }

    /// Per-address slice of the content-form mempool, or `None` when the
    /// node does not serve `txpool_content`.
    pub async fn mempool_content(
        &self,
        address: Address,
    ) -> Result<Option<AccountMempoolContent>, DispatchError> {
        let snapshot = match self.node.txpool_content().await {
            Ok(snapshot) => snapshot,
            Err(err) => return unsupported_as_none(err),
        };
        let key = ChecksummedAddress::from(address).to_string();
        let view = AccountMempoolContent {
            pending: parse_content_keys(snapshot.pending.get(&key)),
            queued: parse_content_keys(snapshot.queued.get(&key)),
        };
        Ok(Some(view))
    }
}

fn unsupported_as_none<T>(err: NodeError) -> Result<Option<T>, DispatchError> {
    if error::is_method_unsupported(err.message()) {
        tracing::debug!(error = %err, "txpool namespace unsupported, degrading to empty view");
        Ok(None)
    } else {
        Err(DispatchError::from_node(err))
    }
}

fn parse_nonce_keys(entries: Option<&BTreeMap<String, String>>) -> BTreeMap<u64, String> {
    let Some(entries) = entries else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(nonce, summary)| match nonce.parse::<u64>() {
            Ok(nonce) => Some((nonce, summary.clone())),
            Err(_) => {
                tracing::warn!(key = %nonce, "skipping unparseable mempool nonce key");
                None
            }
        })
        .collect()
}

fn parse_content_keys(
    entries: Option<&BTreeMap<String, MempoolTransaction>>,
) -> BTreeMap<u64, MempoolTransaction> {
    let Some(entries) = entries else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(nonce, tx)| match nonce.parse::<u64>() {
            Ok(nonce) => Some((nonce, tx.clone())),
            Err(_) => {
                tracing::warn!(key = %nonce, "skipping unparseable mempool nonce key");
                None
            }
        })
        .collect()
}
