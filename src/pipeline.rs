//! The composed dispatch pipeline.
//!
//! A [`Pipeline`] owns one nonce manager per address space and wires it
//! through the builder, sender and details components. Construct one per
//! process (or per node connection) and share it; every component it hands
//! out is cheap to clone and safe to use concurrently.

use std::sync::Arc;
use tracing::instrument;

use crate::catalog::ContractCatalog;
use crate::config::DispatchConfig;
use crate::builder::TransactionBuilder;
use crate::details::TransactionDetails;
use crate::error::DispatchError;
use crate::inspector::AccountInspector;
use crate::node::NodeClient;
use crate::nonce::NonceManager;
use crate::receipt::ReceiptWaiter;
use crate::sender::Sender;
use crate::store::{InMemoryStore, KeyValueStore};

/// The transaction pipeline: nonce manager, builder, sender and details,
/// composed over one node client and contract catalog.
pub struct Pipeline {
    config: DispatchConfig,
    node: Arc<dyn NodeClient>,
    catalog: Arc<dyn ContractCatalog>,
    nonces: NonceManager,
    sender: Sender,
    details: TransactionDetails,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Builds a pipeline over the default in-memory nonce store.
    ///
    /// When `preload_contracts` is configured, every catalog entry is
    /// resolved and checked for deployed code before the pipeline is
    /// returned, so misconfiguration surfaces at startup rather than on
    /// the first send.
    pub async fn new(
        config: DispatchConfig,
        node: Arc<dyn NodeClient>,
        catalog: Arc<dyn ContractCatalog>,
    ) -> Result<Self, DispatchError> {
        let store = Arc::new(InMemoryStore::new(config.lock_options()));
        Self::with_store(config, node, catalog, store).await
    }

    /// Builds a pipeline over a caller-provided nonce store.
    ///
    /// A persistent store must honor the same locking semantics as the
    /// in-memory one.
    pub async fn with_store(
        config: DispatchConfig,
        node: Arc<dyn NodeClient>,
        catalog: Arc<dyn ContractCatalog>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, DispatchError> {
        let inspector = AccountInspector::new(Arc::clone(&node));
        let nonces = NonceManager::new(store, inspector.clone());
        let builder = TransactionBuilder::new(
            Arc::clone(&catalog),
            nonces.clone(),
            config.tx_defaults(),
        );
        let waiter = ReceiptWaiter::new(Arc::clone(&node));
        let sender = Sender::new(
            Arc::clone(&node),
            builder,
            nonces.clone(),
            waiter,
            config.sender_timeouts(),
        );
        let details = TransactionDetails::new(Arc::clone(&node), inspector);

        let pipeline = Self {
            config,
            node,
            catalog,
            nonces,
            sender,
            details,
        };
        if pipeline.config.preload_contracts {
            pipeline.preload_contracts().await?;
        }
        Ok(pipeline)
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn nonces(&self) -> &NonceManager {
        &self.nonces
    }

    pub fn details(&self) -> &TransactionDetails {
        &self.details
    }

    /// Resolves every catalog entry and verifies code is deployed at its
    /// address.
    #[instrument(skip_all, err)]
    pub async fn preload_contracts(&self) -> Result<(), DispatchError> {
        for name in self.catalog.names() {
            let contract = self.catalog.contract(&name).await?;
            let code = self
                .node
                .get_code(contract.address())
                .await
                .map_err(DispatchError::from_node)?;
            if code.is_empty() {
                return Err(DispatchError::NotDeployed {
                    address: contract.address().into(),
                });
            }
            tracing::debug!(contract = %name, address = %contract.address(), "contract binding verified");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::catalog::testing::catalog_with_registry;
    use crate::builder::ChainCall;
    use crate::node::testing::StubNode;
    use crate::sender::ChainRequest;
    use crate::signer::{LocalSigner, TransactionSigner};
    use alloy_primitives::{Address, Bytes, address};
    use serde_json::json;

    const TARGET: Address = address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045");

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            chain_id: 59,
            tx_mining_timeout_secs: 1,
            tx_signing_timeout_ms: 100,
            lock_acquire_timeout_ms: 500,
            lock_check_interval_ms: 2,
            preload_contracts: false,
            ..DispatchConfig::default()
        }
    }

    #[tokio::test]
    async fn preload_verifies_deployed_code() {
        let node = Arc::new(StubNode::new());
        node.set_code(TARGET, Bytes::from(vec![0x60, 0x80]));
        let config = DispatchConfig {
            preload_contracts: true,
            ..fast_config()
        };
        Pipeline::new(config, node, catalog_with_registry(TARGET))
            .await
            .expect("preload passes with code present");
    }

    #[tokio::test]
    async fn preload_surfaces_missing_code() {
        let node = Arc::new(StubNode::new());
        let config = DispatchConfig {
            preload_contracts: true,
            ..fast_config()
        };
        let err = Pipeline::new(config, node, catalog_with_registry(TARGET))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotDeployed { .. }));
    }

    #[tokio::test]
    async fn preload_surfaces_unbound_artifacts() {
        let node = Arc::new(StubNode::new());
        let catalog = Arc::new(StaticCatalog::new());
        catalog.declare_unbound("registry");
        let config = DispatchConfig {
            preload_contracts: true,
            ..fast_config()
        };
        let err = Pipeline::new(config, node, catalog).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoNetworkInContract { .. }));
    }

    #[tokio::test]
    async fn chained_operation_yields_ordered_receipts() {
        // A three-step flow (approve-reset, approve, place): all three mine
        // in order and the placement receipt is the one returned.
        let node = Arc::new(StubNode::new());
        let pipeline = Pipeline::new(
            fast_config(),
            Arc::clone(&node) as Arc<dyn NodeClient>,
            catalog_with_registry(TARGET),
        )
        .await
        .unwrap();

        let signer = Arc::new(LocalSigner::random());
        let from = signer.address();
        let mut request = ChainRequest::new(
            from,
            vec![
                ChainCall::new("registry", "approve", vec![json!(0)]),
                ChainCall::new("registry", "approve", vec![json!(500)]),
                ChainCall::new("registry", "place", vec![json!("listing")]),
            ],
        );
        request.signer = Some(signer as Arc<dyn TransactionSigner>);

        let receipt = pipeline.sender().send_chain(&request).await.unwrap();
        assert!(receipt.succeeded());

        let raw = node.sent_raw();
        assert_eq!(raw.len(), 3);
        // The returned receipt belongs to the last submission.
        assert_eq!(
            receipt.transaction_hash,
            alloy_primitives::keccak256(&raw[2])
        );
        // Nonces 0..2 consumed.
        assert_eq!(pipeline.nonces().acquire(from).await.unwrap(), 3);
    }
}
