//! Node access capability.
//!
//! Everything in the core talks to the chain through [`NodeClient`]; the
//! core itself never touches the wire. [`HttpNodeClient`] is the shipped
//! implementation over JSON-RPC HTTP, built on alloy's provider stack.
//!
//! [`NodeError`] deliberately carries the node's textual message: the error
//! classifier recognizes node-specific failures by substring match, so the
//! message must survive transport boundaries verbatim.

use alloy_network::Ethereum;
use alloy_primitives::{Address, B256, Bytes};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_transport::TransportError;
use alloy_transport_http::Http;
use async_trait::async_trait;
use url::Url;

use crate::types::{PlacementReceipt, RawTransaction, TxpoolContent, TxpoolInspect};

/// A raw node failure, carrying the node's message verbatim.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct NodeError {
    message: String,
}

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<TransportError> for NodeError {
    fn from(err: TransportError) -> Self {
        Self::new(err.to_string())
    }
}

/// Operations the pipeline needs from a node.
///
/// Implementations are externally shared and must be thread-safe; the core
/// makes no mutual-exclusion assumption about them.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Submits a signed transaction blob, returning its hash.
    async fn send_raw(&self, raw: &Bytes) -> Result<B256, NodeError>;

    /// Asks the node to sign and submit a transaction from an unlocked
    /// account, returning its hash.
    async fn send_tx(&self, tx: &RawTransaction) -> Result<B256, NodeError>;

    /// Receipt of a mined transaction, or `None` while unmined.
    async fn get_receipt(&self, hash: B256) -> Result<Option<PlacementReceipt>, NodeError>;

    /// Number of confirmed transactions from `address`, latest-block basis.
    ///
    /// Deliberately not the pending count: the pending figure folds in
    /// mempool state the nonce manager tracks for itself.
    async fn confirmed_count(&self, address: Address) -> Result<u64, NodeError>;

    /// Node-wide `txpool_inspect` snapshot, keyed by checksummed address.
    async fn txpool_inspect(&self) -> Result<TxpoolInspect, NodeError>;

    /// Node-wide `txpool_content` snapshot, keyed by checksummed address.
    async fn txpool_content(&self) -> Result<TxpoolContent, NodeError>;

    /// Deployed code at `address`, latest-block basis.
    async fn get_code(&self, address: Address) -> Result<Bytes, NodeError>;
}

/// [`NodeClient`] over JSON-RPC HTTP.
pub struct HttpNodeClient {
    provider: RootProvider<Ethereum>,
}

impl HttpNodeClient {
    pub fn new(url: Url) -> Self {
        let transport = Http::new(url);
        let client = RpcClient::new(transport, false);
        Self {
            provider: RootProvider::new(client),
        }
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn send_raw(&self, raw: &Bytes) -> Result<B256, NodeError> {
        let pending = self.provider.send_raw_transaction(raw.as_ref()).await?;
        Ok(*pending.tx_hash())
    }

    async fn send_tx(&self, tx: &RawTransaction) -> Result<B256, NodeError> {
        let hash: B256 = self
            .provider
            .client()
            .request("eth_sendTransaction", (tx.clone(),))
            .await?;
        Ok(hash)
    }

    async fn get_receipt(&self, hash: B256) -> Result<Option<PlacementReceipt>, NodeError> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(PlacementReceipt::from))
    }

    async fn confirmed_count(&self, address: Address) -> Result<u64, NodeError> {
        let count = self
            .provider
            .get_transaction_count(address)
            .latest()
            .await?;
        Ok(count)
    }

    async fn txpool_inspect(&self) -> Result<TxpoolInspect, NodeError> {
        let snapshot: TxpoolInspect = self
            .provider
            .client()
            .request("txpool_inspect", ())
            .await?;
        Ok(snapshot)
    }

    async fn txpool_content(&self) -> Result<TxpoolContent, NodeError> {
        let snapshot: TxpoolContent = self
            .provider
            .client()
            .request("txpool_content", ())
            .await?;
        Ok(snapshot)
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, NodeError> {
        let code = self.provider.get_code_at(address).await?;
        Ok(code)
    }
}
