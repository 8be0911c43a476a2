//! Transaction submission.
//!
//! The sender drives a built transaction through signing, submission and
//! receipt polling. Signing is either external (the caller's
//! [`TransactionSigner`], bounded by the signing timeout, with the
//! recovered sender asserted against the declared one) or delegated to the
//! node. Nonce bookkeeping follows the release policy: a failed
//! transaction's nonce goes back to the pool unless the failure was a
//! nonce rejection, in which case reissuing it would only repeat the
//! failure.
//!
//! Chains are strictly ordered: every transaction is awaited to a mined
//! receipt before the next is submitted, and a failure carries the unsent
//! remainder (failing transaction first) out to the caller.

use alloy_primitives::{Address, Bytes, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::builder::{CallRequest, ChainCall, TransactionBuilder, TransferRequest, TxOverrides};
use crate::error::DispatchError;
use crate::node::NodeClient;
use crate::nonce::NonceManager;
use crate::receipt::ReceiptWaiter;
use crate::signer::{TransactionSigner, recover_sender};
use crate::types::{PlacementReceipt, RawTransaction};

/// Signing and mining budgets, from configuration.
#[derive(Debug, Clone, Copy)]
pub struct SenderTimeouts {
    /// Budget for one signer callback invocation.
    pub signing: Duration,
    /// Per-transaction receipt-poll budget.
    pub mining: Duration,
}

impl Default for SenderTimeouts {
    fn default() -> Self {
        Self {
            signing: Duration::from_millis(60_000),
            mining: Duration::from_secs(120),
        }
    }
}

/// A single contract call to submit.
pub struct SendRequest {
    pub from: Address,
    /// External signer; when absent, the node signs and assigns the nonce.
    pub signer: Option<Arc<dyn TransactionSigner>>,
    pub contract: String,
    pub method: String,
    pub args: Vec<serde_json::Value>,
    pub value: U256,
    pub overrides: TxOverrides,
}

impl SendRequest {
    pub fn new(
        from: Address,
        contract: impl Into<String>,
        method: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            from,
            signer: None,
            contract: contract.into(),
            method: method.into(),
            args,
            value: U256::ZERO,
            overrides: TxOverrides::default(),
        }
    }
}

/// An ordered chain of contract calls to submit from one sender.
pub struct ChainRequest {
    pub from: Address,
    pub signer: Option<Arc<dyn TransactionSigner>>,
    pub calls: Vec<ChainCall>,
    pub overrides: TxOverrides,
}

impl ChainRequest {
    pub fn new(from: Address, calls: Vec<ChainCall>) -> Self {
        Self {
            from,
            signer: None,
            calls,
            overrides: TxOverrides::default(),
        }
    }
}

/// A native-coin transfer to submit.
pub struct TransferSendRequest {
    pub from: Address,
    pub signer: Option<Arc<dyn TransactionSigner>>,
    pub to: Address,
    pub value: U256,
    pub overrides: TxOverrides,
}

impl TransferSendRequest {
    pub fn new(from: Address, to: Address, value: U256) -> Self {
        Self {
            from,
            signer: None,
            to,
            value,
            overrides: TxOverrides::default(),
        }
    }
}

/// Submits single and chained transactions.
#[derive(Clone)]
pub struct Sender {
    node: Arc<dyn NodeClient>,
    builder: TransactionBuilder,
    nonces: NonceManager,
    waiter: ReceiptWaiter,
    timeouts: SenderTimeouts,
}

impl Sender {
    pub fn new(
        node: Arc<dyn NodeClient>,
        builder: TransactionBuilder,
        nonces: NonceManager,
        waiter: ReceiptWaiter,
        timeouts: SenderTimeouts,
    ) -> Self {
        Self {
            node,
            builder,
            nonces,
            waiter,
            timeouts,
        }
    }

    /// Submits one contract call and waits for its mined receipt.
    ///
    /// With an external signer the nonce is manager-assigned; without one
    /// the node both signs and assigns. An explicit nonce override bypasses
    /// the manager entirely.
    #[instrument(skip_all, err, fields(from = %request.from, contract = %request.contract, method = %request.method))]
    pub async fn send(&self, request: &SendRequest) -> Result<PlacementReceipt, DispatchError> {
        let assigned = request.signer.is_some();
        let call = CallRequest {
            from: request.from,
            contract: request.contract.clone(),
            method: request.method.clone(),
            args: request.args.clone(),
            value: request.value,
        };
        let tx = self
            .builder
            .build_call(&call, assigned, &request.overrides)
            .await?;
        self.dispatch(request.from, request.signer.as_deref(), tx, &request.overrides)
            .await
    }

    /// Submits a native-coin transfer and waits for its mined receipt.
    #[instrument(skip_all, err, fields(from = %request.from, to = %request.to))]
    pub async fn send_transfer(
        &self,
        request: &TransferSendRequest,
    ) -> Result<PlacementReceipt, DispatchError> {
        let assigned = request.signer.is_some();
        let transfer = TransferRequest {
            from: request.from,
            to: request.to,
            value: request.value,
        };
        let tx = self
            .builder
            .build_transfer(&transfer, assigned, &request.overrides)
            .await?;
        self.dispatch(request.from, request.signer.as_deref(), tx, &request.overrides)
            .await
    }

    /// Submits an ordered chain, awaiting each mined receipt before the
    /// next submission, and returns the receipt of the last transaction.
    ///
    /// External signing is one batch callback for the whole chain. On
    /// failure the unsent remainder (failing transaction first) surfaces
    /// inside [`DispatchError::FailedTxChain`]; the failing transaction's
    /// nonce stays reserved after a nonce rejection, every other unsent
    /// nonce is released.
    #[instrument(skip_all, err, fields(from = %request.from, steps = request.calls.len()))]
    pub async fn send_chain(
        &self,
        request: &ChainRequest,
    ) -> Result<PlacementReceipt, DispatchError> {
        if request.calls.is_empty() {
            return Err(DispatchError::Generic("transaction chain is empty".into()));
        }
        let assigned = request.signer.is_some();
        let txs = self
            .builder
            .build_chain(request.from, &request.calls, assigned, &request.overrides)
            .await?;

        let signed = match &request.signer {
            Some(signer) => {
                match self.sign_batch(request.from, signer.as_ref(), &txs).await {
                    Ok(blobs) => Some(blobs),
                    Err(err) => {
                        let err = DispatchError::classify(err);
                        return Err(self.fail_chain(request.from, &txs, 0, err, assigned).await);
                    }
                }
            }
            None => None,
        };

        let budget = request
            .overrides
            .wait_for_mine_timeout
            .unwrap_or(self.timeouts.mining);
        let mut last = None;
        for (index, tx) in txs.iter().enumerate() {
            match self.submit_step(tx, index, signed.as_deref(), budget).await {
                Ok(receipt) => last = Some(receipt),
                Err(err) => {
                    let err = DispatchError::classify(err);
                    return Err(self.fail_chain(request.from, &txs, index, err, assigned).await);
                }
            }
        }
        Ok(last.expect("chain verified non-empty"))
    }

    async fn dispatch(
        &self,
        from: Address,
        signer: Option<&dyn TransactionSigner>,
        tx: RawTransaction,
        overrides: &TxOverrides,
    ) -> Result<PlacementReceipt, DispatchError> {
        // Reserved by the manager iff assigned mode without an explicit
        // override; only reservations are ever released.
        let reserved = match overrides.nonce {
            Some(_) => None,
            None if signer.is_some() => tx.nonce,
            None => None,
        };
        match self.submit_and_wait(from, signer, &tx, overrides).await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                let err = DispatchError::classify(err);
                if let Some(nonce) = reserved {
                    if err.is_invalid_nonce() {
                        tracing::debug!(%from, nonce, "holding nonce after nonce rejection");
                    } else if let Err(release_err) = self.nonces.release(from, nonce).await {
                        tracing::warn!(%from, nonce, error = %release_err, "failed to release nonce");
                    }
                }
                Err(err)
            }
        }
    }

    async fn submit_and_wait(
        &self,
        from: Address,
        signer: Option<&dyn TransactionSigner>,
        tx: &RawTransaction,
        overrides: &TxOverrides,
    ) -> Result<PlacementReceipt, DispatchError> {
        let hash = match signer {
            Some(signer) => {
                let blobs = self
                    .sign_batch(from, signer, std::slice::from_ref(tx))
                    .await?;
                let blob = blobs.into_iter().next().expect("cardinality checked");
                self.node
                    .send_raw(&blob)
                    .await
                    .map_err(DispatchError::from_node)?
            }
            None => self
                .node
                .send_tx(tx)
                .await
                .map_err(DispatchError::from_node)?,
        };
        let budget = overrides
            .wait_for_mine_timeout
            .unwrap_or(self.timeouts.mining);
        self.waiter.wait(hash, budget).await
    }

    async fn submit_step(
        &self,
        tx: &RawTransaction,
        index: usize,
        signed: Option<&[Bytes]>,
        budget: Duration,
    ) -> Result<PlacementReceipt, DispatchError> {
        let hash = match signed {
            Some(blobs) => self
                .node
                .send_raw(&blobs[index])
                .await
                .map_err(DispatchError::from_node)?,
            None => self
                .node
                .send_tx(tx)
                .await
                .map_err(DispatchError::from_node)?,
        };
        self.waiter.wait(hash, budget).await
    }

    /// Invokes the signer under the signing budget and checks cardinality
    /// and recovered sender of every blob.
    async fn sign_batch(
        &self,
        from: Address,
        signer: &dyn TransactionSigner,
        txs: &[RawTransaction],
    ) -> Result<Vec<Bytes>, DispatchError> {
        let budget = self.timeouts.signing;
        let blobs = tokio::time::timeout(budget, signer.sign(from, txs))
            .await
            .map_err(|_| DispatchError::Timeout {
                operation: "transaction signing",
                waited: budget,
            })??;
        if blobs.len() != txs.len() {
            return Err(DispatchError::Generic(format!(
                "signer returned {} blob(s) for {} transaction(s)",
                blobs.len(),
                txs.len()
            )));
        }
        for blob in &blobs {
            let recovered = recover_sender(blob)?;
            if recovered != from {
                return Err(DispatchError::SignerMismatch {
                    expected: from.into(),
                    recovered: recovered.into(),
                });
            }
        }
        Ok(blobs)
    }

    /// Releases unsent nonces per the chain policy and wraps the cause.
    async fn fail_chain(
        &self,
        from: Address,
        txs: &[RawTransaction],
        failed_index: usize,
        cause: DispatchError,
        assigned: bool,
    ) -> DispatchError {
        let unsent = txs[failed_index..].to_vec();
        if assigned {
            // A rejected nonce stays reserved; everything else goes back.
            let skip = usize::from(cause.is_invalid_nonce());
            let nonces: Vec<u64> = unsent.iter().skip(skip).filter_map(|tx| tx.nonce).collect();
            if let Err(err) = self.nonces.release_many(from, &nonces).await {
                tracing::warn!(%from, ?nonces, error = %err, "failed to release unsent chain nonces");
            }
        }
        tracing::warn!(
            %from,
            unsent = unsent.len(),
            cause = %cause,
            "transaction chain stopped"
        );
        DispatchError::FailedTxChain {
            unsent,
            cause: Box::new(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::catalog_with_registry;
    use crate::inspector::AccountInspector;
    use crate::node::testing::StubNode;
    use crate::signer::LocalSigner;
    use crate::store::{InMemoryStore, LockOptions};
    use crate::builder::TxDefaults;
    use alloy_primitives::address;
    use async_trait::async_trait;
    use serde_json::json;

    const TARGET: Address = address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045");

    struct Harness {
        node: Arc<StubNode>,
        sender: Sender,
        nonces: NonceManager,
        signer: Arc<LocalSigner>,
        from: Address,
    }

    fn harness() -> Harness {
        let node = Arc::new(StubNode::new());
        let store = Arc::new(InMemoryStore::new(LockOptions {
            acquire_timeout: Duration::from_millis(500),
            check_interval: Duration::from_millis(2),
            hold_timeout: Duration::from_millis(500),
        }));
        let inspector = AccountInspector::new(Arc::clone(&node) as Arc<dyn NodeClient>);
        let nonces = NonceManager::new(store, inspector);
        let builder = TransactionBuilder::new(
            catalog_with_registry(TARGET),
            nonces.clone(),
            TxDefaults {
                gas_price: U256::from(1_000_000_000u64),
                gas_limit: 300_000,
                chain_id: 59,
            },
        );
        let waiter = ReceiptWaiter::new(Arc::clone(&node) as Arc<dyn NodeClient>)
            .with_poll_interval(Duration::from_millis(2));
        let sender = Sender::new(
            Arc::clone(&node) as Arc<dyn NodeClient>,
            builder,
            nonces.clone(),
            waiter,
            SenderTimeouts {
                signing: Duration::from_millis(50),
                mining: Duration::from_millis(100),
            },
        );
        let signer = Arc::new(LocalSigner::random());
        let from = signer.address();
        Harness {
            node,
            sender,
            nonces,
            signer,
            from,
        }
    }

    /// Signs with a key unrelated to the declared sender.
    struct MismatchSigner {
        inner: LocalSigner,
    }

    #[async_trait]
    impl TransactionSigner for MismatchSigner {
        async fn sign(
            &self,
            _from: Address,
            transactions: &[RawTransaction],
        ) -> Result<Vec<Bytes>, DispatchError> {
            self.inner.sign(self.inner.address(), transactions).await
        }
    }

    /// Never returns within any reasonable signing budget.
    struct SlowSigner;

    #[async_trait]
    impl TransactionSigner for SlowSigner {
        async fn sign(
            &self,
            _from: Address,
            _transactions: &[RawTransaction],
        ) -> Result<Vec<Bytes>, DispatchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    /// Returns the wrong number of blobs.
    struct ShortSigner;

    #[async_trait]
    impl TransactionSigner for ShortSigner {
        async fn sign(
            &self,
            _from: Address,
            _transactions: &[RawTransaction],
        ) -> Result<Vec<Bytes>, DispatchError> {
            Ok(vec![])
        }
    }

    fn call(h: &Harness) -> SendRequest {
        SendRequest::new(h.from, "registry", "register", vec![json!("did")])
    }

    fn chain_calls(n: usize) -> Vec<ChainCall> {
        (0..n)
            .map(|i| ChainCall::new("registry", "approve", vec![json!(i)]))
            .collect()
    }

    #[tokio::test]
    async fn node_signed_send_leaves_nonce_to_the_node() {
        let h = harness();
        let receipt = h.sender.send(&call(&h)).await.unwrap();
        assert!(receipt.succeeded());
        let sent = h.node.sent_tx();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].nonce, None);
        // The manager was never involved.
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn node_signed_send_propagates_classified_errors() {
        let h = harness();
        h.node.push_send_tx(Err("nonce too low"));
        let err = h.sender.send(&call(&h)).await.unwrap_err();
        assert!(err.is_invalid_nonce());
        // No nonce was assigned, so there is nothing to release.
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn externally_signed_send_assigns_and_submits_raw() {
        let h = harness();
        let mut request = call(&h);
        request.signer = Some(Arc::clone(&h.signer) as Arc<dyn TransactionSigner>);
        let receipt = h.sender.send(&request).await.unwrap();
        assert!(receipt.succeeded());

        let raw = h.node.sent_raw();
        assert_eq!(raw.len(), 1);
        assert_eq!(recover_sender(&raw[0]).unwrap(), h.from);
        // Nonce 0 was consumed; the next acquire moves past it.
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn nonce_rejection_keeps_the_nonce_reserved() {
        let h = harness();
        h.node.push_send_raw(Err("nonce too low"));
        let mut request = call(&h);
        request.signer = Some(Arc::clone(&h.signer) as Arc<dyn TransactionSigner>);
        let err = h.sender.send(&request).await.unwrap_err();
        assert!(err.is_invalid_nonce());
        // A direct retry picks a different nonce.
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn other_node_errors_release_the_nonce() {
        let h = harness();
        h.node.push_send_raw(Err("insufficient funds for gas * price + value"));
        let mut request = call(&h);
        request.signer = Some(Arc::clone(&h.signer) as Arc<dyn TransactionSigner>);
        let err = h.sender.send(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Generic(_)));
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mining_timeout_releases_the_nonce() {
        let h = harness();
        h.node.disable_auto_mine();
        let mut request = call(&h);
        request.signer = Some(Arc::clone(&h.signer) as Arc<dyn TransactionSigner>);
        let err = h.sender.send(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn signing_timeout_releases_the_nonce() {
        let h = harness();
        let mut request = call(&h);
        request.signer = Some(Arc::new(SlowSigner));
        let err = h.sender.send(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn foreign_signature_is_a_signer_mismatch() {
        let h = harness();
        let mut request = call(&h);
        request.signer = Some(Arc::new(MismatchSigner {
            inner: LocalSigner::random(),
        }));
        let err = h.sender.send(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::SignerMismatch { .. }));
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn wrong_blob_count_is_generic() {
        let h = harness();
        let mut request = call(&h);
        request.signer = Some(Arc::new(ShortSigner));
        let err = h.sender.send(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Generic(_)));
    }

    #[tokio::test]
    async fn explicit_nonce_override_is_never_released() {
        let h = harness();
        h.node.push_send_raw(Err("insufficient funds"));
        let mut request = call(&h);
        request.signer = Some(Arc::clone(&h.signer) as Arc<dyn TransactionSigner>);
        request.overrides.nonce = Some(42);
        let err = h.sender.send(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Generic(_)));
        // The manager never saw nonce 42: a fresh acquire starts at 0.
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transfer_send_uses_the_native_gas_constant() {
        let h = harness();
        let mut request = TransferSendRequest::new(h.from, TARGET, U256::from(1_000u64));
        request.signer = Some(Arc::clone(&h.signer) as Arc<dyn TransactionSigner>);
        let receipt = h.sender.send_transfer(&request).await.unwrap();
        assert!(receipt.succeeded());
        let raw = h.node.sent_raw();
        assert_eq!(raw.len(), 1);
        assert_eq!(recover_sender(&raw[0]).unwrap(), h.from);
    }

    #[tokio::test]
    async fn chain_submits_in_order_and_returns_the_last_receipt() {
        let h = harness();
        let mut request = ChainRequest::new(h.from, chain_calls(3));
        request.signer = Some(Arc::clone(&h.signer) as Arc<dyn TransactionSigner>);
        let receipt = h.sender.send_chain(&request).await.unwrap();
        assert!(receipt.succeeded());

        let raw = h.node.sent_raw();
        assert_eq!(raw.len(), 3);
        // Nonces 0..2 were consumed in order; the next acquire continues.
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn chain_of_one_matches_a_single_send() {
        let h = harness();
        let mut request = ChainRequest::new(h.from, chain_calls(1));
        request.signer = Some(Arc::clone(&h.signer) as Arc<dyn TransactionSigner>);
        let receipt = h.sender.send_chain(&request).await.unwrap();
        assert!(receipt.succeeded());
        assert_eq!(h.node.sent_raw().len(), 1);
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn chain_failure_carries_the_unsent_remainder() {
        let h = harness();
        // Steps 1 and 2 mine; step 3 fails with a non-nonce error.
        h.node.push_send_raw(Ok(alloy_primitives::keccak256(b"step-0")));
        h.node.push_send_raw(Ok(alloy_primitives::keccak256(b"step-1")));
        h.node.push_send_raw(Err("insufficient funds"));

        let mut request = ChainRequest::new(h.from, chain_calls(4));
        request.signer = Some(Arc::clone(&h.signer) as Arc<dyn TransactionSigner>);
        let err = h.sender.send_chain(&request).await.unwrap_err();
        let DispatchError::FailedTxChain { unsent, cause } = err else {
            panic!("expected FailedTxChain");
        };
        assert_eq!(unsent.len(), 2);
        assert_eq!(unsent[0].nonce, Some(2));
        assert!(matches!(*cause, DispatchError::Generic(_)));
        // Both unsent nonces (2 and 3) went back to the pool; 0 and 1 stay
        // reserved until an acquire observes them mined.
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn chain_nonce_rejection_retains_the_failing_nonce() {
        let h = harness();
        h.node.push_send_raw(Ok(alloy_primitives::keccak256(b"step-0")));
        h.node.push_send_raw(Ok(alloy_primitives::keccak256(b"step-1")));
        h.node.push_send_raw(Err("nonce too low"));

        let mut request = ChainRequest::new(h.from, chain_calls(4));
        request.signer = Some(Arc::clone(&h.signer) as Arc<dyn TransactionSigner>);
        let err = h.sender.send_chain(&request).await.unwrap_err();
        let DispatchError::FailedTxChain { unsent, cause } = err else {
            panic!("expected FailedTxChain");
        };
        assert_eq!(unsent.len(), 2);
        assert!(cause.is_invalid_nonce());
        // Nonce 2 (the rejected one) stays reserved, nonce 3 was released.
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn chain_signing_timeout_releases_everything() {
        let h = harness();
        let mut request = ChainRequest::new(h.from, chain_calls(4));
        request.signer = Some(Arc::new(SlowSigner));
        let err = h.sender.send_chain(&request).await.unwrap_err();
        let DispatchError::FailedTxChain { unsent, cause } = err else {
            panic!("expected FailedTxChain");
        };
        assert_eq!(unsent.len(), 4);
        assert!(matches!(*cause, DispatchError::Timeout { .. }));
        assert_eq!(h.node.sent_raw().len(), 0);
        // Every reservation went back: the pool restarts at 0.
        assert_eq!(h.nonces.acquire(h.from).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn node_signed_chain_submits_each_transaction() {
        let h = harness();
        let request = ChainRequest::new(h.from, chain_calls(3));
        let receipt = h.sender.send_chain(&request).await.unwrap();
        assert!(receipt.succeeded());
        let sent = h.node.sent_tx();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|tx| tx.nonce.is_none()));
    }

    #[tokio::test]
    async fn empty_chain_is_rejected() {
        let h = harness();
        let request = ChainRequest::new(h.from, vec![]);
        let err = h.sender.send_chain(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Generic(_)));
    }
}
