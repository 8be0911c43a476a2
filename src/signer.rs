//! External signing capability.
//!
//! The pipeline never sees a private key: signing is a callback that takes
//! the declared sender and a batch of raw transactions and returns signed
//! blobs of the same cardinality. Before submission the sender recovers the
//! signer address from each blob and asserts it equals the declared sender.
//!
//! [`LocalSigner`] is the shipped in-process implementation over a
//! [`PrivateKeySigner`], signing legacy transactions with EIP-155 replay
//! protection whenever the transaction carries a chain id.

use alloy_consensus::transaction::SignerRecoverable;
use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::{Decodable2718, Encodable2718};
use alloy_primitives::{Address, Bytes, TxKind};
use alloy_network::TxSigner;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;

use crate::error::DispatchError;
use crate::types::{ChecksummedAddress, RawTransaction};

/// Signs batches of raw transactions on behalf of `from`.
///
/// Implementations must return exactly one signed blob per input
/// transaction, in order; each blob must encode a transaction whose
/// recovered sender equals `from`.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(
        &self,
        from: Address,
        transactions: &[RawTransaction],
    ) -> Result<Vec<Bytes>, DispatchError>;
}

/// In-process [`TransactionSigner`] over a local private key.
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    pub fn new(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }

    /// A signer over a freshly generated key.
    pub fn random() -> Self {
        Self::new(PrivateKeySigner::random())
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    async fn sign(
        &self,
        from: Address,
        transactions: &[RawTransaction],
    ) -> Result<Vec<Bytes>, DispatchError> {
        if from != self.inner.address() {
            return Err(DispatchError::Generic(format!(
                "signer holds no key for {}",
                ChecksummedAddress::from(from)
            )));
        }
        let mut signed = Vec::with_capacity(transactions.len());
        for tx in transactions {
            let mut legacy = to_legacy(tx)?;
            let signature = self
                .inner
                .sign_transaction(&mut legacy)
                .await
                .map_err(|err| DispatchError::Generic(format!("signing failed: {err}")))?;
            let envelope: TxEnvelope = legacy.into_signed(signature).into();
            signed.push(Bytes::from(envelope.encoded_2718()));
        }
        Ok(signed)
    }
}

/// Recovers the sender address from a signed transaction blob.
pub fn recover_sender(raw: &Bytes) -> Result<Address, DispatchError> {
    let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())
        .map_err(|err| DispatchError::Generic(format!("undecodable signed transaction: {err}")))?;
    envelope
        .recover_signer()
        .map_err(|err| DispatchError::Generic(format!("signer recovery failed: {err}")))
}

fn to_legacy(tx: &RawTransaction) -> Result<TxLegacy, DispatchError> {
    let nonce = tx.nonce.ok_or_else(|| {
        DispatchError::Generic("transaction nonce must be assigned before external signing".into())
    })?;
    let gas_price = u128::try_from(tx.gas_price)
        .map_err(|_| DispatchError::Generic("gas price exceeds 128 bits".into()))?;
    Ok(TxLegacy {
        // Chain id zero means pre-EIP-155 signing.
        chain_id: (tx.chain_id != 0).then_some(tx.chain_id),
        nonce,
        gas_price,
        gas_limit: tx.gas,
        to: TxKind::Call(tx.to),
        value: tx.value,
        input: tx.data.clone(),
    })
}
