//! Per-account nonce allocation.
//!
//! The manager serves unique, gap-filling nonces per account. Each
//! allocation folds together three views of the account: the locally
//! reserved set (the store), the node's confirmed transaction count, and
//! the node's mempool. The allocation is gap-first: a hole left below the
//! highest reservation is filled before a fresh nonce is minted, so the
//! mempool cannot stall on queued transactions that will never mine.
//!
//! All store mutations for one address happen under that address's store
//! lock. The node reads precede the store read-compute-write so the
//! critical window holds no suspension besides the store itself.

use alloy_primitives::Address;
use std::sync::Arc;
use tracing::instrument;

use crate::error::DispatchError;
use crate::inspector::AccountInspector;
use crate::store::{KeyValueStore, NonceSet};
use crate::types::{AccountMempool, ChecksummedAddress};

/// Allocates, releases and clears nonces per account.
#[derive(Clone)]
pub struct NonceManager {
    store: Arc<dyn KeyValueStore>,
    inspector: AccountInspector,
}

impl NonceManager {
    pub fn new(store: Arc<dyn KeyValueStore>, inspector: AccountInspector) -> Self {
        Self { store, inspector }
    }

    /// Reserves and returns a nonce for `address`.
    ///
    /// As a side effect, drops every stored reservation strictly below the
    /// confirmed count: those transactions are mined and the values are no
    /// longer ours to reuse.
    #[instrument(skip_all, err, fields(address = %address))]
    pub async fn acquire(&self, address: Address) -> Result<u64, DispatchError> {
        let key = ChecksummedAddress::from(address).to_string();
        self.store.lock(&key).await?;
        match self.acquire_locked(address, &key).await {
            Ok(nonce) => Ok(nonce),
            Err(err) => {
                self.store.release(&key).await;
                Err(err)
            }
        }
    }

    async fn acquire_locked(&self, address: Address, key: &str) -> Result<u64, DispatchError> {
        let tx_count = self.inspector.confirmed_count(address).await?;
        let mempool = self
            .inspector
            .inspect_mempool(address)
            .await?
            .unwrap_or_default();

        let mut stored = self.store.get(key).await.unwrap_or_default();
        let mined: Vec<u64> = stored.range(..tx_count).copied().collect();
        if !mined.is_empty() {
            for nonce in &mined {
                stored.remove(nonce);
            }
            tracing::info!(
                address = %key,
                released = ?mined,
                confirmed = tx_count,
                "dropping reservations below the confirmed count"
            );
        }

        let nonce = next_free_nonce(&stored, tx_count, &mempool);
        stored.insert(nonce);
        // The put releases the address lock.
        self.store.put(key, stored).await;
        tracing::debug!(address = %key, nonce, "acquired nonce");
        Ok(nonce)
    }

    /// Returns a nonce to the pool.
    pub async fn release(&self, address: Address, nonce: u64) -> Result<(), DispatchError> {
        self.release_many(address, &[nonce]).await
    }

    /// Returns several nonces to the pool in one atomic store write.
    pub async fn release_many(&self, address: Address, nonces: &[u64]) -> Result<(), DispatchError> {
        if nonces.is_empty() {
            return Ok(());
        }
        let key = ChecksummedAddress::from(address).to_string();
        self.store.lock(&key).await?;
        let mut stored = self.store.get(&key).await.unwrap_or_default();
        for nonce in nonces {
            stored.remove(nonce);
        }
        self.store.put(&key, stored).await;
        tracing::debug!(address = %key, released = ?nonces, "released nonces");
        Ok(())
    }

    /// Forgets all per-address state. Safe to call concurrently with
    /// `acquire`; a nonce in flight at that moment remains valid for its
    /// holder.
    pub async fn clear_accounts(&self) {
        self.store.clear().await;
    }
}

/// First nonce at or above `tx_count` that is neither reserved locally nor
/// visible in the mempool. Total: the position past the highest known nonce
/// is always vacant.
pub(crate) fn next_free_nonce(stored: &NonceSet, tx_count: u64, mempool: &AccountMempool) -> u64 {
    let mut next = tx_count;
    while stored.contains(&next) || mempool.contains(next) {
        next += 1;
    }
    next
}
