//! Contract resolution capability.
//!
//! ABI encoding and artifact loading live outside the pipeline; the core
//! only needs a name-to-contract lookup and an opaque
//! `encode_call(method, args) -> bytes`. Implementations may use generated
//! bindings, dynamic ABI encoding or manual encoders. Catalog lookups are
//! memoized by name and the memo must be thread-safe; compute-once
//! semantics are acceptable.

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::DispatchError;

/// A resolved contract binding.
pub trait Contract: Send + Sync {
    /// Deployed address on the active network.
    fn address(&self) -> Address;

    /// Encodes a method invocation into calldata.
    fn encode_call(&self, method: &str, args: &[serde_json::Value])
    -> Result<Bytes, DispatchError>;
}

impl std::fmt::Debug for dyn Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contract").field("address", &self.address()).finish()
    }
}

/// Name-to-contract lookup.
#[async_trait]
pub trait ContractCatalog: Send + Sync {
    /// Resolves `name` to its binding on the active network.
    ///
    /// Fails with [`DispatchError::NotFound`] for an unknown name and
    /// [`DispatchError::NoNetworkInContract`] when the artifact exists but
    /// carries no address for the active network.
    async fn contract(&self, name: &str) -> Result<Arc<dyn Contract>, DispatchError>;

    /// Every artifact name the catalog knows, bound or not.
    fn names(&self) -> Vec<String>;
}

/// A contract backed by a fixed address and a caller-supplied encoder.
///
/// The encoder closure is the bridge to whatever ABI machinery the host
/// uses; the pipeline never interprets the produced bytes.
pub struct StaticContract {
    address: Address,
    encoder: Box<dyn Fn(&str, &[serde_json::Value]) -> Result<Bytes, DispatchError> + Send + Sync>,
}

impl StaticContract {
    pub fn new(
        address: Address,
        encoder: impl Fn(&str, &[serde_json::Value]) -> Result<Bytes, DispatchError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            address,
            encoder: Box::new(encoder),
        }
    }
}

impl Contract for StaticContract {
    fn address(&self) -> Address {
        self.address
    }

    fn encode_call(
        &self,
        method: &str,
        args: &[serde_json::Value],
    ) -> Result<Bytes, DispatchError> {
        (self.encoder)(method, args)
    }
}

enum CatalogEntry {
    Bound(Arc<dyn Contract>),
    /// Artifact known, but no deployment on the active network.
    Unbound,
}

/// In-memory [`ContractCatalog`] over a fixed registry.
///
/// The registry doubles as the memo: every entry is resolved once at
/// registration.
#[derive(Default)]
pub struct StaticCatalog {
    entries: DashMap<String, CatalogEntry>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a contract binding under `name`.
    pub fn bind(&self, name: impl Into<String>, contract: Arc<dyn Contract>) {
        self.entries
            .insert(name.into(), CatalogEntry::Bound(contract));
    }

    /// Registers an artifact that has no binding for the active network.
    /// Resolution of the name fails with
    /// [`DispatchError::NoNetworkInContract`].
    pub fn declare_unbound(&self, name: impl Into<String>) {
        self.entries.insert(name.into(), CatalogEntry::Unbound);
    }
}

#[async_trait]
impl ContractCatalog for StaticCatalog {
    async fn contract(&self, name: &str) -> Result<Arc<dyn Contract>, DispatchError> {
        match self.entries.get(name) {
            Some(entry) => match entry.value() {
                CatalogEntry::Bound(contract) => Ok(Arc::clone(contract)),
                CatalogEntry::Unbound => Err(DispatchError::NoNetworkInContract {
                    name: name.to_string(),
                }),
            },
            None => Err(DispatchError::NotFound(format!("contract {name}"))),
        }
    }

    fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let catalog = StaticCatalog::new();
        let err = catalog.contract("missing").await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn unbound_artifact_reports_missing_network() {
        let catalog = StaticCatalog::new();
        catalog.declare_unbound("registry");
        let err = catalog.contract("registry").await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::NoNetworkInContract { name } if name == "registry"
        ));
    }

    #[tokio::test]
    async fn bound_contract_resolves_and_encodes() {
        let target = address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
        let catalog = testing::catalog_with_registry(target);
        let contract = catalog.contract("registry").await.unwrap();
        assert_eq!(contract.address(), target);
        let data = contract
            .encode_call("transfer", &[serde_json::json!(42)])
            .unwrap();
        assert!(!data.is_empty());
    }
}
