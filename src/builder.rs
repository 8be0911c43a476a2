//! Raw transaction assembly.
//!
//! The builder resolves contract bindings, encodes calldata and fills gas,
//! price and chain fields from per-call overrides or configured defaults.
//! Nonce handling has three modes per call: an explicit override (bypasses
//! the manager entirely), manager-assigned, or unset (the node assigns at
//! submission). When the builder acquires a nonce and then fails, it
//! releases that nonce before propagating; compensation is the builder's
//! responsibility, not the caller's.

use alloy_primitives::{Address, Bytes, U256};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::ContractCatalog;
use crate::error::DispatchError;
use crate::nonce::NonceManager;
use crate::types::{RawTransaction, TRANSFER_GAS};

/// Per-call field overrides.
///
/// Supplying `nonce` bypasses the nonce manager for the call: the value is
/// used verbatim and never acquired or released.
#[derive(Debug, Clone, Default)]
pub struct TxOverrides {
    pub nonce: Option<u64>,
    pub gas: Option<u64>,
    pub gas_price: Option<U256>,
    pub chain_id: Option<u64>,
    /// Receipt-poll budget for this call, superseding the configured
    /// mining timeout.
    pub wait_for_mine_timeout: Option<Duration>,
}

/// Default transaction fields, from configuration.
#[derive(Debug, Clone, Copy)]
pub struct TxDefaults {
    pub gas_price: U256,
    pub gas_limit: u64,
    pub chain_id: u64,
}

/// A contract method invocation to build.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub from: Address,
    pub contract: String,
    pub method: String,
    pub args: Vec<serde_json::Value>,
    /// Native value to attach; zero for ordinary calls.
    pub value: U256,
}

impl CallRequest {
    pub fn new(
        from: Address,
        contract: impl Into<String>,
        method: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            from,
            contract: contract.into(),
            method: method.into(),
            args,
            value: U256::ZERO,
        }
    }
}

/// A native-coin transfer to build.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// One entry of an ordered chain; the sender address is shared chain-wide.
#[derive(Debug, Clone)]
pub struct ChainCall {
    pub contract: String,
    pub method: String,
    pub args: Vec<serde_json::Value>,
    pub value: U256,
}

impl ChainCall {
    pub fn new(
        contract: impl Into<String>,
        method: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            contract: contract.into(),
            method: method.into(),
            args,
            value: U256::ZERO,
        }
    }
}

/// Assembles raw transactions with correct nonce, gas and data fields.
#[derive(Clone)]
pub struct TransactionBuilder {
    catalog: Arc<dyn ContractCatalog>,
    nonces: NonceManager,
    defaults: TxDefaults,
}

impl TransactionBuilder {
    pub fn new(
        catalog: Arc<dyn ContractCatalog>,
        nonces: NonceManager,
        defaults: TxDefaults,
    ) -> Self {
        Self {
            catalog,
            nonces,
            defaults,
        }
    }

    /// Builds a contract call transaction.
    pub async fn build_call(
        &self,
        request: &CallRequest,
        assigned_nonce: bool,
        overrides: &TxOverrides,
    ) -> Result<RawTransaction, DispatchError> {
        let contract = self.catalog.contract(&request.contract).await?;
        let (nonce, reserved) = self
            .resolve_nonce(request.from, assigned_nonce, overrides)
            .await?;
        let data = match contract.encode_call(&request.method, &request.args) {
            Ok(data) => data,
            Err(err) => {
                self.compensate(request.from, reserved).await;
                return Err(err);
            }
        };
        Ok(RawTransaction {
            from: request.from,
            to: contract.address(),
            value: request.value,
            gas: overrides.gas.unwrap_or(self.defaults.gas_limit),
            gas_price: overrides.gas_price.unwrap_or(self.defaults.gas_price),
            chain_id: overrides.chain_id.unwrap_or(self.defaults.chain_id),
            nonce,
            data,
        })
    }

    /// Builds a native-coin transfer transaction.
    pub async fn build_transfer(
        &self,
        request: &TransferRequest,
        assigned_nonce: bool,
        overrides: &TxOverrides,
    ) -> Result<RawTransaction, DispatchError> {
        let (nonce, _reserved) = self
            .resolve_nonce(request.from, assigned_nonce, overrides)
            .await?;
        Ok(RawTransaction {
            from: request.from,
            to: request.to,
            value: request.value,
            gas: overrides.gas.unwrap_or(TRANSFER_GAS),
            gas_price: overrides.gas_price.unwrap_or(self.defaults.gas_price),
            chain_id: overrides.chain_id.unwrap_or(self.defaults.chain_id),
            nonce,
            data: Bytes::new(),
        })
    }

    /// Builds every entry of an ordered chain.
    ///
    /// All transactions share `from`. With `assigned_nonce`, each entry
    /// receives its own sequentially acquired nonce. If any step fails,
    /// every nonce already acquired for the chain is released before the
    /// error propagates.
    pub async fn build_chain(
        &self,
        from: Address,
        calls: &[ChainCall],
        assigned_nonce: bool,
        overrides: &TxOverrides,
    ) -> Result<Vec<RawTransaction>, DispatchError> {
        if overrides.nonce.is_some() {
            return Err(DispatchError::Generic(
                "a nonce override cannot apply to a transaction chain".to_string(),
            ));
        }
        let mut built = Vec::with_capacity(calls.len());
        for call in calls {
            let request = CallRequest {
                from,
                contract: call.contract.clone(),
                method: call.method.clone(),
                args: call.args.clone(),
                value: call.value,
            };
            match self.build_call(&request, assigned_nonce, overrides).await {
                Ok(tx) => built.push(tx),
                Err(err) => {
                    // The failing call compensated its own nonce; roll back
                    // the rest of the chain.
                    let acquired: Vec<u64> = built.iter().filter_map(|tx| tx.nonce).collect();
                    self.compensate_many(from, &acquired).await;
                    return Err(err);
                }
            }
        }
        Ok(built)
    }

    async fn resolve_nonce(
        &self,
        from: Address,
        assigned_nonce: bool,
        overrides: &TxOverrides,
    ) -> Result<(Option<u64>, Option<u64>), DispatchError> {
        if let Some(nonce) = overrides.nonce {
            return Ok((Some(nonce), None));
        }
        if assigned_nonce {
            let nonce = self.nonces.acquire(from).await?;
            return Ok((Some(nonce), Some(nonce)));
        }
        Ok((None, None))
    }

    async fn compensate(&self, from: Address, reserved: Option<u64>) {
        if let Some(nonce) = reserved {
            self.compensate_many(from, &[nonce]).await;
        }
    }

    async fn compensate_many(&self, from: Address, nonces: &[u64]) {
        if nonces.is_empty() {
            return;
        }
        if let Err(err) = self.nonces.release_many(from, nonces).await {
            tracing::warn!(%from, ?nonces, error = %err, "failed to release nonces after build error");
        }
    }
}
