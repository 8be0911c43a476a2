//! Pipeline configuration.
//!
//! Fields use serde defaults so hosts can embed a partial configuration in
//! their own config files; every omitted field falls back to a hardcoded
//! default.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::builder::TxDefaults;
use crate::sender::SenderTimeouts;
use crate::store::LockOptions;
use alloy_primitives::U256;

/// Where contract artifacts are loaded from.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContractsSource {
    /// A registry service endpoint.
    Url(Url),
    /// A local artifact directory.
    Dir(PathBuf),
}

/// Configuration of the dispatch pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Default gas price in wei.
    #[serde(default = "config_defaults::gas_price")]
    pub gas_price: u128,
    /// Default call gas limit.
    #[serde(default = "config_defaults::gas_limit")]
    pub gas_limit: u64,
    /// EIP-155 chain id; zero disables replay protection.
    #[serde(default)]
    pub chain_id: u64,
    /// Per-transaction receipt-poll budget, seconds.
    #[serde(default = "config_defaults::tx_mining_timeout_secs")]
    pub tx_mining_timeout_secs: u64,
    /// Signer callback budget, milliseconds.
    #[serde(default = "config_defaults::tx_signing_timeout_ms")]
    pub tx_signing_timeout_ms: u64,
    /// Store lock acquisition budget, milliseconds.
    #[serde(default = "config_defaults::lock_acquire_timeout_ms")]
    pub lock_acquire_timeout_ms: u64,
    /// Poll interval while waiting for a contended store lock, milliseconds.
    #[serde(default = "config_defaults::lock_check_interval_ms")]
    pub lock_check_interval_ms: u64,
    /// Store lock watchdog budget, milliseconds.
    #[serde(default = "config_defaults::lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Resolve every catalog entry at construction to surface
    /// misconfiguration early.
    #[serde(default = "config_defaults::preload_contracts")]
    pub preload_contracts: bool,
    /// Contract artifact source, consumed by catalog implementations.
    #[serde(default)]
    pub contracts: Option<ContractsSource>,
}

mod config_defaults {
    pub fn gas_price() -> u128 {
        1_000_000_000
    }
    pub fn gas_limit() -> u64 {
        300_000
    }
    pub fn tx_mining_timeout_secs() -> u64 {
        120
    }
    pub fn tx_signing_timeout_ms() -> u64 {
        60_000
    }
    pub fn lock_acquire_timeout_ms() -> u64 {
        45_000
    }
    pub fn lock_check_interval_ms() -> u64 {
        100
    }
    pub fn lock_timeout_ms() -> u64 {
        5_000
    }
    pub fn preload_contracts() -> bool {
        true
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            gas_price: config_defaults::gas_price(),
            gas_limit: config_defaults::gas_limit(),
            chain_id: 0,
            tx_mining_timeout_secs: config_defaults::tx_mining_timeout_secs(),
            tx_signing_timeout_ms: config_defaults::tx_signing_timeout_ms(),
            lock_acquire_timeout_ms: config_defaults::lock_acquire_timeout_ms(),
            lock_check_interval_ms: config_defaults::lock_check_interval_ms(),
            lock_timeout_ms: config_defaults::lock_timeout_ms(),
            preload_contracts: config_defaults::preload_contracts(),
            contracts: None,
        }
    }
}

impl DispatchConfig {
    /// Default transaction fields for the builder.
    pub fn tx_defaults(&self) -> TxDefaults {
        TxDefaults {
            gas_price: U256::from(self.gas_price),
            gas_limit: self.gas_limit,
            chain_id: self.chain_id,
        }
    }

    /// Signing and mining budgets for the sender.
    pub fn sender_timeouts(&self) -> SenderTimeouts {
        SenderTimeouts {
            signing: Duration::from_millis(self.tx_signing_timeout_ms),
            mining: Duration::from_secs(self.tx_mining_timeout_secs),
        }
    }

    /// Lock timing knobs for the in-memory store.
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            acquire_timeout: Duration::from_millis(self.lock_acquire_timeout_ms),
            check_interval: Duration::from_millis(self.lock_check_interval_ms),
            hold_timeout: Duration::from_millis(self.lock_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: DispatchConfig = serde_json::from_str("{}").expect("deserializes");
        assert_eq!(config.gas_price, 1_000_000_000);
        assert_eq!(config.gas_limit, 300_000);
        assert_eq!(config.chain_id, 0);
        assert_eq!(config.tx_mining_timeout_secs, 120);
        assert_eq!(config.tx_signing_timeout_ms, 60_000);
        assert_eq!(config.lock_acquire_timeout_ms, 45_000);
        assert_eq!(config.lock_check_interval_ms, 100);
        assert_eq!(config.lock_timeout_ms, 5_000);
        assert!(config.preload_contracts);
        assert!(config.contracts.is_none());
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let config: DispatchConfig = serde_json::from_value(serde_json::json!({
            "gas_price": 2_000_000_000u64,
            "chain_id": 59,
            "tx_mining_timeout_secs": 30,
            "preload_contracts": false,
            "contracts": { "dir": "/var/lib/contracts" }
        }))
        .expect("deserializes");
        assert_eq!(config.gas_price, 2_000_000_000);
        assert_eq!(config.chain_id, 59);
        assert_eq!(config.sender_timeouts().mining, Duration::from_secs(30));
        assert!(!config.preload_contracts);
        assert_eq!(
            config.contracts,
            Some(ContractsSource::Dir(PathBuf::from("/var/lib/contracts")))
        );
    }

    #[test]
    fn url_contracts_source() {
        let config: DispatchConfig = serde_json::from_value(serde_json::json!({
            "contracts": { "url": "https://contracts.example.com/artifacts" }
        }))
        .expect("deserializes");
        assert!(matches!(config.contracts, Some(ContractsSource::Url(_))));
    }
}
