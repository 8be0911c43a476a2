//! Wire types shared across the pipeline.
//!
//! Integer fields cross the wire as `0x`-prefixed hexadecimal with no
//! leading-zero padding (`0` encodes as `0x0`); the [`quantity`] serde
//! helpers implement that rule. Addresses are kept in checksummed textual
//! form internally, because nodes key their mempool replies by checksummed
//! address.

use alloy_primitives::{Address, B256, Bytes, U256, hex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Gas consumed by a native-coin transfer on EVM chains.
pub const TRANSFER_GAS: u64 = 21_000;

/// An address in its EIP-55 checksummed spelling.
///
/// Store keys and mempool lookups go through this type so every textual
/// use of an address agrees with the casing nodes key their replies by.
/// Displaying it yields the checksummed form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChecksummedAddress(Address);

impl ChecksummedAddress {
    /// The underlying binary address.
    pub fn address(&self) -> Address {
        self.0
    }
}

impl From<Address> for ChecksummedAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl FromStr for ChecksummedAddress {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_str(s).map(Self)
    }
}

impl Display for ChecksummedAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_checksum(None))
    }
}

/// Serde helpers for `0x`-hex quantity encoding.
pub mod quantity {
    /// `u64` as a `0x`-hex quantity.
    pub mod u64 {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&format!("0x{value:x}"))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
            let s = String::deserialize(deserializer)?;
            let digits = s
                .strip_prefix("0x")
                .ok_or_else(|| serde::de::Error::custom("quantity must be 0x-prefixed"))?;
            u64::from_str_radix(digits, 16).map_err(serde::de::Error::custom)
        }
    }

    /// `Option<u64>` as a `0x`-hex quantity; absent when `None`.
    pub mod opt_u64 {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<u64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => super::u64::serialize(v, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u64>, D::Error> {
            let s = Option::<String>::deserialize(deserializer)?;
            match s {
                None => Ok(None),
                Some(s) => {
                    let digits = s
                        .strip_prefix("0x")
                        .ok_or_else(|| serde::de::Error::custom("quantity must be 0x-prefixed"))?;
                    u64::from_str_radix(digits, 16)
                        .map(Some)
                        .map_err(serde::de::Error::custom)
                }
            }
        }
    }

    /// `U256` as a `0x`-hex quantity.
    pub mod u256 {
        use alloy_primitives::U256;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&format!("0x{value:x}"))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
            let s = String::deserialize(deserializer)?;
            let digits = s
                .strip_prefix("0x")
                .ok_or_else(|| serde::de::Error::custom("quantity must be 0x-prefixed"))?;
            U256::from_str_radix(digits, 16).map_err(serde::de::Error::custom)
        }
    }
}

/// An unsigned transaction as assembled by the builder.
///
/// Fields are carried as native integers and byte strings; the serde
/// representation is the JSON-RPC wire shape (`eth_sendTransaction`
/// parameter object).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub from: Address,
    pub to: Address,
    #[serde(with = "quantity::u256")]
    pub value: U256,
    #[serde(with = "quantity::u64")]
    pub gas: u64,
    #[serde(with = "quantity::u256")]
    pub gas_price: U256,
    #[serde(with = "quantity::u64")]
    pub chain_id: u64,
    /// Present whenever assigned-nonce mode is active; absent when the node
    /// assigns the nonce at submission time.
    #[serde(default, with = "quantity::opt_u64", skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    pub data: Bytes,
}

/// Mined-transaction receipt as returned to callers.
///
/// Chained sends return the receipt of the last transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementReceipt {
    pub transaction_hash: B256,
    #[serde(with = "quantity::u64")]
    pub status: u64,
    #[serde(default, with = "quantity::opt_u64", skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<B256>,
    #[serde(with = "quantity::u64")]
    pub gas_used: u64,
    pub from: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
}

impl PlacementReceipt {
    /// Whether the transaction executed successfully (EVM status `1`).
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

impl From<alloy_rpc_types_eth::TransactionReceipt> for PlacementReceipt {
    fn from(receipt: alloy_rpc_types_eth::TransactionReceipt) -> Self {
        PlacementReceipt {
            transaction_hash: receipt.transaction_hash,
            status: receipt.status() as u64,
            block_number: receipt.block_number,
            block_hash: receipt.block_hash,
            gas_used: receipt.gas_used,
            from: receipt.from,
            to: receipt.to,
        }
    }
}

/// Resolved status of a transaction, from receipt and mempool inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// In the mempool, dispatch-ready.
    Pending,
    /// In the mempool behind a nonce gap.
    Queued,
    /// Included in a block.
    Mined,
    /// Not in a block and not visible in the mempool.
    Unknown,
    /// The node does not serve the txpool namespace.
    Unsupported,
}

/// Node-wide `txpool_inspect` snapshot: per-address, per-nonce one-line
/// transaction summaries, keyed by checksummed address and decimal nonce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxpoolInspect {
    #[serde(default)]
    pub pending: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub queued: BTreeMap<String, BTreeMap<String, String>>,
}

/// Node-wide `txpool_content` snapshot: same shape as [`TxpoolInspect`] but
/// with full transaction bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxpoolContent {
    #[serde(default)]
    pub pending: BTreeMap<String, BTreeMap<String, MempoolTransaction>>,
    #[serde(default)]
    pub queued: BTreeMap<String, BTreeMap<String, MempoolTransaction>>,
}

/// A transaction body as reported by `txpool_content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolTransaction {
    pub hash: B256,
    pub from: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(with = "quantity::u64")]
    pub nonce: u64,
    #[serde(with = "quantity::u256")]
    pub value: U256,
    #[serde(with = "quantity::u64")]
    pub gas: u64,
    #[serde(with = "quantity::u256")]
    pub gas_price: U256,
    pub input: Bytes,
}

/// Per-address slice of the inspect-form mempool, nonces parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountMempool {
    pub pending: BTreeMap<u64, String>,
    pub queued: BTreeMap<u64, String>,
}

impl AccountMempool {
    /// Whether `nonce` appears in either sub-pool.
    pub fn contains(&self, nonce: u64) -> bool {
        self.pending.contains_key(&nonce) || self.queued.contains_key(&nonce)
    }

    /// All nonces known to the mempool for this address.
    pub fn nonces(&self) -> impl Iterator<Item = u64> + '_ {
        self.pending.keys().chain(self.queued.keys()).copied()
    }
}

/// Per-address slice of the content-form mempool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountMempoolContent {
    pub pending: BTreeMap<u64, MempoolTransaction>,
    pub queued: BTreeMap<u64, MempoolTransaction>,
}
