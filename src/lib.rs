//! Client-side transaction dispatch for EVM-style chains.
//!
//! This crate drives one-off transactions and ordered chains of
//! transactions through a node, managing per-account nonce allocation
//! across concurrent callers, recovering from signer failures, surfacing
//! mining and timeout results, and optionally deferring signing to an
//! external callback.
//!
//! # Overview
//!
//! The core is the transaction pipeline: a nonce manager that dispenses
//! unique, gap-filling nonces per account while respecting the node's
//! mempool; a builder that assembles raw transactions; a sender that
//! drives single and chained submissions and polls for mining; and an
//! error classifier that decides whether a failed transaction's nonce
//! goes back to the pool. These pieces are tightly coupled: a bug in any
//! one corrupts an account's nonce space and can strand or duplicate
//! transactions.
//!
//! The crate never talks to the wire itself. Node access goes through the
//! [`node::NodeClient`] capability ([`node::HttpNodeClient`] is the shipped
//! JSON-RPC implementation), ABI encoding through [`catalog::ContractCatalog`],
//! and signing through [`signer::TransactionSigner`].
//!
//! # Modules
//!
//! - [`builder`] — Raw transaction assembly with per-call overrides.
//! - [`catalog`] — Contract resolution and opaque calldata encoding.
//! - [`config`] — Pipeline configuration with serde defaults.
//! - [`details`] — Status resolution for a hash or an (address, nonce) pair.
//! - [`error`] — The closed error taxonomy and node-message classifier.
//! - [`inspector`] — Confirmed counts and per-address mempool views.
//! - [`node`] — The node access capability and its HTTP implementation.
//! - [`nonce`] — Gap-filling, mempool-aware nonce allocation.
//! - [`pipeline`] — The composed [`Pipeline`](pipeline::Pipeline) object.
//! - [`receipt`] — Receipt polling with timeout.
//! - [`sender`] — Single, transfer and chained submission.
//! - [`signer`] — External signing callback and sender recovery.
//! - [`store`] — Pluggable nonce storage with per-key locking.
//! - [`types`] — Wire types: transactions, receipts, mempool snapshots.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tx_dispatch::config::DispatchConfig;
//! use tx_dispatch::node::HttpNodeClient;
//! use tx_dispatch::pipeline::Pipeline;
//! use tx_dispatch::sender::SendRequest;
//!
//! let node = Arc::new(HttpNodeClient::new("http://localhost:8545".parse()?));
//! let pipeline = Pipeline::new(DispatchConfig::default(), node, catalog).await?;
//! let receipt = pipeline
//!     .sender()
//!     .send(&SendRequest::new(from, "registry", "register", vec![]))
//!     .await?;
//! ```

pub mod builder;
pub mod catalog;
pub mod config;
pub mod details;
pub mod error;
pub mod inspector;
pub mod node;
pub mod nonce;
pub mod pipeline;
pub mod receipt;
pub mod sender;
pub mod signer;
pub mod store;
pub mod types;

pub use config::DispatchConfig;
pub use error::DispatchError;
pub use pipeline::Pipeline;
pub use types::{PlacementReceipt, RawTransaction, TransactionStatus};
