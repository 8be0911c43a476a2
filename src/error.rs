//! Error taxonomy for the dispatch pipeline.
//!
//! Every failure surfaced to a caller is a [`DispatchError`]. Raw node errors
//! are folded into the taxonomy by [`DispatchError::classify`], which
//! recognizes node-specific failures by substring matching on the error
//! message. Nodes disagree on numeric error codes, so the textual message is
//! the only portable signal; the patterns live here and nowhere else.

use std::time::Duration;

use crate::node::NodeError;
use crate::store::StoreError;
use crate::types::{ChecksummedAddress, RawTransaction};

/// Message fragments that identify a nonce-related rejection.
///
/// Matched case-insensitively against the full error message. Covers the
/// wording used by geth, OpenEthereum and their descendants for too-low,
/// already-known and underpriced-replacement nonce failures.
const INVALID_NONCE_PATTERNS: &[&str] = &[
    "nonce",
    "replacement transaction underpriced",
    "known transaction",
];

/// Message fragments that identify an RPC method the node does not serve.
///
/// `txpool_inspect` and `txpool_content` are optional namespaces; a node
/// without them is a degraded mode, not a failure.
const METHOD_UNSUPPORTED_PATTERNS: &[&str] = &[
    "not supported",
    "method not found",
    "does not exist",
    "not available",
];

/// Closed set of failures surfaced by the dispatch pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The node rejected a transaction because of its nonce: too low,
    /// already known, or an underpriced replacement.
    #[error("invalid nonce: {message}")]
    InvalidNonce {
        /// Original node message, kept verbatim for operator triage.
        message: String,
    },
    /// The target address carries no code on the active network.
    #[error("no contract code deployed at {address}")]
    NotDeployed { address: ChecksummedAddress },
    /// The contract artifact has no binding for the active network.
    #[error("contract {name} has no binding for the active network")]
    NoNetworkInContract { name: String },
    /// The signer recovered from a signed transaction does not equal the
    /// declared sender.
    #[error("signer mismatch: recovered {recovered}, expected {expected}")]
    SignerMismatch {
        expected: ChecksummedAddress,
        recovered: ChecksummedAddress,
    },
    /// One transaction of an ordered chain failed. Carries the unsent
    /// remainder, failing transaction first.
    #[error("transaction chain failed with {} transaction(s) unsent: {cause}", unsent.len())]
    FailedTxChain {
        /// The failing transaction and everything after it, in submission
        /// order.
        unsent: Vec<RawTransaction>,
        /// The classified error that stopped the chain.
        #[source]
        cause: Box<DispatchError>,
    },
    /// Signing or receipt polling exceeded its budget.
    #[error("{operation} timed out after {waited:?}")]
    Timeout {
        operation: &'static str,
        waited: Duration,
    },
    /// A lookup resolved to an absence sentinel.
    #[error("not found: {0}")]
    NotFound(String),
    /// Everything else, propagated with its original message.
    #[error("{0}")]
    Generic(String),
}

impl DispatchError {
    /// Folds an error into the taxonomy.
    ///
    /// Idempotent: an already-classified error is returned unchanged. A
    /// [`DispatchError::Generic`] whose message matches one of the nonce
    /// patterns becomes [`DispatchError::InvalidNonce`]; any other kind
    /// passes through, so the error reaching the caller is always a single
    /// classified layer.
    pub fn classify(err: DispatchError) -> DispatchError {
        match err {
            DispatchError::Generic(message) if is_invalid_nonce_message(&message) => {
                DispatchError::InvalidNonce { message }
            }
            other => other,
        }
    }

    /// Classifies a raw node error.
    pub fn from_node(err: NodeError) -> DispatchError {
        Self::classify(DispatchError::Generic(err.to_string()))
    }

    /// Whether this error is a nonce rejection. Nonce-release policy hinges
    /// on this: an invalid nonce is never returned to the pool, since
    /// reusing it would only repeat the failure.
    pub fn is_invalid_nonce(&self) -> bool {
        matches!(self, DispatchError::InvalidNonce { .. })
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout { waited, .. } => DispatchError::Timeout {
                operation: "store lock acquisition",
                waited,
            },
        }
    }
}

/// Whether `message` names a nonce-related rejection.
pub(crate) fn is_invalid_nonce_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    INVALID_NONCE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Whether `message` names an RPC method the node does not serve.
pub(crate) fn is_method_unsupported(message: &str) -> bool {
    let lower = message.to_lowercase();
    METHOD_UNSUPPORTED_PATTERNS.iter().any(|p| lower.contains(p))
}
