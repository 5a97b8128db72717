//! Error types for ledger synchronization and signature coordination
//!
//! Ledger I/O failures (`SourceError`) never cross the registry boundary:
//! subscriptions absorb them and retry. Signature problems are reported as
//! data on classification results. Only construction-time misuse
//! (`KeyError`) and form validation errors reach the caller as `Err`.

use thiserror::Error;

/// Failure reported by a ledger data source
///
/// Every variant is treated as transient by the subscription layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Ledger source unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed ledger response: {0}")]
    Malformed(String),
}

/// Problems found while inspecting the signatures attached to an envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Malformed signature at index {index}: {reason}")]
    MalformedSignature { index: usize, reason: String },

    #[error("Signature hint matches {public_key} but the signature does not verify")]
    HintWithoutValidSignature { public_key: String },

    #[error("Malformed transaction envelope: {0}")]
    MalformedEnvelope(String),
}

/// Malformed subscription key or account identifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid account id: {0}")]
    InvalidAccountId(String),

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),
}

/// Validation failures when editing an account's signer list
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerEditError {
    #[error("Not a valid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Weight must be a positive integer, got {0:?}")]
    InvalidWeight(String),

    #[error("Signer already present: {0}")]
    DuplicateSigner(String),

    #[error("Signer not found: {0}")]
    SignerNotFound(String),

    #[error("Threshold {threshold} is unreachable with total weight {total_weight}")]
    UnreachableThreshold { threshold: u32, total_weight: u32 },

    #[error("Threshold must be at least 1")]
    ZeroThreshold,
}

/// Validation failures for a new wallet account
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("No account name has been entered")]
    MissingName,

    #[error("No password has been entered")]
    MissingPassword,

    #[error("Password does not match")]
    PasswordMismatch,

    #[error("Invalid secret key")]
    InvalidSecretKey,

    #[error("Invalid account id: {0}")]
    InvalidAccountId(String),
}

/// Crate-level error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerSyncError {
    #[error("Ledger source error: {0}")]
    Source(#[from] SourceError),

    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Signer edit error: {0}")]
    SignerEdit(#[from] SignerEditError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Signature request not found: {0}")]
    RequestNotFound(String),
}

impl SourceError {
    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
