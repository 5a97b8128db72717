//! Signature Coordinator - multi-signature request tracking
//!
//! Holds transactions that need signatures from several keys and sorts them
//! for a wallet account into "waiting for my signature" and "waiting for
//! someone else". Collected signatures are never cached: every query
//! re-derives them from the envelope, so a request can only become ready
//! through signatures that verify.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::account::WalletAccount;
use crate::error::{LedgerSyncError, SignatureError};
use crate::keys::normalize_key;
use crate::signature::{check_signature, collect_signatures, has_signed, DecoratedSignature, TransactionEnvelope};
use crate::signers::{signed_weight, SignerRef};
use crate::Result;

/// A transaction awaiting signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    /// Transaction hash of the envelope
    pub id: String,
    /// Ledger account the transaction is for
    pub source_account: String,
    pub envelope: TransactionEnvelope,
    pub required_signers: Vec<SignerRef>,
    pub threshold: u32,
}

impl SignatureRequest {
    pub fn new(
        source_account: &str,
        envelope: TransactionEnvelope,
        required_signers: Vec<SignerRef>,
        threshold: u32,
    ) -> Self {
        Self {
            id: envelope.hash(),
            source_account: normalize_key(source_account),
            envelope,
            required_signers,
            threshold,
        }
    }

    /// Whether `public_key` is one of the required signers
    pub fn requires(&self, public_key: &str) -> bool {
        let public_key = normalize_key(public_key);
        self.required_signers
            .iter()
            .any(|signer| normalize_key(&signer.public_key) == public_key)
    }

    /// Required signers with a verified signature on the envelope
    pub fn collected_signatures(&self) -> std::result::Result<BTreeSet<String>, SignatureError> {
        collect_signatures(&self.envelope, &self.required_signers)
    }

    /// Total weight of required signers with a verified signature
    pub fn signed_weight(&self) -> std::result::Result<u64, SignatureError> {
        Ok(signed_weight(&self.required_signers, &self.collected_signatures()?))
    }

    pub fn is_ready(&self) -> std::result::Result<bool, SignatureError> {
        Ok(self.signed_weight()? >= u64::from(self.threshold))
    }

    pub fn status(&self) -> std::result::Result<RequestStatus, SignatureError> {
        let collected = self.collected_signatures()?;
        let signed_weight = signed_weight(&self.required_signers, &collected);
        Ok(RequestStatus {
            signed_weight,
            threshold: self.threshold,
            ready: signed_weight >= u64::from(self.threshold),
            collected,
        })
    }

    /// Attach a signature received from a co-signer
    ///
    /// Exact duplicates are dropped. The signature is not checked here; it
    /// only counts once it verifies.
    pub fn add_signature(&mut self, signature: DecoratedSignature) -> bool {
        if self.envelope.signatures.contains(&signature) {
            return false;
        }
        self.envelope.signatures.push(signature);
        true
    }
}

/// Signing progress of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestStatus {
    pub signed_weight: u64,
    pub threshold: u32,
    pub ready: bool,
    pub collected: BTreeSet<String>,
}

/// A request that could not be evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRequest {
    pub request_id: String,
    pub error: SignatureError,
}

/// Requests relevant to one wallet account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// The account's key is required and has not signed yet
    pub to_cosign: Vec<SignatureRequest>,
    /// The account's key has signed; other signatures are still outstanding
    pub awaiting_others: Vec<SignatureRequest>,
    /// Relevant requests whose threshold is met, from either list above
    pub ready: Vec<SignatureRequest>,
    /// Relevant requests with signatures that failed verification
    pub errors: Vec<InvalidRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct SignatureCoordinator {
    requests: Vec<SignatureRequest>,
}

impl SignatureCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a request, keyed by transaction hash
    pub fn upsert(&mut self, request: SignatureRequest) {
        match self.requests.iter_mut().find(|existing| existing.id == request.id) {
            Some(existing) => *existing = request,
            None => {
                log::info!(
                    "Tracking signature request {} for {} (threshold {})",
                    request.id,
                    request.source_account,
                    request.threshold
                );
                self.requests.push(request);
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<SignatureRequest> {
        let index = self.requests.iter().position(|request| request.id == id)?;
        Some(self.requests.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&SignatureRequest> {
        self.requests.iter().find(|request| request.id == id)
    }

    pub fn requests(&self) -> &[SignatureRequest] {
        &self.requests
    }

    /// Record a signature from a co-signer and report the new status
    ///
    /// The signature is verified before it is attached. One that carries a
    /// required signer's hint but does not verify is rejected and leaves the
    /// request untouched. Signatures from keys that are not required signers
    /// are dropped.
    pub fn observe_signature(&mut self, id: &str, signature: DecoratedSignature) -> Result<RequestStatus> {
        let request = self
            .requests
            .iter_mut()
            .find(|request| request.id == id)
            .ok_or_else(|| LedgerSyncError::RequestNotFound(id.to_string()))?;

        let signers = match check_signature(&request.envelope, &request.required_signers, &signature) {
            Ok(signers) => signers,
            Err(error) => {
                log::warn!("⚠️  Rejected signature for request {}: {}", id, error);
                return Err(error.into());
            }
        };

        if signers.is_empty() {
            log::debug!("Signature for request {} matches no required signer, dropping", id);
        } else if !request.add_signature(signature) {
            log::debug!("Duplicate signature for request {}", id);
        }

        let status = request.status()?;
        if status.ready {
            log::info!(
                "✅ Signature request {} reached threshold ({}/{})",
                id,
                status.signed_weight,
                status.threshold
            );
        }
        Ok(status)
    }

    pub fn status(&self, id: &str) -> Result<RequestStatus> {
        let request = self
            .get(id)
            .ok_or_else(|| LedgerSyncError::RequestNotFound(id.to_string()))?;
        Ok(request.status()?)
    }

    /// Requests that can be submitted. Invalid ones are skipped.
    pub fn ready_requests(&self) -> Vec<&SignatureRequest> {
        self.requests
            .iter()
            .filter(|request| request.is_ready().unwrap_or(false))
            .collect()
    }

    /// Sort the requests `account` is a required signer of
    ///
    /// Only requests for the account's network are considered. The split
    /// between `to_cosign` and `awaiting_others` is decided by whether the
    /// account's key has a verified signature. Requests carrying a signature
    /// that fails verification appear only in `errors`.
    pub fn classify(&self, account: &WalletAccount) -> Classification {
        let public_key = account.public_key();
        let mut classification = Classification::default();

        for request in &self.requests {
            if request.envelope.network != account.network() || !request.requires(public_key) {
                continue;
            }

            let status = match request.status() {
                Ok(status) => status,
                Err(error) => {
                    log::warn!("⚠️  Signature request {} is invalid: {}", request.id, error);
                    classification.errors.push(InvalidRequest {
                        request_id: request.id.clone(),
                        error,
                    });
                    continue;
                }
            };

            if has_signed(&request.envelope, public_key) {
                classification.awaiting_others.push(request.clone());
            } else {
                classification.to_cosign.push(request.clone());
            }
            if status.ready {
                classification.ready.push(request.clone());
            }
        }

        log::debug!(
            "Classified requests for {}: {} to co-sign, {} awaiting others, {} ready, {} invalid",
            account.name(),
            classification.to_cosign.len(),
            classification.awaiting_others.len(),
            classification.ready.len(),
            classification.errors.len()
        );
        classification
    }
}
