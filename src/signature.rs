//! Transaction envelope signing and signature verification
//!
//! Signatures are BIP-340 Schnorr signatures over the envelope's signature
//! base. Each attached signature carries a 4-byte hint (the last four bytes
//! of the signer's x-only public key) so verifiers can find candidate
//! signers quickly. A hint alone proves nothing: a signer only counts once
//! its signature verifies against its key.

use secp256k1::{schnorr, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::error::SignatureError;
use crate::keys::{normalize_key, parse_public_key};
use crate::network::Network;
use crate::signers::SignerRef;

/// Envelope type tag mixed into the signature base of a transaction
pub const ENVELOPE_TYPE_TX: [u8; 4] = [0, 0, 0, 2];

/// Length of a signature hint
pub const HINT_LEN: usize = 4;

/// A signature together with the hint of the key that produced it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecoratedSignature {
    #[serde(with = "hex::serde")]
    pub hint: [u8; HINT_LEN],
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

/// Unsigned transaction bytes plus the signatures collected so far
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub network: Network,
    #[serde(with = "hex::serde")]
    pub transaction: Vec<u8>,
    #[serde(default)]
    pub signatures: Vec<DecoratedSignature>,
}

impl TransactionEnvelope {
    pub fn new(network: Network, transaction: Vec<u8>) -> Self {
        Self {
            network,
            transaction,
            signatures: Vec::new(),
        }
    }

    /// Decode an envelope received from a signature service
    pub fn from_json(json: &str) -> Result<Self, SignatureError> {
        serde_json::from_str(json).map_err(|e| SignatureError::MalformedEnvelope(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, SignatureError> {
        serde_json::to_string(self).map_err(|e| SignatureError::MalformedEnvelope(e.to_string()))
    }

    /// Digest every signer signs
    pub fn signature_base(&self) -> [u8; 32] {
        signature_base(self.network, &self.transaction)
    }

    /// Transaction hash, hex encoded
    ///
    /// Independent of attached signatures, so it identifies the transaction
    /// across signing rounds.
    pub fn hash(&self) -> String {
        hex::encode(self.signature_base())
    }
}

/// Compute the signature base of a transaction
///
/// `sha256(sha256(network passphrase) || envelope type || transaction bytes)`.
/// Binding the network id means a signature for one network never verifies
/// on the other.
pub fn signature_base(network: Network, transaction: &[u8]) -> [u8; 32] {
    let network_id = Sha256::digest(network.passphrase().as_bytes());

    let mut hasher = Sha256::new();
    hasher.update(network_id);
    hasher.update(ENVELOPE_TYPE_TX);
    hasher.update(transaction);
    hasher.finalize().into()
}

/// Signature hint for a public key: its last four bytes
pub fn signature_hint(public_key: &XOnlyPublicKey) -> [u8; HINT_LEN] {
    let bytes = public_key.serialize();
    let mut hint = [0u8; HINT_LEN];
    hint.copy_from_slice(&bytes[bytes.len() - HINT_LEN..]);
    hint
}

/// Sign an envelope and attach the signature
///
/// # Arguments
/// * `envelope` - Envelope to sign; the new signature is appended to it
/// * `secret_key` - The signer's secret key
///
/// # Returns
/// The attached signature, e.g. for forwarding to a signature service
///
/// # Example
/// ```ignore
/// let signature = sign_envelope(&mut envelope, &secret_key);
/// ```
pub fn sign_envelope(envelope: &mut TransactionEnvelope, secret_key: &SecretKey) -> DecoratedSignature {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    let (public_key, _parity) = keypair.x_only_public_key();

    let message = Message::from_digest(envelope.signature_base());
    let signature = secp.sign_schnorr_no_aux_rand(&message, &keypair);
    let bytes: &[u8; 64] = signature.as_ref();

    let decorated = DecoratedSignature {
        hint: signature_hint(&public_key),
        signature: bytes.to_vec(),
    };
    envelope.signatures.push(decorated.clone());
    decorated
}

/// Verify one signature against a key and signature base
///
/// Returns `Ok(false)` for a well-formed signature that does not verify and
/// `Err` if the bytes are not a signature at all.
pub fn verify_signature(
    public_key: &XOnlyPublicKey,
    base: &[u8; 32],
    signature: &[u8],
) -> Result<bool, secp256k1::Error> {
    let signature = schnorr::Signature::from_slice(signature)?;
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*base);
    Ok(secp.verify_schnorr(&signature, &message, public_key).is_ok())
}

/// Whether `public_key` has a verified signature on the envelope
///
/// Malformed keys and signatures count as "not signed".
pub fn has_signed(envelope: &TransactionEnvelope, public_key: &str) -> bool {
    let Some(key) = parse_public_key(&normalize_key(public_key)) else {
        return false;
    };
    let hint = signature_hint(&key);
    let base = envelope.signature_base();

    envelope
        .signatures
        .iter()
        .filter(|decorated| decorated.hint == hint)
        .any(|decorated| verify_signature(&key, &base, &decorated.signature).unwrap_or(false))
}

/// A required signer decoded once per verification pass
struct Candidate {
    encoded: String,
    key: XOnlyPublicKey,
    hint: [u8; HINT_LEN],
}

fn candidates(required: &[SignerRef]) -> Result<Vec<Candidate>, SignatureError> {
    required
        .iter()
        .map(|signer| {
            let encoded = normalize_key(&signer.public_key);
            parse_public_key(&encoded)
                .map(|key| Candidate {
                    hint: signature_hint(&key),
                    key,
                    encoded: encoded.clone(),
                })
                .ok_or(SignatureError::InvalidPublicKey(encoded))
        })
        .collect()
}

/// Required signers `decorated` verifies against, empty if its hint matches none
fn verified_signers(
    candidates: &[Candidate],
    base: &[u8; 32],
    index: usize,
    decorated: &DecoratedSignature,
) -> Result<Vec<String>, SignatureError> {
    let matching: Vec<&Candidate> = candidates
        .iter()
        .filter(|candidate| candidate.hint == decorated.hint)
        .collect();
    let Some(first) = matching.first() else {
        return Ok(Vec::new());
    };

    let mut verified = Vec::new();
    for candidate in &matching {
        let valid = verify_signature(&candidate.key, base, &decorated.signature).map_err(|e| {
            SignatureError::MalformedSignature {
                index,
                reason: e.to_string(),
            }
        })?;
        if valid {
            verified.push(candidate.encoded.clone());
        }
    }

    if verified.is_empty() {
        log::warn!(
            "Signature {} matches the hint of {} but does not verify",
            index,
            first.encoded
        );
        return Err(SignatureError::HintWithoutValidSignature {
            public_key: first.encoded.clone(),
        });
    }
    Ok(verified)
}

/// Check a signature before it is attached to `envelope`
///
/// Returns the required signers it verifies against. The list is empty when
/// the hint matches no required signer. A hint that matches but does not
/// verify is an error, so the caller can reject the signature and keep the
/// envelope valid.
pub fn check_signature(
    envelope: &TransactionEnvelope,
    required: &[SignerRef],
    decorated: &DecoratedSignature,
) -> Result<Vec<String>, SignatureError> {
    let candidates = candidates(required)?;
    verified_signers(
        &candidates,
        &envelope.signature_base(),
        envelope.signatures.len(),
        decorated,
    )
}

/// Keys of `required` signers with a verified signature on the envelope
///
/// Signatures whose hint matches no required signer are ignored. A signature
/// whose hint matches a required signer but which verifies against none of
/// them is an error, as is any signature that cannot be decoded.
pub fn collect_signatures(
    envelope: &TransactionEnvelope,
    required: &[SignerRef],
) -> Result<BTreeSet<String>, SignatureError> {
    let candidates = candidates(required)?;
    let base = envelope.signature_base();
    let mut collected = BTreeSet::new();

    for (index, decorated) in envelope.signatures.iter().enumerate() {
        collected.extend(verified_signers(&candidates, &base, index, decorated)?);
    }

    Ok(collected)
}
