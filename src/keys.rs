//! Key encoding helpers
//!
//! Public keys and account ids are 32-byte BIP-340 x-only keys written as
//! 64 hex characters. Secret keys use the same width.

use secp256k1::{Keypair, Secp256k1, SecretKey, XOnlyPublicKey};

/// Hex length of an encoded key
pub const KEY_HEX_LEN: usize = 64;

/// Format check for a public key or account id
///
/// Accepts exactly 64 hex digits. Does not check the key is on the curve.
pub fn is_valid_public_key(candidate: &str) -> bool {
    candidate.len() == KEY_HEX_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Format and range check for a secret key
pub fn is_valid_secret_key(candidate: &str) -> bool {
    is_valid_public_key(candidate)
        && hex::decode(candidate)
            .ok()
            .and_then(|bytes| SecretKey::from_slice(&bytes).ok())
            .is_some()
}

/// Canonical (lowercase) form used for comparisons and map keys
pub fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

/// Parse an encoded public key into a curve point
pub fn parse_public_key(key: &str) -> Option<XOnlyPublicKey> {
    if !is_valid_public_key(key) {
        return None;
    }
    let bytes = hex::decode(key).ok()?;
    XOnlyPublicKey::from_slice(&bytes).ok()
}

/// Encoded x-only public key for a secret key
pub fn public_key_hex(secret_key: &SecretKey) -> String {
    let secp = Secp256k1::signing_only();
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    let (xonly, _parity) = keypair.x_only_public_key();
    hex::encode(xonly.serialize())
}
