//! Weighted signer lists and threshold arithmetic

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::error::SignerEditError;
use crate::keys::{is_valid_public_key, normalize_key};

/// One key allowed to sign for an account, with its weight
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignerRef {
    pub public_key: String,
    pub weight: u32,
}

impl SignerRef {
    pub fn new(public_key: impl Into<String>, weight: u32) -> Self {
        Self {
            public_key: normalize_key(&public_key.into()),
            weight,
        }
    }
}

/// Sum of the weights of `required` signers whose key is in `collected`
///
/// Keys are compared case-insensitively on both sides. A key listed more
/// than once among `required` counts once, with its first weight. Keys in
/// `collected` that are not required signers contribute nothing.
pub fn signed_weight(required: &[SignerRef], collected: &BTreeSet<String>) -> u64 {
    let collected: HashSet<String> = collected.iter().map(|key| normalize_key(key)).collect();
    let mut counted = HashSet::new();
    required
        .iter()
        .map(|signer| (normalize_key(&signer.public_key), signer.weight))
        .filter(|(key, _)| collected.contains(key) && counted.insert(key.clone()))
        .map(|(_, weight)| u64::from(weight))
        .sum()
}

/// Whether the collected signatures meet `threshold`
pub fn threshold_reached(required: &[SignerRef], collected: &BTreeSet<String>, threshold: u32) -> bool {
    signed_weight(required, collected) >= u64::from(threshold)
}

/// Editable signer list of an account, validated on every change
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignerSet {
    signers: Vec<SignerRef>,
    threshold: u32,
}

impl SignerSet {
    /// A single-key account: the owner with weight 1, threshold 1
    pub fn single(public_key: &str) -> Result<Self, SignerEditError> {
        let mut set = Self::default();
        set.add_signer(public_key, "1")?;
        set.set_threshold(1)?;
        Ok(set)
    }

    pub fn signers(&self) -> &[SignerRef] {
        &self.signers
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn total_weight(&self) -> u32 {
        self.signers
            .iter()
            .fold(0u32, |acc, signer| acc.saturating_add(signer.weight))
    }

    /// Add a co-signer from form input
    ///
    /// `weight` is the raw text of the weight field.
    pub fn add_signer(&mut self, public_key: &str, weight: &str) -> Result<&SignerRef, SignerEditError> {
        let public_key = validate_public_key(public_key)?;
        let weight = parse_weight(weight)?;

        if self.position(&public_key).is_some() {
            return Err(SignerEditError::DuplicateSigner(public_key));
        }

        log::debug!("Adding signer {} with weight {}", public_key, weight);
        self.signers.push(SignerRef { public_key, weight });
        Ok(&self.signers[self.signers.len() - 1])
    }

    /// Change the weight of an existing signer
    pub fn edit_signer(&mut self, public_key: &str, weight: &str) -> Result<(), SignerEditError> {
        let public_key = normalize_key(public_key);
        let weight = parse_weight(weight)?;
        let index = self
            .position(&public_key)
            .ok_or_else(|| SignerEditError::SignerNotFound(public_key.clone()))?;

        let total_after = self.total_weight() - self.signers[index].weight + weight;
        self.check_reachable(self.threshold, total_after)?;

        self.signers[index].weight = weight;
        Ok(())
    }

    /// Remove a signer, refusing to make the threshold unreachable
    pub fn remove_signer(&mut self, public_key: &str) -> Result<SignerRef, SignerEditError> {
        let public_key = normalize_key(public_key);
        let index = self
            .position(&public_key)
            .ok_or_else(|| SignerEditError::SignerNotFound(public_key.clone()))?;

        let total_after = self.total_weight() - self.signers[index].weight;
        self.check_reachable(self.threshold, total_after)?;

        Ok(self.signers.remove(index))
    }

    pub fn set_threshold(&mut self, threshold: u32) -> Result<(), SignerEditError> {
        if threshold == 0 {
            return Err(SignerEditError::ZeroThreshold);
        }
        self.check_reachable(threshold, self.total_weight())?;
        self.threshold = threshold;
        Ok(())
    }

    fn position(&self, public_key: &str) -> Option<usize> {
        self.signers.iter().position(|signer| signer.public_key == public_key)
    }

    fn check_reachable(&self, threshold: u32, total_weight: u32) -> Result<(), SignerEditError> {
        if threshold > total_weight {
            return Err(SignerEditError::UnreachableThreshold {
                threshold,
                total_weight,
            });
        }
        Ok(())
    }
}

fn validate_public_key(public_key: &str) -> Result<String, SignerEditError> {
    let normalized = normalize_key(public_key);
    if !is_valid_public_key(&normalized) {
        return Err(SignerEditError::InvalidPublicKey(public_key.to_string()));
    }
    Ok(normalized)
}

fn parse_weight(weight: &str) -> Result<u32, SignerEditError> {
    let trimmed = weight.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SignerEditError::InvalidWeight(weight.to_string()));
    }
    match trimmed.parse::<u32>() {
        Ok(value) if value >= 1 => Ok(value),
        _ => Err(SignerEditError::InvalidWeight(weight.to_string())),
    }
}
