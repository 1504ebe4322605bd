use std::collections::BTreeMap;
use std::sync::Arc;

use halyard_core::{PublicKey, Sig, TimestampedSignature, TimestampedSignatures, Validator};
use tracing::trace;

use crate::error::ConsensusError;

/// The weighted validators of one epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    weights: BTreeMap<PublicKey, u64>,
    total: u64,
}

impl ValidatorSet {
    pub fn new(validators: impl IntoIterator<Item = Validator>) -> Result<Self, ConsensusError> {
        let mut weights = BTreeMap::new();
        let mut total: u64 = 0;

        for validator in validators {
            if weights.insert(validator.key, validator.weight).is_some() {
                return Err(ConsensusError::DuplicateValidator(validator.key));
            }
            total = total
                .checked_add(validator.weight)
                .ok_or(ConsensusError::WeightOverflow)?;
        }

        if weights.is_empty() {
            return Err(ConsensusError::EmptyValidatorSet);
        }
        if total == 0 {
            return Err(ConsensusError::ZeroTotalWeight);
        }

        Ok(ValidatorSet { weights, total })
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.weights.contains_key(key)
    }

    /// Weight of `key`, zero for non-members
    pub fn weight_of(&self, key: &PublicKey) -> u64 {
        self.weights.get(key).copied().unwrap_or(0)
    }

    pub fn total_weight(&self) -> u64 {
        self.total
    }

    /// Max adversarial weight tolerated
    pub fn faults(&self) -> u64 {
        (self.total - 1) / 3
    }

    /// Min weight of a valid quorum
    pub fn quorum_threshold(&self) -> u64 {
        self.total - self.faults()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Validators in key order
    pub fn validators(&self) -> Vec<Validator> {
        self.weights
            .iter()
            .map(|(key, weight)| Validator::new(*key, *weight))
            .collect()
    }

    pub fn keys(&self) -> Vec<PublicKey> {
        self.weights.keys().copied().collect()
    }
}

/// Signatures accumulated toward a quorum over one payload
#[derive(Debug, Clone)]
pub struct ValidationState {
    validators: Arc<ValidatorSet>,
    signatures: BTreeMap<PublicKey, TimestampedSignature>,
    weight: u64,
}

impl ValidationState {
    pub fn new(validators: Arc<ValidatorSet>) -> Self {
        ValidationState {
            validators,
            signatures: BTreeMap::new(),
            weight: 0,
        }
    }

    /// Record a signature; false if `key` is not a member or already signed
    pub fn add_signature(&mut self, key: PublicKey, timestamp: u64, signature: Sig) -> bool {
        if !self.validators.contains(&key) || self.signatures.contains_key(&key) {
            return false;
        }

        self.signatures.insert(
            key,
            TimestampedSignature {
                timestamp,
                signature,
            },
        );
        self.weight += self.validators.weight_of(&key);

        trace!(
            "Signature from {}, weight {}/{}",
            key,
            self.weight,
            self.validators.quorum_threshold()
        );
        true
    }

    /// Withdraw the signature of `key`; false if it never signed
    pub fn remove_signature(&mut self, key: &PublicKey) -> bool {
        if self.signatures.remove(key).is_none() {
            return false;
        }
        self.weight -= self.validators.weight_of(key);
        true
    }

    pub fn complete(&self) -> bool {
        self.weight >= self.validators.quorum_threshold()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn accumulated_weight(&self) -> u64 {
        self.weight
    }

    pub fn signatures(&self) -> TimestampedSignatures {
        TimestampedSignatures(self.signatures.clone())
    }

    pub fn validators(&self) -> &Arc<ValidatorSet> {
        &self.validators
    }
}
