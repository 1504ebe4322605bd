use serde::{Deserialize, Serialize};

use crate::crypto::{Hash, PublicKey};
use crate::types::view::View;

/// A validator identity and its voting weight for one epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Validator {
    pub key: PublicKey,
    pub weight: u64,
}

impl Validator {
    pub fn new(key: PublicKey, weight: u64) -> Self {
        Validator { key, weight }
    }
}

/// Summary of execution state after applying a vertex, as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    pub epoch: u64,
    /// View of the vertex that produced this state
    pub view: View,
    /// Number of commands applied since genesis
    pub state_version: u64,
    /// Running digest over all applied command batches
    pub accumulator: Hash,
    /// Milliseconds since the unix epoch
    pub timestamp: u64,
    /// Present only on the header that closes an epoch
    pub next_validators: Option<Vec<Validator>>,
}

impl LedgerHeader {
    /// Header of an epoch's genesis vertex
    pub fn genesis(epoch: u64, accumulator: Hash, state_version: u64, timestamp: u64) -> Self {
        LedgerHeader {
            epoch,
            view: View::genesis(),
            state_version,
            accumulator,
            timestamp,
            next_validators: None,
        }
    }

    pub fn is_end_of_epoch(&self) -> bool {
        self.next_validators.is_some()
    }

    /// Genesis header for the epoch that follows this one
    pub fn next_epoch_genesis(&self) -> Option<LedgerHeader> {
        self.next_validators.as_ref()?;
        Some(LedgerHeader::genesis(
            self.epoch + 1,
            self.accumulator,
            self.state_version,
            self.timestamp,
        ))
    }
}
