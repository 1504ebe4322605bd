use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::{Hash, PublicKey, Sig};
use crate::error::CoreError;
use crate::serialize::hash_of;
use crate::types::ledger::LedgerHeader;
use crate::types::view::View;

/// Identifies a vertex and the execution state it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BftHeader {
    pub view: View,
    pub vertex_id: Hash,
    pub ledger: LedgerHeader,
}

impl BftHeader {
    pub fn new(view: View, vertex_id: Hash, ledger: LedgerHeader) -> Self {
        BftHeader {
            view,
            vertex_id,
            ledger,
        }
    }
}

/// The header chain a vote attests to: proposed, its parent, and the
/// grandparent when the three views are consecutive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteData {
    pub proposed: BftHeader,
    pub parent: BftHeader,
    pub committed: Option<BftHeader>,
}

impl VoteData {
    pub fn hash(&self) -> Result<Hash, CoreError> {
        hash_of(self)
    }

    /// Digest a validator signs when voting for this data at `timestamp`
    pub fn signing_hash(&self, timestamp: u64) -> Result<Hash, CoreError> {
        hash_of(&("halyard/vote", self, timestamp))
    }
}

/// The predicate signed by a validator giving up on a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTimeout {
    pub epoch: u64,
    pub view: View,
}

impl VoteTimeout {
    pub fn new(epoch: u64, view: View) -> Self {
        VoteTimeout { epoch, view }
    }

    pub fn signing_hash(&self) -> Result<Hash, CoreError> {
        hash_of(&("halyard/timeout", self.epoch, self.view))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedSignature {
    pub timestamp: u64,
    pub signature: Sig,
}

/// Signatures collected toward a certificate, at most one per validator
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimestampedSignatures(pub BTreeMap<PublicKey, TimestampedSignature>);

impl TimestampedSignatures {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn signers(&self) -> impl Iterator<Item = &PublicKey> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PublicKey, &TimestampedSignature)> {
        self.0.iter()
    }
}

/// Proof that a quorum of weight voted for `vote_data.proposed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub vote_data: VoteData,
    pub signatures: TimestampedSignatures,
}

impl QuorumCertificate {
    pub fn new(vote_data: VoteData, signatures: TimestampedSignatures) -> Self {
        QuorumCertificate {
            vote_data,
            signatures,
        }
    }

    /// Self-certifying QC for an epoch's genesis vertex
    pub fn genesis(header: BftHeader) -> Self {
        QuorumCertificate {
            vote_data: VoteData {
                proposed: header.clone(),
                parent: header.clone(),
                committed: Some(header),
            },
            signatures: TimestampedSignatures::default(),
        }
    }

    pub fn view(&self) -> View {
        self.vote_data.proposed.view
    }

    pub fn epoch(&self) -> u64 {
        self.vote_data.proposed.ledger.epoch
    }

    pub fn proposed(&self) -> &BftHeader {
        &self.vote_data.proposed
    }

    pub fn parent(&self) -> &BftHeader {
        &self.vote_data.parent
    }

    pub fn committed(&self) -> Option<&BftHeader> {
        self.vote_data.committed.as_ref()
    }

    /// Structural genesis form: unsigned and certifying itself at view 0
    pub fn is_genesis(&self) -> bool {
        self.view().is_genesis()
            && self.signatures.is_empty()
            && self.vote_data.parent == self.vote_data.proposed
            && self.vote_data.committed.as_ref() == Some(&self.vote_data.proposed)
    }

    pub fn signers(&self) -> impl Iterator<Item = &PublicKey> {
        self.signatures.signers()
    }

    /// Median of the signers' vote timestamps
    pub fn timestamp(&self) -> Option<u64> {
        let mut stamps: Vec<u64> = self.signatures.0.values().map(|s| s.timestamp).collect();
        if stamps.is_empty() {
            return None;
        }
        stamps.sort_unstable();
        Some(stamps[stamps.len() / 2])
    }
}

/// Proof that a quorum of weight gave up on `view`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutCertificate {
    pub epoch: u64,
    pub view: View,
    pub signatures: TimestampedSignatures,
}

impl TimeoutCertificate {
    pub fn signing_hash(&self) -> Result<Hash, CoreError> {
        VoteTimeout::new(self.epoch, self.view).signing_hash()
    }

    pub fn signers(&self) -> impl Iterator<Item = &PublicKey> {
        self.signatures.signers()
    }
}

/// A node's view of the chain tip: highest QC, highest QC carrying a commit,
/// and the highest timeout certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighQc {
    highest_qc: QuorumCertificate,
    highest_committed_qc: QuorumCertificate,
    highest_tc: Option<TimeoutCertificate>,
}

impl HighQc {
    pub fn new(
        highest_qc: QuorumCertificate,
        highest_committed_qc: QuorumCertificate,
        highest_tc: Option<TimeoutCertificate>,
    ) -> Self {
        let highest_qc = if highest_committed_qc.view() > highest_qc.view() {
            highest_committed_qc.clone()
        } else {
            highest_qc
        };
        HighQc {
            highest_qc,
            highest_committed_qc,
            highest_tc,
        }
    }

    pub fn from_genesis(genesis_qc: QuorumCertificate) -> Self {
        HighQc {
            highest_qc: genesis_qc.clone(),
            highest_committed_qc: genesis_qc,
            highest_tc: None,
        }
    }

    pub fn highest_qc(&self) -> &QuorumCertificate {
        &self.highest_qc
    }

    pub fn highest_committed_qc(&self) -> &QuorumCertificate {
        &self.highest_committed_qc
    }

    pub fn highest_tc(&self) -> Option<&TimeoutCertificate> {
        self.highest_tc.as_ref()
    }

    /// Highest view proven either by a QC or a TC
    pub fn highest_view(&self) -> View {
        let qc_view = self.highest_qc.view();
        match &self.highest_tc {
            Some(tc) if tc.view > qc_view => tc.view,
            _ => qc_view,
        }
    }
}
