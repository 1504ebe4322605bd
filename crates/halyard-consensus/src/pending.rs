use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use halyard_core::{
    Hash, PublicKey, QuorumCertificate, Sig, TimeoutCertificate, View, Vote, VoteData,
    VoteTimeout,
};
use tracing::{debug, warn};

use crate::error::ConsensusError;
use crate::validator_set::{ValidationState, ValidatorSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Counted, no quorum yet
    Pending,
    QuorumReached(QuorumCertificate),
    /// Duplicate, equivocating, or from a non-member
    Ignored,
}

/// Votes being aggregated by the next leader, grouped by the data they sign.
///
/// Only the latest vote of each validator is held, so there are never more
/// groups than validators.
#[derive(Debug)]
pub struct PendingVotes {
    validators: Arc<ValidatorSet>,
    by_data: HashMap<Hash, (VoteData, ValidationState)>,
    last_vote: HashMap<PublicKey, (View, Hash)>,
}

impl PendingVotes {
    pub fn new(validators: Arc<ValidatorSet>) -> Self {
        PendingVotes {
            validators,
            by_data: HashMap::new(),
            last_vote: HashMap::new(),
        }
    }

    pub fn insert_vote(&mut self, vote: &Vote) -> Result<VoteOutcome, ConsensusError> {
        if !self.validators.contains(&vote.author) {
            return Ok(VoteOutcome::Ignored);
        }
        let data_hash = vote.vote_data.hash()?;

        if let Some((view, previous)) = self.last_vote.get(&vote.author).copied() {
            if view == vote.view() {
                if previous != data_hash {
                    warn!(
                        "Validator {} voted twice in view {}, ignoring the second vote",
                        vote.author,
                        vote.view()
                    );
                }
                return Ok(VoteOutcome::Ignored);
            }
            if view > vote.view() {
                return Ok(VoteOutcome::Ignored);
            }
            self.withdraw(&vote.author, &previous);
        }
        self.last_vote.insert(vote.author, (vote.view(), data_hash));

        let (vote_data, state) = self.by_data.entry(data_hash).or_insert_with(|| {
            (
                vote.vote_data.clone(),
                ValidationState::new(Arc::clone(&self.validators)),
            )
        });

        if !state.add_signature(vote.author, vote.timestamp, vote.signature) {
            return Ok(VoteOutcome::Ignored);
        }
        if !state.complete() {
            return Ok(VoteOutcome::Pending);
        }

        let qc = QuorumCertificate::new(vote_data.clone(), state.signatures());
        self.by_data.remove(&data_hash);
        debug!(
            "Formed QC for vertex {} at view {}",
            qc.proposed().vertex_id.short(),
            qc.view()
        );
        Ok(VoteOutcome::QuorumReached(qc))
    }

    /// Remove an earlier vote's signature, and its group once nobody is left
    fn withdraw(&mut self, author: &PublicKey, data_hash: &Hash) {
        let Some((_, state)) = self.by_data.get_mut(data_hash) else {
            return;
        };
        if state.remove_signature(author) && state.is_empty() {
            self.by_data.remove(data_hash);
        }
    }

    /// Drop everything for views below `view`
    pub fn prune(&mut self, view: View) {
        self.by_data
            .retain(|_, (data, _)| data.proposed.view >= view);
        self.last_vote.retain(|_, (voted, _)| *voted >= view);
    }

    pub fn len(&self) -> usize {
        self.by_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_data.is_empty()
    }
}

/// Timeout signatures collected per (epoch, view), from view timeouts and
/// timeout-signed votes alike
#[derive(Debug)]
pub struct PendingTimeouts {
    validators: Arc<ValidatorSet>,
    by_view: BTreeMap<(u64, View), ValidationState>,
}

impl PendingTimeouts {
    pub fn new(validators: Arc<ValidatorSet>) -> Self {
        PendingTimeouts {
            validators,
            by_view: BTreeMap::new(),
        }
    }

    /// Returns the certificate when this signature completes the quorum
    pub fn insert_timeout(
        &mut self,
        author: PublicKey,
        timeout: VoteTimeout,
        timestamp: u64,
        signature: Sig,
    ) -> Option<TimeoutCertificate> {
        let state = self
            .by_view
            .entry((timeout.epoch, timeout.view))
            .or_insert_with(|| ValidationState::new(Arc::clone(&self.validators)));

        let was_complete = state.complete();
        if !state.add_signature(author, timestamp, signature) || was_complete || !state.complete() {
            return None;
        }

        Some(TimeoutCertificate {
            epoch: timeout.epoch,
            view: timeout.view,
            signatures: state.signatures(),
        })
    }

    pub fn prune(&mut self, view: View) {
        self.by_view.retain(|(_, v), _| *v >= view);
    }
}
