use std::sync::Arc;

use halyard_core::{
    BftHeader, HashSigner, HighQc, Proposal, PublicKey, QuorumCertificate, SafetyState,
    TimeoutCertificate, VerifiedVertex, Vertex, View, ViewTimeout, Vote, VoteData, VoteTimeout,
};
use halyard_storage::SafetyStateStore;
use tracing::{debug, info, warn};

use crate::error::ConsensusError;

/// What a validator broadcasts when its view times out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutSignal {
    ViewTimeout(ViewTimeout),
    /// The vote already cast in the view, now carrying a timeout signature
    Vote(Vote),
}

/// Header chain a vote for `vertex` attests to. The grandparent is named
/// committed only when proposed, parent and grandparent sit in consecutive
/// views and none of them is a genesis vertex.
pub fn vote_data_for(vertex: &VerifiedVertex, proposed: BftHeader) -> Option<VoteData> {
    let qc = vertex.qc()?;
    let committed = (vertex.has_direct_parent()
        && vertex.parent_has_direct_parent()
        && !vertex.touches_genesis())
    .then(|| qc.parent().clone());

    Some(VoteData {
        proposed,
        parent: qc.proposed().clone(),
        committed,
    })
}

/// Gate on every signature the validator releases. State changes are
/// persisted before the signed message is returned.
pub struct SafetyRules {
    signer: Arc<dyn HashSigner>,
    state: SafetyState,
    store: Box<dyn SafetyStateStore>,
}

impl SafetyRules {
    pub fn new(
        signer: Arc<dyn HashSigner>,
        store: Box<dyn SafetyStateStore>,
        epoch: u64,
    ) -> Result<Self, ConsensusError> {
        let state = match store.load_safety_state()? {
            Some(state) => {
                info!(
                    "Loaded safety state: epoch {}, last voted view {}, locked view {}",
                    state.epoch, state.last_voted_view, state.locked_view
                );
                state
            }
            None => SafetyState::new(epoch),
        };

        let mut rules = SafetyRules {
            signer,
            state,
            store,
        };
        rules.reset_for_epoch(epoch)?;
        Ok(rules)
    }

    pub fn author(&self) -> PublicKey {
        self.signer.public_key()
    }

    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    /// Start from a clean record when entering a newer epoch
    pub fn reset_for_epoch(&mut self, epoch: u64) -> Result<(), ConsensusError> {
        if self.state.epoch < epoch {
            self.persist(SafetyState::new(epoch))?;
        }
        Ok(())
    }

    fn persist(&mut self, state: SafetyState) -> Result<(), ConsensusError> {
        self.store.save_safety_state(&state)?;
        self.state = state;
        Ok(())
    }

    pub fn sign_proposal(
        &mut self,
        vertex: Vertex,
        highest_committed_qc: QuorumCertificate,
        highest_tc: Option<TimeoutCertificate>,
    ) -> Result<Option<Proposal>, ConsensusError> {
        let Some(qc) = vertex.qc.as_ref() else {
            return Err(ConsensusError::InvalidVertex(
                "cannot propose a vertex without a parent QC".to_string(),
            ));
        };
        if qc.view() < self.state.locked_view {
            warn!(
                "Refusing to propose on QC at view {} below locked view {}",
                qc.view(),
                self.state.locked_view
            );
            return Ok(None);
        }

        let signature = self.signer.sign_hash(&vertex.hash()?);
        Ok(Some(Proposal {
            vertex,
            highest_committed_qc,
            signature,
            highest_tc,
        }))
    }

    /// Vote for `vertex`, whose execution produced `proposed`
    pub fn vote_for(
        &mut self,
        vertex: &VerifiedVertex,
        proposed: BftHeader,
        timestamp: u64,
        high_qc: HighQc,
    ) -> Result<Option<Vote>, ConsensusError> {
        if vertex.epoch() != self.state.epoch {
            warn!(
                "Refusing to vote in epoch {} while in epoch {}",
                vertex.epoch(),
                self.state.epoch
            );
            return Ok(None);
        }
        if vertex.view() <= self.state.last_voted_view {
            debug!(
                "Already signed in view {}, not voting for view {}",
                self.state.last_voted_view,
                vertex.view()
            );
            return Ok(None);
        }
        let Some(qc) = vertex.qc() else {
            return Ok(None);
        };
        if qc.view() < self.state.locked_view {
            warn!(
                "Refusing to vote for vertex {} whose parent view {} is below locked view {}",
                vertex.id().short(),
                qc.view(),
                self.state.locked_view
            );
            return Ok(None);
        }

        let Some(vote_data) = vote_data_for(vertex, proposed) else {
            return Ok(None);
        };
        let signature = self.signer.sign_hash(&vote_data.signing_hash(timestamp)?);
        let vote = Vote {
            author: self.signer.public_key(),
            vote_data,
            timestamp,
            signature,
            high_qc,
            timeout_signature: None,
        };

        let mut next = self.state.clone();
        next.last_voted_view = vertex.view();
        next.locked_view = next.locked_view.max(qc.parent().view);
        next.last_vote = Some(vote.clone());
        next.last_timeout = None;
        self.persist(next)?;

        Ok(Some(vote))
    }

    /// Attach a timeout signature to `vote`, which must be the last vote cast
    pub fn timeout_vote(&mut self, vote: &Vote) -> Result<Vote, ConsensusError> {
        if vote.is_timeout() {
            return Ok(vote.clone());
        }
        if self.state.last_vote.as_ref() != Some(vote) {
            return Err(ConsensusError::SafetyViolation(format!(
                "asked to time out a vote in view {} that is not the last vote cast",
                vote.view()
            )));
        }

        let mut timed_out = vote.clone();
        timed_out.timeout_signature = Some(self.signer.sign_hash(&vote.vote_timeout().signing_hash()?));

        let mut next = self.state.clone();
        next.last_vote = Some(timed_out.clone());
        self.persist(next)?;
        Ok(timed_out)
    }

    /// Produce the signal to broadcast on a local timeout of `view`. A view
    /// that was already signed in re-uses the earlier signature.
    pub fn timeout_for(
        &mut self,
        epoch: u64,
        view: View,
        high_qc: HighQc,
        timestamp: u64,
    ) -> Result<Option<TimeoutSignal>, ConsensusError> {
        if epoch != self.state.epoch || view < self.state.last_voted_view {
            return Ok(None);
        }

        if view == self.state.last_voted_view {
            if let Some(timeout) = self.state.last_timeout.as_ref().filter(|t| t.view == view) {
                return Ok(Some(TimeoutSignal::ViewTimeout(timeout.clone())));
            }
            if let Some(vote) = self.state.last_vote.clone().filter(|v| v.view() == view) {
                return Ok(Some(TimeoutSignal::Vote(self.timeout_vote(&vote)?)));
            }
        }

        let signature = self
            .signer
            .sign_hash(&VoteTimeout::new(epoch, view).signing_hash()?);
        let timeout = ViewTimeout {
            author: self.signer.public_key(),
            epoch,
            view,
            timestamp,
            high_qc,
            signature,
        };

        let mut next = self.state.clone();
        next.last_voted_view = view;
        next.last_timeout = Some(timeout.clone());
        self.persist(next)?;

        Ok(Some(TimeoutSignal::ViewTimeout(timeout)))
    }
}

impl std::fmt::Debug for SafetyRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyRules")
            .field("author", &self.signer.public_key())
            .field("state", &self.state)
            .finish()
    }
}
