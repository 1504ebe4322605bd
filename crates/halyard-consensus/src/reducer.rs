use std::sync::Arc;

use halyard_core::{
    ConsensusMessage, HighQc, Proposal, PublicKey, TimeoutCertificate, VerifiedVertex, View,
    ViewTimeout, Vote,
};
use tracing::{debug, trace, warn};

use crate::error::ConsensusError;
use crate::ledger::Ledger;
use crate::net::ConsensusNetwork;
use crate::pacemaker::Pacemaker;
use crate::pending::{PendingTimeouts, PendingVotes, VoteOutcome};
use crate::proposer_election::ProposerElection;
use crate::safety_rules::SafetyRules;
use crate::timer::TimeSupplier;
use crate::validator_set::ValidatorSet;
use crate::vertex_store::VertexStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReducerOutcome {
    Done,
    /// A QC was formed for a vertex this node does not hold
    SyncRequired { high_qc: HighQc, author: PublicKey },
}

/// Applies verified, synced consensus events to the local state: the
/// vertex store, the pacemaker, safety rules and vote aggregation.
pub struct BftEventReducer {
    self_key: PublicKey,
    vertex_store: VertexStore,
    pacemaker: Pacemaker,
    safety_rules: SafetyRules,
    pending_votes: PendingVotes,
    pending_timeouts: PendingTimeouts,
    election: Arc<ProposerElection>,
    network: Arc<dyn ConsensusNetwork>,
    time: Arc<dyn TimeSupplier>,
}

impl BftEventReducer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_key: PublicKey,
        vertex_store: VertexStore,
        pacemaker: Pacemaker,
        safety_rules: SafetyRules,
        validators: Arc<ValidatorSet>,
        election: Arc<ProposerElection>,
        network: Arc<dyn ConsensusNetwork>,
        time: Arc<dyn TimeSupplier>,
    ) -> Self {
        BftEventReducer {
            self_key,
            vertex_store,
            pacemaker,
            safety_rules,
            pending_votes: PendingVotes::new(Arc::clone(&validators)),
            pending_timeouts: PendingTimeouts::new(validators),
            election,
            network,
            time,
        }
    }

    pub fn start(&mut self) -> Result<(), ConsensusError> {
        self.pacemaker
            .start(&self.vertex_store, &mut self.safety_rules)
    }

    pub fn current_view(&self) -> View {
        self.pacemaker.current_view()
    }

    pub fn vertex_store(&self) -> &VertexStore {
        &self.vertex_store
    }

    pub fn vertex_store_mut(&mut self) -> &mut VertexStore {
        &mut self.vertex_store
    }

    pub fn safety_rules(&self) -> &SafetyRules {
        &self.safety_rules
    }

    /// Tear down at the end of an epoch, keeping what outlives it
    pub fn into_parts(self) -> (SafetyRules, Box<dyn Ledger>) {
        (self.safety_rules, self.vertex_store.into_ledger())
    }

    /// Re-check the store for a higher QC or TC and move the pacemaker
    pub fn process_high_qc(&mut self) -> Result<(), ConsensusError> {
        if self
            .pacemaker
            .process_high_qc(&self.vertex_store, &mut self.safety_rules)?
        {
            let floor = self.current_view().previous();
            self.pending_votes.prune(floor);
            self.pending_timeouts.prune(floor);
        }
        Ok(())
    }

    pub fn process_proposal(&mut self, proposal: &Proposal) -> Result<(), ConsensusError> {
        let view = proposal.view();
        if view != self.current_view() {
            trace!(
                "Ignoring proposal for view {} in view {}",
                view,
                self.current_view()
            );
            return Ok(());
        }

        let vertex = VerifiedVertex::new(proposal.vertex.clone())?;
        let header = match self.vertex_store.insert_vertex(vertex.clone()) {
            Ok(header) => header,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Dropping proposal for view {}: {}", view, e);
                return Ok(());
            }
        };

        let now = self.time.now_millis();
        let high_qc = self.vertex_store.high_qc();
        if let Some(vote) = self.safety_rules.vote_for(&vertex, header, now, high_qc)? {
            let next_leader = self.election.leader(view.next());
            debug!("Voting for vertex {} in view {}", vertex.id().short(), view);
            self.network.send(next_leader, ConsensusMessage::Vote(vote));
        }
        Ok(())
    }

    pub fn process_vote(&mut self, vote: &Vote) -> Result<ReducerOutcome, ConsensusError> {
        if let Some(signature) = vote.timeout_signature {
            if let Some(tc) = self.pending_timeouts.insert_timeout(
                vote.author,
                vote.vote_timeout(),
                vote.timestamp,
                signature,
            ) {
                self.process_tc(tc)?;
            }
        }

        // Timeout votes reach everyone; plain votes only count at the next leader
        let next_leader = self.election.leader(vote.view().next()) == self.self_key;
        if !next_leader && !vote.is_timeout() {
            return Ok(ReducerOutcome::Done);
        }

        match self.pending_votes.insert_vote(vote)? {
            VoteOutcome::QuorumReached(qc) => {
                if self.vertex_store.add_qc(&qc)? {
                    self.process_high_qc()?;
                    Ok(ReducerOutcome::Done)
                } else {
                    debug!(
                        "Formed QC for unknown vertex {} at view {}",
                        qc.proposed().vertex_id.short(),
                        qc.view()
                    );
                    let committed_qc = vote.high_qc.highest_committed_qc().clone();
                    Ok(ReducerOutcome::SyncRequired {
                        high_qc: HighQc::new(qc, committed_qc, None),
                        author: vote.author,
                    })
                }
            }
            VoteOutcome::Pending | VoteOutcome::Ignored => Ok(ReducerOutcome::Done),
        }
    }

    pub fn process_view_timeout(&mut self, timeout: &ViewTimeout) -> Result<(), ConsensusError> {
        if let Some(tc) = self.pending_timeouts.insert_timeout(
            timeout.author,
            timeout.vote_timeout(),
            timeout.timestamp,
            timeout.signature,
        ) {
            self.process_tc(tc)?;
        }
        Ok(())
    }

    fn process_tc(&mut self, tc: TimeoutCertificate) -> Result<(), ConsensusError> {
        debug!("Formed TC for view {}", tc.view);
        self.vertex_store.insert_timeout_certificate(tc);
        self.process_high_qc()
    }

    pub fn process_local_timeout(&mut self, view: View, count: u32) -> Result<(), ConsensusError> {
        self.pacemaker.process_local_timeout(
            view,
            count,
            &self.vertex_store,
            &mut self.safety_rules,
        )
    }
}
