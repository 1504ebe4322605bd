use std::sync::Arc;

use halyard_core::{HashVerifier, HighQc, Proposal, PublicKey, ViewTimeout, Vote};

use crate::error::ConsensusError;
use crate::proposer_election::ProposerElection;
use crate::qc::{verify_high_qc, verify_qc, verify_tc};
use crate::validator_set::ValidatorSet;

/// Checks the signatures and structure of incoming consensus events before
/// they reach the event processor. Stateless apart from the epoch's
/// validator set and leader schedule.
pub struct Verifier {
    epoch: u64,
    validators: Arc<ValidatorSet>,
    election: Arc<ProposerElection>,
    hash_verifier: Arc<dyn HashVerifier>,
}

impl Verifier {
    pub fn new(
        epoch: u64,
        validators: Arc<ValidatorSet>,
        election: Arc<ProposerElection>,
        hash_verifier: Arc<dyn HashVerifier>,
    ) -> Self {
        Verifier {
            epoch,
            validators,
            election,
            hash_verifier,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn check_epoch(&self, epoch: u64) -> Result<(), ConsensusError> {
        if epoch != self.epoch {
            return Err(ConsensusError::InvalidMessage(format!(
                "message for epoch {}, verifying epoch {}",
                epoch, self.epoch
            )));
        }
        Ok(())
    }

    fn check_member(&self, author: &PublicKey) -> Result<(), ConsensusError> {
        if !self.validators.contains(author) {
            return Err(ConsensusError::UnknownAuthor(*author));
        }
        Ok(())
    }

    pub fn verify_proposal(&self, proposal: &Proposal) -> Result<(), ConsensusError> {
        let vertex = &proposal.vertex;
        self.check_epoch(vertex.epoch)?;

        let author = proposal
            .author()
            .ok_or_else(|| ConsensusError::InvalidVertex("proposal has no proposer".to_string()))?;
        self.check_member(&author)?;

        let expected = self.election.leader(vertex.view);
        if author != expected {
            return Err(ConsensusError::UnexpectedProposer {
                view: vertex.view,
                expected,
                got: author,
            });
        }

        let id = vertex.hash()?;
        if !self.hash_verifier.verify_hash(&author, &id, &proposal.signature) {
            return Err(ConsensusError::InvalidSignature(author));
        }

        let qc = vertex
            .qc
            .as_ref()
            .ok_or_else(|| ConsensusError::InvalidVertex("proposal has no parent QC".to_string()))?;
        if qc.epoch() != self.epoch {
            return Err(ConsensusError::InvalidQc(format!(
                "parent QC from epoch {}",
                qc.epoch()
            )));
        }
        if vertex.view <= qc.view() {
            return Err(ConsensusError::InvalidVertex(format!(
                "view {} does not advance past parent view {}",
                vertex.view,
                qc.view()
            )));
        }

        // Skipping views needs a TC for the view just before this one
        if qc.view().next() != vertex.view {
            let tc = vertex.timeout_certificate.as_ref().ok_or_else(|| {
                ConsensusError::InvalidVertex(format!(
                    "view {} skips from parent view {} without a timeout certificate",
                    vertex.view,
                    qc.view()
                ))
            })?;
            if tc.epoch != self.epoch || tc.view.next() != vertex.view {
                return Err(ConsensusError::InvalidTc(format!(
                    "TC for epoch {} view {} does not justify view {}",
                    tc.epoch, tc.view, vertex.view
                )));
            }
            verify_tc(tc, &self.validators, self.hash_verifier.as_ref())?;
        }

        verify_qc(qc, &self.validators, self.hash_verifier.as_ref())?;

        let committed_qc = &proposal.highest_committed_qc;
        if committed_qc.committed().is_none() {
            return Err(ConsensusError::InvalidQc(
                "highest committed QC commits nothing".to_string(),
            ));
        }
        if committed_qc != qc {
            verify_qc(committed_qc, &self.validators, self.hash_verifier.as_ref())?;
        }
        if let Some(tc) = &proposal.highest_tc {
            verify_tc(tc, &self.validators, self.hash_verifier.as_ref())?;
        }
        Ok(())
    }

    pub fn verify_vote(&self, vote: &Vote) -> Result<(), ConsensusError> {
        self.check_epoch(vote.epoch())?;
        self.check_member(&vote.author)?;

        let digest = vote.vote_data.signing_hash(vote.timestamp)?;
        if !self
            .hash_verifier
            .verify_hash(&vote.author, &digest, &vote.signature)
        {
            return Err(ConsensusError::InvalidSignature(vote.author));
        }

        if let Some(timeout_signature) = &vote.timeout_signature {
            let digest = vote.vote_timeout().signing_hash()?;
            if !self
                .hash_verifier
                .verify_hash(&vote.author, &digest, timeout_signature)
            {
                return Err(ConsensusError::InvalidSignature(vote.author));
            }
        }

        self.verify_high_qc(&vote.high_qc)
    }

    pub fn verify_view_timeout(&self, timeout: &ViewTimeout) -> Result<(), ConsensusError> {
        self.check_epoch(timeout.epoch)?;
        self.check_member(&timeout.author)?;

        let digest = timeout.vote_timeout().signing_hash()?;
        if !self
            .hash_verifier
            .verify_hash(&timeout.author, &digest, &timeout.signature)
        {
            return Err(ConsensusError::InvalidSignature(timeout.author));
        }

        self.verify_high_qc(&timeout.high_qc)
    }

    pub fn verify_high_qc(&self, high_qc: &HighQc) -> Result<(), ConsensusError> {
        if high_qc.highest_qc().epoch() != self.epoch {
            return Err(ConsensusError::InvalidQc(format!(
                "high QC from epoch {}",
                high_qc.highest_qc().epoch()
            )));
        }
        verify_high_qc(high_qc, &self.validators, self.hash_verifier.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety_rules::SafetyRules;
    use crate::test_utils::{extend, genesis_qc, genesis_store, make_vertex, TestCommittee};
    use halyard_core::{
        Ed25519Verifier, HashSigner, KeyPair, TimeoutCertificate, TimestampedSignature,
        TimestampedSignatures, View, VoteTimeout,
    };
    use halyard_storage::{ConsensusStore, MemoryStorage};
    use std::collections::BTreeMap;

    fn verifier(committee: &TestCommittee) -> (Verifier, Arc<ProposerElection>) {
        let election = Arc::new(ProposerElection::new(&committee.set));
        let verifier = Verifier::new(
            0,
            committee.set.clone(),
            election.clone(),
            Arc::new(Ed25519Verifier),
        );
        (verifier, election)
    }

    fn safety_for(kp: &KeyPair) -> SafetyRules {
        SafetyRules::new(
            Arc::new(kp.clone()),
            Box::new(ConsensusStore::new(MemoryStorage::new())),
            0,
        )
        .unwrap()
    }

    fn timeout_certificate(signers: &[KeyPair], view: u64) -> TimeoutCertificate {
        let digest = VoteTimeout::new(0, View(view)).signing_hash().unwrap();
        let signatures = signers
            .iter()
            .map(|kp| {
                (
                    kp.public,
                    TimestampedSignature {
                        timestamp: 0,
                        signature: kp.sign_hash(&digest),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        TimeoutCertificate {
            epoch: 0,
            view: View(view),
            signatures: TimestampedSignatures(signatures),
        }
    }

    fn signed_proposal(
        committee: &TestCommittee,
        election: &ProposerElection,
        view: u64,
        tc: Option<TimeoutCertificate>,
    ) -> Proposal {
        let leader = committee.key_of(&election.leader(View(view))).clone();
        let mut vertex = make_vertex(&genesis_qc(0), view, leader.public, b"cmd").into_vertex();
        vertex.timeout_certificate = tc;
        safety_for(&leader)
            .sign_proposal(vertex, genesis_qc(0), None)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_leader_proposal_accepted() {
        let committee = TestCommittee::new(4);
        let (verifier, election) = verifier(&committee);
        let proposal = signed_proposal(&committee, &election, 1, None);
        verifier.verify_proposal(&proposal).unwrap();
    }

    #[test]
    fn test_proposal_from_non_leader_rejected() {
        let committee = TestCommittee::new(4);
        let (verifier, election) = verifier(&committee);
        let leader = election.leader(View(1));
        let other = committee.keys.iter().find(|k| k.public != leader).unwrap();

        let vertex = make_vertex(&genesis_qc(0), 1, other.public, b"cmd").into_vertex();
        let proposal = safety_for(other)
            .sign_proposal(vertex, genesis_qc(0), None)
            .unwrap()
            .unwrap();
        assert!(matches!(
            verifier.verify_proposal(&proposal),
            Err(ConsensusError::UnexpectedProposer { .. })
        ));
    }

    #[test]
    fn test_tampered_proposal_rejected() {
        let committee = TestCommittee::new(4);
        let (verifier, election) = verifier(&committee);
        let mut proposal = signed_proposal(&committee, &election, 1, None);
        proposal.vertex.commands.clear();
        assert!(matches!(
            verifier.verify_proposal(&proposal),
            Err(ConsensusError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_view_skip_requires_tc() {
        let committee = TestCommittee::new(4);
        let (verifier, election) = verifier(&committee);

        let bare = signed_proposal(&committee, &election, 3, None);
        assert!(matches!(
            verifier.verify_proposal(&bare),
            Err(ConsensusError::InvalidVertex(_))
        ));

        let stale_tc = signed_proposal(
            &committee,
            &election,
            3,
            Some(timeout_certificate(&committee.keys[..3], 1)),
        );
        assert!(matches!(
            verifier.verify_proposal(&stale_tc),
            Err(ConsensusError::InvalidTc(_))
        ));

        let weak_tc = signed_proposal(
            &committee,
            &election,
            3,
            Some(timeout_certificate(&committee.keys[..2], 2)),
        );
        assert!(matches!(
            verifier.verify_proposal(&weak_tc),
            Err(ConsensusError::InsufficientWeight { have: 2, need: 3 })
        ));

        let justified = signed_proposal(
            &committee,
            &election,
            3,
            Some(timeout_certificate(&committee.keys[..3], 2)),
        );
        verifier.verify_proposal(&justified).unwrap();
    }

    #[test]
    fn test_vote_and_timeout_signatures_checked() {
        let committee = TestCommittee::new(4);
        let (verifier, _) = verifier(&committee);
        let mut store = genesis_store(None);
        let vertex = make_vertex(&genesis_qc(0), 1, committee.keys[0].public, b"cmd");
        let header = store.insert_vertex(vertex.clone()).unwrap();

        let voter = &committee.keys[2];
        let mut safety = safety_for(voter);
        let vote = safety
            .vote_for(&vertex, header, 1_000, store.high_qc())
            .unwrap()
            .unwrap();
        verifier.verify_vote(&vote).unwrap();

        let timed_out = safety.timeout_vote(&vote).unwrap();
        verifier.verify_vote(&timed_out).unwrap();

        let mut forged = timed_out.clone();
        forged.timeout_signature = Some(committee.keys[1].sign_hash(
            &forged.vote_timeout().signing_hash().unwrap(),
        ));
        assert!(matches!(
            verifier.verify_vote(&forged),
            Err(ConsensusError::InvalidSignature(_))
        ));

        let outsider = KeyPair::from_seed(99);
        let mut foreign = vote.clone();
        foreign.author = outsider.public;
        assert!(matches!(
            verifier.verify_vote(&foreign),
            Err(ConsensusError::UnknownAuthor(_))
        ));
    }

    #[test]
    fn test_view_timeout_and_high_qc_checked() {
        let committee = TestCommittee::new(4);
        let (verifier, _) = verifier(&committee);
        let mut store = genesis_store(None);
        let (_, qc) = extend(&mut store, &committee, &genesis_qc(0), 1, b"a");
        store.add_qc(&qc).unwrap();

        let mut safety = safety_for(&committee.keys[1]);
        let signal = safety
            .timeout_for(0, View(2), store.high_qc(), 5)
            .unwrap()
            .unwrap();
        let timeout = match signal {
            crate::safety_rules::TimeoutSignal::ViewTimeout(t) => t,
            other => panic!("unexpected signal {:?}", other),
        };
        verifier.verify_view_timeout(&timeout).unwrap();

        let mut wrong_epoch = timeout.clone();
        wrong_epoch.epoch = 1;
        assert!(verifier.verify_view_timeout(&wrong_epoch).is_err());

        let weak = halyard_core::HighQc::new(
            crate::test_utils::qc_over(&committee.keys[..2], 4),
            genesis_qc(0),
            None,
        );
        assert!(matches!(
            verifier.verify_high_qc(&weak),
            Err(ConsensusError::InsufficientWeight { .. })
        ));
    }
}
