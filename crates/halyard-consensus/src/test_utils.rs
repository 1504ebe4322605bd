//! Fixtures shared by the unit tests of this crate

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use halyard_core::{
    BftHeader, ConsensusMessage, Hash, HashSigner, KeyPair, LedgerHeader, PublicKey,
    QuorumCertificate, TimestampedSignature, TimestampedSignatures, Validator, VerifiedVertex,
    Vertex, View, VoteData,
};

use crate::ledger::AccumulatorLedger;
use crate::net::ConsensusNetwork;
use crate::safety_rules::vote_data_for;
use crate::timer::{ScheduledEvent, Scheduler, TimeSupplier};
use crate::validator_set::ValidatorSet;
use crate::vertex_store::VertexStore;

pub struct TestCommittee {
    pub keys: Vec<KeyPair>,
    pub set: Arc<ValidatorSet>,
}

impl TestCommittee {
    pub fn new(n: u64) -> Self {
        let keys: Vec<_> = (0..n).map(KeyPair::from_seed).collect();
        let set = ValidatorSet::new(keys.iter().map(|k| Validator::new(k.public, 1))).unwrap();
        TestCommittee {
            keys,
            set: Arc::new(set),
        }
    }

    pub fn validators(&self) -> Vec<Validator> {
        self.set.validators()
    }

    pub fn key_of(&self, public: &PublicKey) -> &KeyPair {
        self.keys.iter().find(|k| k.public == *public).unwrap()
    }
}

pub fn genesis_ledger(epoch: u64) -> LedgerHeader {
    LedgerHeader::genesis(epoch, Hash::ZERO, 0, 0)
}

pub fn genesis_vertex(epoch: u64) -> VerifiedVertex {
    VerifiedVertex::new(Vertex::genesis(&genesis_ledger(epoch))).unwrap()
}

pub fn genesis_qc(epoch: u64) -> QuorumCertificate {
    let vertex = genesis_vertex(epoch);
    QuorumCertificate::genesis(BftHeader::new(View(0), vertex.id(), genesis_ledger(epoch)))
}

/// A signed QC over synthetic vote data at `view`
pub fn qc_over(signers: &[KeyPair], view: u64) -> QuorumCertificate {
    let ledger = genesis_ledger(0);
    let vote_data = VoteData {
        proposed: BftHeader::new(View(view), halyard_core::hash_blake3(b"proposed"), ledger.clone()),
        parent: BftHeader::new(View(view - 1), halyard_core::hash_blake3(b"parent"), ledger),
        committed: None,
    };
    sign_vote_data(signers, vote_data)
}

pub fn sign_vote_data(signers: &[KeyPair], vote_data: VoteData) -> QuorumCertificate {
    let mut signatures = BTreeMap::new();
    for (i, kp) in signers.iter().enumerate() {
        let timestamp = 1_000 + i as u64;
        signatures.insert(
            kp.public,
            TimestampedSignature {
                timestamp,
                signature: kp.sign_hash(&vote_data.signing_hash(timestamp).unwrap()),
            },
        );
    }
    QuorumCertificate::new(vote_data, TimestampedSignatures(signatures))
}

/// A vertex at `view` extending the vertex `parent_qc` certifies
pub fn make_vertex(parent_qc: &QuorumCertificate, view: u64, proposer: PublicKey, tag: &[u8]) -> VerifiedVertex {
    VerifiedVertex::new(Vertex {
        epoch: parent_qc.epoch(),
        view: View(view),
        qc: Some(parent_qc.clone()),
        commands: if tag.is_empty() {
            vec![]
        } else {
            vec![halyard_core::Command::new(tag.to_vec())]
        },
        proposer: Some(proposer),
        timeout_certificate: None,
    })
    .unwrap()
}

/// QC for a vertex already inserted with header `proposed`
pub fn certify(signers: &[KeyPair], vertex: &VerifiedVertex, proposed: BftHeader) -> QuorumCertificate {
    sign_vote_data(signers, vote_data_for(vertex, proposed).unwrap())
}

pub fn genesis_store(epoch_max_view: Option<View>) -> VertexStore {
    let ledger = AccumulatorLedger::new(genesis_ledger(0), TestCommittee::new(4).validators(), epoch_max_view);
    VertexStore::create(
        genesis_vertex(0),
        halyard_core::HighQc::from_genesis(genesis_qc(0)),
        vec![],
        Box::new(ledger),
    )
    .unwrap()
}

/// Insert a vertex at `view` on the vertex `parent_qc` certifies and return
/// it with a quorum QC over it
pub fn extend(
    store: &mut VertexStore,
    committee: &TestCommittee,
    parent_qc: &QuorumCertificate,
    view: u64,
    tag: &[u8],
) -> (VerifiedVertex, QuorumCertificate) {
    let vertex = make_vertex(parent_qc, view, committee.keys[0].public, tag);
    let header = store.insert_vertex(vertex.clone()).unwrap();
    let qc = certify(&committee.keys[..3], &vertex, header);
    (vertex, qc)
}

#[derive(Default)]
pub struct RecordingNetwork {
    sent: Mutex<Vec<(PublicKey, ConsensusMessage)>>,
}

impl RecordingNetwork {
    pub fn take(&self) -> Vec<(PublicKey, ConsensusMessage)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl ConsensusNetwork for RecordingNetwork {
    fn send(&self, to: PublicKey, message: ConsensusMessage) {
        self.sent.lock().unwrap().push((to, message));
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<(ScheduledEvent, Duration)>>,
}

impl RecordingScheduler {
    pub fn take(&self) -> Vec<(ScheduledEvent, Duration)> {
        std::mem::take(&mut *self.scheduled.lock().unwrap())
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&self, event: ScheduledEvent, delay: Duration) {
        self.scheduled.lock().unwrap().push((event, delay));
    }
}

#[derive(Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn advance(&self, millis: u64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSupplier for ManualClock {
    fn now_millis(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
