//! Deterministic multi-validator harness: every node runs its own
//! `EpochManager` and all traffic goes through one shared queue, so a test
//! decides exactly when messages and timers are delivered.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use halyard_consensus::{
    AccumulatorLedger, BftConfig, BftEventSink, CommandSource, CommittedUpdate, ConsensusContext,
    ConsensusNetwork, EpochManager, NodeEvent, ScheduledEvent, Scheduler, TimeSupplier,
    ValidatorSet,
};
use halyard_core::{
    Command, ConsensusMessage, Ed25519Verifier, Hash, KeyPair, LedgerHeader, PublicKey,
    Validator, View,
};
use halyard_storage::{ConsensusStore, MemoryStorage};

pub struct Envelope {
    pub from: PublicKey,
    pub to: PublicKey,
    pub message: ConsensusMessage,
}

type Outbox = Arc<Mutex<VecDeque<Envelope>>>;
type Timers = Arc<Mutex<Vec<(usize, ScheduledEvent)>>>;

struct QueueNetwork {
    me: PublicKey,
    outbox: Outbox,
}

impl ConsensusNetwork for QueueNetwork {
    fn send(&self, to: PublicKey, message: ConsensusMessage) {
        self.outbox.lock().unwrap().push_back(Envelope {
            from: self.me,
            to,
            message,
        });
    }
}

struct QueueScheduler {
    node: usize,
    timers: Timers,
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, event: ScheduledEvent, _delay: Duration) {
        self.timers.lock().unwrap().push((self.node, event));
    }
}

/// Strictly increasing milliseconds, starting well past zero
#[derive(Default)]
struct TickClock(AtomicU64);

impl TimeSupplier for TickClock {
    fn now_millis(&self) -> u64 {
        1_000_000 + self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Hands out a fresh command per call, tagged with the proposing node
struct CountingCommands {
    node: usize,
    next: AtomicU64,
}

impl CommandSource for CountingCommands {
    fn next_commands(&self, max: usize, exclude: &HashSet<Hash>) -> Vec<Command> {
        if max == 0 {
            return Vec::new();
        }
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let command = Command::new(format!("node-{}-cmd-{}", self.node, n).into_bytes());
        if exclude.contains(&command.hash()) {
            return Vec::new();
        }
        vec![command]
    }
}

/// What one node reported: commits keyed by (epoch, view) plus epoch changes
#[derive(Default)]
pub struct NodeLog {
    pub commits: Mutex<Vec<(u64, View, Hash, Option<Hash>)>>,
    pub epochs: Mutex<Vec<u64>>,
}

impl NodeLog {
    pub fn commit_count(&self) -> usize {
        self.commits.lock().unwrap().len()
    }

    pub fn commits_in_epoch(&self, epoch: u64) -> usize {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, ..)| *e == epoch)
            .count()
    }
}

impl BftEventSink for NodeLog {
    fn on_committed(&self, update: &CommittedUpdate) {
        let mut commits = self.commits.lock().unwrap();
        for committed in &update.vertices {
            commits.push((
                committed.vertex.epoch(),
                committed.vertex.view(),
                committed.vertex.id(),
                committed.vertex.parent_id(),
            ));
        }
    }

    fn on_epoch_changed(&self, epoch: u64, _validators: &ValidatorSet) {
        self.epochs.lock().unwrap().push(epoch);
    }
}

pub struct Committee {
    pub keys: Vec<KeyPair>,
    pub nodes: Vec<EpochManager>,
    pub logs: Vec<Arc<NodeLog>>,
    pub down: HashSet<usize>,
    outbox: Outbox,
    timers: Timers,
    index: HashMap<PublicKey, usize>,
}

pub fn genesis_header() -> LedgerHeader {
    LedgerHeader::genesis(0, Hash::ZERO, 0, 0)
}

impl Committee {
    /// `n` equally weighted validators, not yet started
    pub fn new(n: usize, epoch_max_view: Option<View>) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_test_writer()
            .try_init();

        let keys: Vec<KeyPair> = (0..n as u64).map(|seed| KeyPair::from_seed(100 + seed)).collect();
        let validators: Vec<Validator> = keys.iter().map(|k| Validator::new(k.public, 1)).collect();
        let outbox: Outbox = Arc::default();
        let timers: Timers = Arc::default();

        let mut nodes = Vec::with_capacity(n);
        let mut logs = Vec::with_capacity(n);
        for (i, kp) in keys.iter().enumerate() {
            let log = Arc::new(NodeLog::default());
            let ctx = ConsensusContext {
                signer: Arc::new(kp.clone()),
                hash_verifier: Arc::new(Ed25519Verifier),
                network: Arc::new(QueueNetwork {
                    me: kp.public,
                    outbox: outbox.clone(),
                }),
                scheduler: Arc::new(QueueScheduler {
                    node: i,
                    timers: timers.clone(),
                }),
                commands: Arc::new(CountingCommands {
                    node: i,
                    next: AtomicU64::new(0),
                }),
                sink: log.clone(),
                time: Arc::new(TickClock::default()),
            };
            let ledger =
                AccumulatorLedger::new(genesis_header(), validators.clone(), epoch_max_view);
            let manager = EpochManager::new(
                BftConfig::default(),
                ctx,
                Box::new(ConsensusStore::new(MemoryStorage::new())),
                Box::new(ConsensusStore::new(MemoryStorage::new())),
                Box::new(ledger),
                genesis_header(),
                validators.clone(),
            )
            .expect("node setup");
            nodes.push(manager);
            logs.push(log);
        }

        let index = keys.iter().enumerate().map(|(i, k)| (k.public, i)).collect();
        Committee {
            keys,
            nodes,
            logs,
            down: HashSet::new(),
            outbox,
            timers,
            index,
        }
    }

    pub fn start(&mut self) {
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if !self.down.contains(&i) {
                node.start().expect("start");
            }
        }
    }

    pub fn index_of(&self, key: &PublicKey) -> usize {
        self.index[key]
    }

    /// Index of the first validator chosen to lead `view` of epoch 0
    pub fn leader_index(&self, view: View) -> usize {
        let set = ValidatorSet::new(
            self.keys.iter().map(|k| Validator::new(k.public, 1)),
        )
        .expect("validator set");
        let election = halyard_consensus::ProposerElection::new(&set);
        self.index_of(&election.leader(view))
    }

    fn handle(&mut self, node: usize, event: NodeEvent) {
        if let Err(e) = self.nodes[node].handle(event) {
            assert!(!e.is_fatal(), "node {} hit a fatal error: {}", node, e);
        }
    }

    /// Deliver the oldest queued message. Traffic to or from a node that is
    /// down is lost. Returns false once the queue is empty.
    pub fn deliver_one(&mut self) -> bool {
        let next = self.outbox.lock().unwrap().pop_front();
        let Some(envelope) = next else {
            return false;
        };
        let from = self.index_of(&envelope.from);
        let to = self.index_of(&envelope.to);
        if !self.down.contains(&from) && !self.down.contains(&to) {
            self.handle(
                to,
                NodeEvent::Message {
                    from: envelope.from,
                    message: envelope.message,
                },
            );
        }
        true
    }

    /// Fire every pending timer of the live nodes. Timers of nodes that are
    /// down stay pending until they come back.
    pub fn fire_timers(&mut self) {
        let pending = std::mem::take(&mut *self.timers.lock().unwrap());
        let (live, parked): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|(node, _)| !self.down.contains(node));
        self.timers.lock().unwrap().extend(parked);
        for (node, event) in live {
            self.handle(node, NodeEvent::Scheduled(event));
        }
    }

    /// Deliver messages, firing timers whenever the network goes quiet, until
    /// `done` holds or `max_steps` deliveries have been made
    pub fn run_until(&mut self, max_steps: usize, done: impl Fn(&Committee) -> bool) -> bool {
        for _ in 0..max_steps {
            if done(self) {
                return true;
            }
            if !self.deliver_one() {
                self.fire_timers();
            }
        }
        done(self)
    }

    pub fn epoch_of(&self, node: usize) -> u64 {
        self.nodes[node].epoch().expect("running epoch")
    }

    /// No two nodes committed different vertices at the same (epoch, view),
    /// every node committed in order, and within an epoch the union of all
    /// commits forms a single chain
    pub fn assert_consistent_commits(&self) {
        let mut seen: BTreeMap<(u64, View), (usize, Hash, Option<Hash>)> = BTreeMap::new();
        for (node, log) in self.logs.iter().enumerate() {
            let commits = log.commits.lock().unwrap();
            for window in commits.windows(2) {
                assert!(
                    (window[0].0, window[0].1) < (window[1].0, window[1].1),
                    "node {} committed out of order",
                    node
                );
            }
            for &(epoch, view, id, parent) in commits.iter() {
                match seen.get(&(epoch, view)) {
                    Some((other, other_id, _)) => assert_eq!(
                        *other_id, id,
                        "nodes {} and {} committed different vertices at epoch {} view {}",
                        other, node, epoch, view
                    ),
                    None => {
                        seen.insert((epoch, view), (node, id, parent));
                    }
                }
            }
        }

        let chain: Vec<_> = seen.into_iter().collect();
        for window in chain.windows(2) {
            let ((prev_epoch, _), (_, prev_id, _)) = window[0];
            let ((epoch, view), (_, _, parent)) = window[1];
            if epoch == prev_epoch {
                assert_eq!(
                    parent,
                    Some(prev_id),
                    "vertex at epoch {} view {} does not extend the previous commit",
                    epoch,
                    view
                );
            }
        }
    }
}
