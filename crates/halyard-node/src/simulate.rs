use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use halyard_consensus::{
    run_event_loop, AccumulatorLedger, BftConfig, BftEventSink, CommittedUpdate,
    ConsensusContext, ConsensusNetwork, EpochManager, NodeEvent, SystemTimeSupplier,
    TokioScheduler, ValidatorSet,
};
use halyard_core::{
    Command, ConsensusMessage, Ed25519Verifier, Hash, KeyPair, LedgerHeader, PublicKey,
    Validator, View,
};
use halyard_storage::{ConsensusStore, MemoryStorage};
use tokio::sync::mpsc;
use tracing::{info, trace};

use crate::pool::CommandPool;
use crate::status::StatusSink;

/// In-process transport between the simulated validators
struct ChannelNetwork {
    me: PublicKey,
    peers: HashMap<PublicKey, mpsc::UnboundedSender<NodeEvent>>,
}

impl ConsensusNetwork for ChannelNetwork {
    fn send(&self, to: PublicKey, message: ConsensusMessage) {
        let Some(tx) = self.peers.get(&to) else {
            return;
        };
        if tx.send(NodeEvent::Message { from: self.me, message }).is_err() {
            trace!("Validator {} stopped, dropping message", to);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRecord {
    pub epoch: u64,
    pub view: View,
    pub vertex: Hash,
}

/// Records every commit on top of the usual status bookkeeping
struct RecordingSink {
    status: StatusSink,
    commits: Arc<Mutex<Vec<CommitRecord>>>,
}

impl BftEventSink for RecordingSink {
    fn on_committed(&self, update: &CommittedUpdate) {
        self.status.on_committed(update);
        let mut commits = self.commits.lock().unwrap_or_else(PoisonError::into_inner);
        commits.extend(update.vertices.iter().map(|c| CommitRecord {
            epoch: c.vertex.epoch(),
            view: c.vertex.view(),
            vertex: c.vertex.id(),
        }));
    }

    fn on_view_changed(&self, epoch: u64, view: View, leader: PublicKey) {
        self.status.on_view_changed(epoch, view, leader);
    }

    fn on_epoch_changed(&self, epoch: u64, validators: &ValidatorSet) {
        info!("Simulated validator entered epoch {}", epoch);
        self.status.on_epoch_changed(epoch, validators);
    }
}

#[derive(Debug)]
pub struct SimulationReport {
    pub validators: Vec<PublicKey>,
    pub commits: Vec<Vec<CommitRecord>>,
}

impl SimulationReport {
    /// Number of (epoch, view) slots committed by at least one validator,
    /// or an error naming the first slot two validators disagree on
    pub fn check_agreement(&self) -> Result<usize> {
        let mut slots: HashMap<(u64, View), (usize, Hash)> = HashMap::new();
        for (node, commits) in self.commits.iter().enumerate() {
            for record in commits {
                let slot = (record.epoch, record.view);
                match slots.get(&slot) {
                    Some((other, vertex)) if *vertex != record.vertex => {
                        return Err(anyhow!(
                            "validators {} and {} committed different vertices at epoch {} view {}",
                            other,
                            node,
                            record.epoch,
                            record.view
                        ));
                    }
                    Some(_) => {}
                    None => {
                        slots.insert(slot, (node, record.vertex));
                    }
                }
            }
        }
        Ok(slots.len())
    }
}

/// Run `validators` equally weighted validators in this process for
/// `duration`, feeding every pool a command on each tick
pub async fn simulate(
    validators: usize,
    duration: Duration,
    epoch_max_view: Option<View>,
    config: BftConfig,
) -> Result<SimulationReport> {
    if validators == 0 {
        return Err(anyhow!("a committee needs at least one validator"));
    }
    let keys: Vec<KeyPair> = (0..validators as u64).map(KeyPair::from_seed).collect();
    let members: Vec<Validator> = keys.iter().map(|k| Validator::new(k.public, 1)).collect();
    let genesis = LedgerHeader::genesis(0, Hash::ZERO, 0, 0);

    let channels: Vec<_> = keys.iter().map(|_| mpsc::unbounded_channel()).collect();
    let peers: HashMap<_, _> = keys
        .iter()
        .zip(&channels)
        .map(|(k, (tx, _))| (k.public, tx.clone()))
        .collect();

    let mut pools = Vec::with_capacity(validators);
    let mut logs = Vec::with_capacity(validators);
    let mut handles = Vec::with_capacity(validators);
    for (kp, (tx, rx)) in keys.iter().zip(channels) {
        let pool = Arc::new(CommandPool::new(10_000));
        let commits = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            status: StatusSink::new(kp.public, validators, Arc::clone(&pool)),
            commits: Arc::clone(&commits),
        };
        let ctx = ConsensusContext {
            signer: Arc::new(kp.clone()),
            hash_verifier: Arc::new(Ed25519Verifier),
            network: Arc::new(ChannelNetwork {
                me: kp.public,
                peers: peers.clone(),
            }),
            scheduler: Arc::new(TokioScheduler::new(tx)),
            commands: pool.clone(),
            sink: Arc::new(sink),
            time: Arc::new(SystemTimeSupplier),
        };
        let manager = EpochManager::new(
            config.clone(),
            ctx,
            Box::new(ConsensusStore::new(MemoryStorage::new())),
            Box::new(ConsensusStore::new(MemoryStorage::new())),
            Box::new(AccumulatorLedger::new(genesis.clone(), members.clone(), epoch_max_view)),
            genesis.clone(),
            members.clone(),
        )?;
        pools.push(pool);
        logs.push(commits);
        handles.push(tokio::spawn(run_event_loop(manager, rx)));
    }
    drop(peers);

    info!("Simulating {} validators for {:?}", validators, duration);
    let deadline = tokio::time::Instant::now() + duration;
    let mut tick = tokio::time::interval(Duration::from_millis(50));
    let mut submitted = 0u64;
    while tokio::time::Instant::now() < deadline {
        tick.tick().await;
        let command = Command::new(format!("sim-command-{}", submitted).into_bytes());
        for pool in &pools {
            let _ = pool.add(command.clone());
        }
        submitted += 1;
        if let Some(finished) = handles.iter().position(|h| h.is_finished()) {
            return Err(anyhow!("validator {} stopped early", finished));
        }
    }

    for handle in &handles {
        handle.abort();
    }
    let commits = logs
        .iter()
        .map(|log| log.lock().unwrap_or_else(PoisonError::into_inner).clone())
        .collect();
    Ok(SimulationReport {
        validators: keys.iter().map(|k| k.public).collect(),
        commits,
    })
}
