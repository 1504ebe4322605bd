use std::sync::{Arc, Mutex, PoisonError};

use halyard_consensus::{BftEventSink, CommittedUpdate, ValidatorSet};
use halyard_core::{PublicKey, View};
use serde::Serialize;
use tracing::info;

use crate::pool::CommandPool;

/// Snapshot served by `GET /status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub public_key: String,
    pub epoch: u64,
    pub view: u64,
    pub leader: Option<String>,
    pub validators: usize,
    pub committed_vertices: u64,
    pub committed_commands: u64,
    pub last_committed_view: u64,
    pub last_committed_vertex: Option<String>,
    pub state_version: u64,
    pub accumulator: Option<String>,
    pub pending_commands: usize,
}

/// Keeps the served status current and drains committed commands from the pool
pub struct StatusSink {
    status: Arc<Mutex<NodeStatus>>,
    pool: Arc<CommandPool>,
}

impl StatusSink {
    pub fn new(self_key: PublicKey, validators: usize, pool: Arc<CommandPool>) -> Self {
        let status = NodeStatus {
            public_key: self_key.to_hex(),
            validators,
            ..NodeStatus::default()
        };
        StatusSink {
            status: Arc::new(Mutex::new(status)),
            pool,
        }
    }

    pub fn status(&self) -> Arc<Mutex<NodeStatus>> {
        Arc::clone(&self.status)
    }

    /// Current status with the live pool size filled in
    pub fn snapshot(&self) -> NodeStatus {
        snapshot(&self.status, &self.pool)
    }

    fn update(&self, f: impl FnOnce(&mut NodeStatus)) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }
}

pub fn snapshot(status: &Mutex<NodeStatus>, pool: &CommandPool) -> NodeStatus {
    let mut current = status.lock().unwrap_or_else(PoisonError::into_inner).clone();
    current.pending_commands = pool.len();
    current
}

impl BftEventSink for StatusSink {
    fn on_committed(&self, update: &CommittedUpdate) {
        let Some(last) = update.vertices.last() else {
            return;
        };
        self.pool
            .remove_committed(update.vertices.iter().flat_map(|c| c.vertex.commands()));

        let commands: u64 = update
            .vertices
            .iter()
            .map(|c| c.vertex.commands().len() as u64)
            .sum();
        info!(
            "Committed {} vertices up to view {} ({} commands, state version {})",
            update.vertices.len(),
            last.vertex.view(),
            commands,
            last.ledger_header.state_version
        );

        self.update(|status| {
            status.committed_vertices += update.vertices.len() as u64;
            status.committed_commands += commands;
            status.last_committed_view = last.vertex.view().0;
            status.last_committed_vertex = Some(last.vertex.id().to_hex());
            status.state_version = last.ledger_header.state_version;
            status.accumulator = Some(last.ledger_header.accumulator.to_hex());
        });
    }

    fn on_view_changed(&self, epoch: u64, view: View, leader: PublicKey) {
        self.update(|status| {
            status.epoch = epoch;
            status.view = view.0;
            status.leader = Some(leader.to_hex());
        });
    }

    fn on_epoch_changed(&self, epoch: u64, validators: &ValidatorSet) {
        self.update(|status| {
            status.epoch = epoch;
            status.validators = validators.len();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halyard_consensus::CommittedVertex;
    use halyard_core::{Command, Hash, KeyPair, LedgerHeader, Vertex, VerifiedVertex};

    fn committed(view: u64, commands: Vec<Command>) -> CommittedVertex {
        let vertex = Vertex {
            epoch: 0,
            view: View(view),
            qc: None,
            commands,
            proposer: None,
            timeout_certificate: None,
        };
        let mut ledger_header = LedgerHeader::genesis(0, Hash::ZERO, 0, 0);
        ledger_header.view = View(view);
        ledger_header.state_version = view;
        CommittedVertex {
            vertex: VerifiedVertex::new(vertex).unwrap(),
            ledger_header,
        }
    }

    #[test]
    fn test_commit_updates_status_and_drains_pool() {
        let pool = Arc::new(CommandPool::new(10));
        let a = Command::new(b"a".to_vec());
        let b = Command::new(b"b".to_vec());
        pool.add(a.clone()).unwrap();
        pool.add(b.clone()).unwrap();

        let sink = StatusSink::new(KeyPair::from_seed(1).public, 4, pool.clone());
        sink.on_committed(&CommittedUpdate {
            vertices: vec![committed(1, vec![a]), committed(2, vec![])],
        });

        let status = sink.snapshot();
        assert_eq!(status.committed_vertices, 2);
        assert_eq!(status.committed_commands, 1);
        assert_eq!(status.last_committed_view, 2);
        assert_eq!(status.state_version, 2);
        assert_eq!(status.pending_commands, 1);
        assert_eq!(status.validators, 4);
    }

    #[test]
    fn test_view_change_is_reported() {
        let pool = Arc::new(CommandPool::new(10));
        let leader = KeyPair::from_seed(2).public;
        let sink = StatusSink::new(KeyPair::from_seed(1).public, 4, pool);
        sink.on_view_changed(3, View(17), leader);

        let status = sink.snapshot();
        assert_eq!((status.epoch, status.view), (3, 17));
        assert_eq!(status.leader, Some(leader.to_hex()));
    }
}
