use halyard_core::{merkle_root, Command, LedgerHeader, VerifiedVertex, Validator, View};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Command batch rejected: {0}")]
    Rejected(String),

    #[error("Ledger sync failed: {0}")]
    SyncFailed(String),

    #[error("Commit failed: {0}")]
    CommitFailed(String),
}

/// The execution engine consensus orders commands for.
///
/// `prepare` is speculative: it computes the header a vertex would produce on
/// top of `parent` and must not make anything durable. Only `commit` and
/// `sync_to` change the ledger.
pub trait Ledger: Send {
    fn prepare(
        &mut self,
        parent: &LedgerHeader,
        vertex: &VerifiedVertex,
    ) -> Result<LedgerHeader, ExecutionError>;

    /// Called once per vertex that passed the three-chain rule, oldest first
    fn commit(&mut self, vertex: &VerifiedVertex, header: &LedgerHeader)
        -> Result<(), ExecutionError>;

    /// Catch up to a header committed elsewhere without replaying vertices
    fn sync_to(&mut self, header: &LedgerHeader) -> Result<(), ExecutionError>;
}

/// Ledger that folds committed command batches into a Merkle accumulator.
///
/// When `epoch_max_view` is set, the first vertex at or past that view closes
/// the epoch and hands the same validator set to the next one. Vertices built
/// on a closing header must be empty and leave the header unchanged.
#[derive(Debug, Clone)]
pub struct AccumulatorLedger {
    validators: Vec<Validator>,
    epoch_max_view: Option<View>,
    committed: LedgerHeader,
    committed_vertices: u64,
}

impl AccumulatorLedger {
    pub fn new(genesis: LedgerHeader, validators: Vec<Validator>, epoch_max_view: Option<View>) -> Self {
        AccumulatorLedger {
            validators,
            epoch_max_view,
            committed: genesis,
            committed_vertices: 0,
        }
    }

    pub fn committed_header(&self) -> &LedgerHeader {
        &self.committed
    }

    pub fn committed_vertices(&self) -> u64 {
        self.committed_vertices
    }

    fn batch_accumulator(parent: &LedgerHeader, commands: &[Command]) -> halyard_core::Hash {
        if commands.is_empty() {
            return parent.accumulator;
        }
        let leaves: Vec<_> = commands.iter().map(Command::hash).collect();
        merkle_root(&[parent.accumulator, merkle_root(&leaves)])
    }
}

impl Ledger for AccumulatorLedger {
    fn prepare(
        &mut self,
        parent: &LedgerHeader,
        vertex: &VerifiedVertex,
    ) -> Result<LedgerHeader, ExecutionError> {
        if parent.is_end_of_epoch() {
            if !vertex.commands().is_empty() {
                return Err(ExecutionError::Rejected(format!(
                    "vertex {} carries commands after the end of epoch {}",
                    vertex.id().short(),
                    parent.epoch
                )));
            }
            return Ok(parent.clone());
        }

        let timestamp = vertex
            .qc()
            .and_then(|qc| qc.timestamp())
            .unwrap_or(parent.timestamp)
            .max(parent.timestamp);

        let closes_epoch = self
            .epoch_max_view
            .is_some_and(|max| vertex.view() >= max);

        Ok(LedgerHeader {
            epoch: parent.epoch,
            view: vertex.view(),
            state_version: parent.state_version + vertex.commands().len() as u64,
            accumulator: Self::batch_accumulator(parent, vertex.commands()),
            timestamp,
            next_validators: closes_epoch.then(|| self.validators.clone()),
        })
    }

    fn commit(&mut self, vertex: &VerifiedVertex, header: &LedgerHeader) -> Result<(), ExecutionError> {
        if header.epoch < self.committed.epoch
            || (header.epoch == self.committed.epoch
                && header.state_version < self.committed.state_version)
        {
            return Err(ExecutionError::CommitFailed(format!(
                "header at version {} is behind committed version {}",
                header.state_version, self.committed.state_version
            )));
        }

        debug!(
            "Committing vertex {} at view {} ({} commands)",
            vertex.id().short(),
            vertex.view(),
            vertex.commands().len()
        );
        self.committed = header.clone();
        self.committed_vertices += 1;
        Ok(())
    }

    fn sync_to(&mut self, header: &LedgerHeader) -> Result<(), ExecutionError> {
        if header.epoch < self.committed.epoch {
            return Err(ExecutionError::SyncFailed(format!(
                "cannot sync back to epoch {} from epoch {}",
                header.epoch, self.committed.epoch
            )));
        }
        info!(
            "Ledger synced to epoch {} version {}",
            header.epoch, header.state_version
        );
        self.committed = header.clone();
        Ok(())
    }
}
