use halyard_core::{LedgerHeader, PublicKey, VerifiedVertex, View};

use crate::validator_set::ValidatorSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedVertex {
    pub vertex: VerifiedVertex,
    pub ledger_header: LedgerHeader,
}

/// Vertices that became final in one step, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommittedUpdate {
    pub vertices: Vec<CommittedVertex>,
}

/// Outward notifications of the consensus instance
pub trait BftEventSink: Send + Sync {
    fn on_committed(&self, update: &CommittedUpdate);

    fn on_view_changed(&self, _epoch: u64, _view: View, _leader: PublicKey) {}

    fn on_epoch_changed(&self, _epoch: u64, _validators: &ValidatorSet) {}
}
