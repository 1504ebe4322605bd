use serde::{Deserialize, Serialize};

use crate::types::certificate::HighQc;
use crate::types::ledger::Validator;
use crate::types::message::{Vote, ViewTimeout};
use crate::types::vertex::Vertex;
use crate::types::view::View;

/// Everything a validator must remember across restarts to never equivocate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyState {
    pub epoch: u64,
    /// Highest view in which a vote or timeout was signed
    pub last_voted_view: View,
    /// Highest view known to head a two-chain
    pub locked_view: View,
    pub last_vote: Option<Vote>,
    pub last_timeout: Option<ViewTimeout>,
}

impl SafetyState {
    pub fn new(epoch: u64) -> Self {
        SafetyState {
            epoch,
            last_voted_view: View::genesis(),
            locked_view: View::genesis(),
            last_vote: None,
            last_timeout: None,
        }
    }
}

/// Snapshot of the pending-vertex tree, enough to rebuild it after a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexStoreState {
    pub epoch: u64,
    pub validators: Vec<Validator>,
    pub root: Vertex,
    pub high_qc: HighQc,
    /// Non-root vertices, parents before children
    pub vertices: Vec<Vertex>,
}
