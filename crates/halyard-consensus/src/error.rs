use halyard_core::{CoreError, Hash, PublicKey, View};
use halyard_storage::StorageError;
use thiserror::Error;

use crate::ledger::ExecutionError;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Validator set is empty")]
    EmptyValidatorSet,

    #[error("Validator set has zero total weight")]
    ZeroTotalWeight,

    #[error("Duplicate validator: {0}")]
    DuplicateValidator(PublicKey),

    #[error("Validator weights overflow")]
    WeightOverflow,

    #[error("Missing parent {parent:?} of vertex {vertex:?}")]
    MissingParent { vertex: Hash, parent: Hash },

    #[error("Invalid vertex: {0}")]
    InvalidVertex(String),

    #[error("Invalid quorum certificate: {0}")]
    InvalidQc(String),

    #[error("Invalid timeout certificate: {0}")]
    InvalidTc(String),

    #[error("Insufficient weight: have {have}, need {need}")]
    InsufficientWeight { have: u64, need: u64 },

    #[error("Unknown author: {0}")]
    UnknownAuthor(PublicKey),

    #[error("Invalid signature from {0}")]
    InvalidSignature(PublicKey),

    #[error("Unexpected proposer for view {view}: expected {expected}, got {got}")]
    UnexpectedProposer {
        view: View,
        expected: PublicKey,
        got: PublicKey,
    },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Ledger commit failed: {0}")]
    LedgerCommit(ExecutionError),

    #[error("Invalid root: {0}")]
    InvalidRoot(String),

    #[error("Safety violation: {0}")]
    SafetyViolation(String),

    #[error("Inconsistent quorum certificate: {0}")]
    InconsistentQc(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConsensusError {
    /// Errors after which the local instance must stop rather than continue
    /// with broken invariants
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsensusError::InvalidRoot(_)
                | ConsensusError::SafetyViolation(_)
                | ConsensusError::InconsistentQc(_)
                | ConsensusError::Storage(_)
                | ConsensusError::LedgerCommit(_)
        )
    }
}
