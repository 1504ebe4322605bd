//! Halyard Consensus - HotStuff-style BFT core
//!
//! This crate provides weighted quorum certificates, the pending vertex tree
//! with its three-chain commit rule, safety rules, the pacemaker, leader
//! election, vertex sync, and the single-consumer event loop that ties them
//! together across epochs.

pub mod bft_sync;
pub mod commands;
pub mod config;
pub mod epoch_manager;
pub mod error;
pub mod events;
pub mod ledger;
pub mod net;
pub mod pacemaker;
pub mod pending;
pub mod preprocessor;
pub mod proposer_election;
pub mod qc;
pub mod reducer;
pub mod runner;
pub mod safety_rules;
pub mod timer;
pub mod validator_set;
pub mod verifier;
pub mod vertex_store;

#[cfg(test)]
pub(crate) mod test_utils;

pub use bft_sync::{respond_to_request, BftSync, SyncResult};
pub use commands::{CommandSource, EmptyCommandSource};
pub use config::BftConfig;
pub use epoch_manager::{ConsensusContext, EpochManager};
pub use error::ConsensusError;
pub use events::{BftEventSink, CommittedUpdate, CommittedVertex};
pub use ledger::{AccumulatorLedger, ExecutionError, Ledger};
pub use net::ConsensusNetwork;
pub use pacemaker::{Pacemaker, TimeoutCalculator};
pub use pending::{PendingTimeouts, PendingVotes, VoteOutcome};
pub use preprocessor::{BftEvent, BftEventPreProcessor};
pub use proposer_election::ProposerElection;
pub use qc::{verify_high_qc, verify_qc, verify_tc};
pub use reducer::{BftEventReducer, ReducerOutcome};
pub use runner::{run_event_loop, NodeEvent, TokioScheduler};
pub use safety_rules::{vote_data_for, SafetyRules, TimeoutSignal};
pub use timer::{ScheduledEvent, Scheduler, SystemTimeSupplier, TimeSupplier};
pub use validator_set::{ValidationState, ValidatorSet};
pub use verifier::Verifier;
pub use vertex_store::VertexStore;
