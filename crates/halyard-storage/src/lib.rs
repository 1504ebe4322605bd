//! Halyard Storage - Durable consensus state
//!
//! This crate provides the key/value storage backends and the stores the
//! consensus core persists its safety state and vertex tree through.

pub mod consensus_store;
pub mod error;
pub mod storage;

pub use consensus_store::{ConsensusStore, SafetyStateStore, VertexStorePersistence};
pub use error::StorageError;
pub use storage::{FileStorage, MemoryStorage, Storage};
