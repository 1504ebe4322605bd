use halyard_core::serialize;
use halyard_core::{SafetyState, VertexStoreState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::error::StorageError;
use crate::storage::Storage;

const SAFETY_STATE_KEY: &[u8] = b"safety_state";
const VERTEX_STORE_KEY: &[u8] = b"vertex_store";

/// Durable home of the validator's voting record. A save must be durable
/// before the vote or timeout it records leaves the process.
pub trait SafetyStateStore: Send {
    fn load_safety_state(&self) -> Result<Option<SafetyState>, StorageError>;

    fn save_safety_state(&mut self, state: &SafetyState) -> Result<(), StorageError>;
}

/// Durable home of the pending-vertex tree
pub trait VertexStorePersistence: Send {
    fn load_vertex_store(&self) -> Result<Option<VertexStoreState>, StorageError>;

    fn save_vertex_store(&mut self, state: &VertexStoreState) -> Result<(), StorageError>;
}

/// Consensus state stored as bincode blobs in a key/value backend
#[derive(Debug, Clone, Default)]
pub struct ConsensusStore<S: Storage> {
    storage: S,
}

impl<S: Storage> ConsensusStore<S> {
    pub fn new(storage: S) -> Self {
        ConsensusStore { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    fn load<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StorageError> {
        match self.storage.get(key) {
            Some(bytes) => Ok(Some(serialize::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save<T: Serialize>(&mut self, key: &[u8], value: &T) -> Result<(), StorageError> {
        let bytes = serialize::to_bytes(value)?;
        self.storage.put(key, &bytes);
        if let Err(e) = self.storage.commit() {
            self.storage.rollback();
            return Err(e);
        }
        trace!("Persisted {} bytes under {:?}", bytes.len(), String::from_utf8_lossy(key));
        Ok(())
    }
}

impl<S: Storage> SafetyStateStore for ConsensusStore<S> {
    fn load_safety_state(&self) -> Result<Option<SafetyState>, StorageError> {
        self.load(SAFETY_STATE_KEY)
    }

    fn save_safety_state(&mut self, state: &SafetyState) -> Result<(), StorageError> {
        self.save(SAFETY_STATE_KEY, state)
    }
}

impl<S: Storage> VertexStorePersistence for ConsensusStore<S> {
    fn load_vertex_store(&self) -> Result<Option<VertexStoreState>, StorageError> {
        self.load(VERTEX_STORE_KEY)
    }

    fn save_vertex_store(&mut self, state: &VertexStoreState) -> Result<(), StorageError> {
        self.save(VERTEX_STORE_KEY, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use halyard_core::{
        BftHeader, Hash, HighQc, LedgerHeader, QuorumCertificate, Validator, Vertex, View,
        KeyPair,
    };

    #[test]
    fn test_safety_state_absent_then_saved() {
        let mut store = ConsensusStore::new(MemoryStorage::new());
        assert!(store.load_safety_state().unwrap().is_none());

        let mut state = SafetyState::new(2);
        state.last_voted_view = View(9);
        state.locked_view = View(7);
        store.save_safety_state(&state).unwrap();

        assert_eq!(store.load_safety_state().unwrap(), Some(state));
        assert_eq!(store.storage().commit_count(), 1);
    }

    #[test]
    fn test_vertex_store_state_survives_file_reopen() {
        let path = std::env::temp_dir()
            .join(format!("halyard-consensus-store-{}", std::process::id()))
            .join("vertices.bin");
        let _ = std::fs::remove_file(&path);

        let ledger = LedgerHeader::genesis(0, Hash::ZERO, 0, 0);
        let root = Vertex::genesis(&ledger);
        let root_id = root.hash().unwrap();
        let qc = QuorumCertificate::genesis(BftHeader::new(View(0), root_id, ledger));
        let state = VertexStoreState {
            epoch: 0,
            validators: vec![Validator::new(KeyPair::from_seed(1).public, 1)],
            root,
            high_qc: HighQc::from_genesis(qc),
            vertices: vec![],
        };

        let mut store = ConsensusStore::new(FileStorage::open(&path).unwrap());
        store.save_vertex_store(&state).unwrap();
        drop(store);

        let reopened = ConsensusStore::new(FileStorage::open(&path).unwrap());
        assert_eq!(reopened.load_vertex_store().unwrap(), Some(state));
        assert!(reopened.load_safety_state().unwrap().is_none());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_blob_is_an_error() {
        let mut storage = MemoryStorage::new();
        storage.put(SAFETY_STATE_KEY, &[0xff]);
        storage.commit().unwrap();

        let store = ConsensusStore::new(storage);
        assert!(matches!(
            store.load_safety_state(),
            Err(StorageError::Record(_))
        ));
    }
}
