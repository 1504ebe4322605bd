use super::{StagedMap, Storage};
use crate::error::StorageError;

/// In-memory storage, for tests and simulations
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    map: StagedMap,
    commits: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    pub fn len(&self) -> usize {
        self.map.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.data.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.map.stage(key, Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.map.stage(key, None);
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.map.apply();
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) {
        self.map.discard();
    }
}
