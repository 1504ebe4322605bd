use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use halyard_core::serialize;
use tracing::debug;

use super::{StagedMap, Storage};
use crate::error::StorageError;

/// File-backed storage using a single snapshot file, replaced atomically and
/// fsynced on every commit.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    map: StagedMap,
}

impl FileStorage {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StorageError> {
        let path = path.into();
        let data: BTreeMap<Vec<u8>, Vec<u8>> = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serialize::from_bytes(&bytes).map_err(|e| {
                StorageError::CorruptSnapshot {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Opened {:?} with {} keys", path, data.len());

        Ok(FileStorage {
            path,
            map: StagedMap::from_data(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_to_disk(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = serialize::to_bytes(&self.map.data)
            .map_err(|e| StorageError::Encode(e.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl Storage for FileStorage {
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
        if !self.map.has_pending() {
            return Ok(());
        }
        self.map.apply();
        self.flush_to_disk()
    }

    fn rollback(&mut self) {
        self.map.discard();
    }
}
