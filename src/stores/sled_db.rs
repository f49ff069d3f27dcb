//! [`KeyValueStore`] backed by an on-disk `sled` database.

use std::path::Path;

use parking_lot::RwLock;

use super::KeyValueStore;
use crate::models::StoreError;

/// Embedded store with a shared-read/exclusive-write discipline per
/// operation, mirroring how the rest of the engine expects to interleave
/// checkpoint writes with listing reads.
pub struct SledDb {
    db: sled::Db,
    lock: RwLock<()>,
}

impl SledDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            lock: RwLock::new(()),
        })
    }

    /// In-memory throwaway database, dropped with the value. Test use.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            lock: RwLock::new(()),
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        self.db.flush()?;
        Ok(())
    }
}

impl KeyValueStore for SledDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let _guard = self.lock.read();
        Ok(self.db.get(key)?.map(|value| value.to_vec()))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        self.db.remove(key)?;
        Ok(())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let _guard = self.lock.read();
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value) = item?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        self.db.clear()?;
        Ok(())
    }
}
