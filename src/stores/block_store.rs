//! Per-chain checkpoint of the last processed block height.

use std::sync::Arc;

use super::KeyValueStore;
use crate::models::StoreError;

pub struct BlockStore {
    db: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl BlockStore {
    pub fn new(db: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            db,
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, chain_id: &str) -> Vec<u8> {
        format!("{}-{}", self.prefix, chain_id).into_bytes()
    }

    pub fn store_block(&self, height: u64, chain_id: &str) -> Result<(), StoreError> {
        self.db.set(&self.key(chain_id), &height.to_be_bytes())
    }

    pub fn get_last_stored_block(&self, chain_id: &str) -> Result<u64, StoreError> {
        let raw = self
            .db
            .get(&self.key(chain_id))?
            .ok_or(StoreError::NotFound)?;
        let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
            StoreError::Corrupt(format!("stored height for {chain_id} is not 8 bytes"))
        })?;
        Ok(u64::from_be_bytes(bytes))
    }
}
