//! Persistence layer: an ordered key-value store plus the block-checkpoint
//! and escalated-message stores built on top of it.

mod block_store;
mod message_store;
mod sled_db;

pub use block_store::*;
pub use message_store::*;
pub use sled_db::*;

pub use crate::models::StoreError;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u64 = 100;

/// Durable, ordered byte-key store with prefix-range iteration and bulk
/// clear. One writer or many readers at a time, scoped to a single
/// operation; compound operations are not atomic across calls.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Removes every entry in the store.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Listing window for the message store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
    pub all: bool,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new()
    }
}

impl Pagination {
    pub fn new() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            all: false,
        }
    }

    /// Selects every stored message, ignoring limit and offset.
    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::new()
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}
