//! Durable archive of messages that failed live delivery.
//!
//! Keys are `"<prefix>-<src>-<sn_be>"`: the durable identity of a message is
//! its source chain and sequence number, and the big-endian sequence number
//! keeps prefix iteration in ascending-sn order per chain.

use std::sync::Arc;

use super::{KeyValueStore, Pagination};
use crate::models::{Message, MessageKey, RouteMessage, StoreError};

pub struct MessageStore {
    db: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl MessageStore {
    pub fn new(db: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            db,
            prefix: prefix.into(),
        }
    }

    fn key(&self, src: &str, sn: u64) -> Vec<u8> {
        let mut key = format!("{}-{}-", self.prefix, src).into_bytes();
        key.extend_from_slice(&sn.to_be_bytes());
        key
    }

    fn chain_prefix(&self, chain_id: &str) -> Vec<u8> {
        format!("{}-{}-", self.prefix, chain_id).into_bytes()
    }

    pub fn store_message(&self, message: &RouteMessage) -> Result<(), StoreError> {
        let value = serde_json::to_vec(&message.message)?;
        self.db
            .set(&self.key(&message.message.src, message.message.sn), &value)
    }

    /// Fetches by source chain and sequence number; `dst` and `event_type`
    /// of `key` do not participate in the lookup. Relay state is reset on
    /// the way out: a restored message starts its retry budget afresh.
    pub fn get_message(&self, key: &MessageKey) -> Result<RouteMessage, StoreError> {
        let raw = self
            .db
            .get(&self.key(&key.src, key.sn))?
            .ok_or(StoreError::NotFound)?;
        let message: Message = serde_json::from_slice(&raw)?;
        Ok(RouteMessage::new(message))
    }

    pub fn delete_message(&self, key: &MessageKey) -> Result<(), StoreError> {
        self.db.delete(&self.key(&key.src, key.sn))
    }

    pub fn total_count(&self, chain_id: &str) -> Result<u64, StoreError> {
        Ok(self.db.iter_prefix(&self.chain_prefix(chain_id))?.len() as u64)
    }

    /// Lists a chain's stored messages in ascending-sn order. A non-zero
    /// offset at or beyond the total count is an error, not an empty page.
    pub fn get_messages(
        &self,
        chain_id: &str,
        pagination: &Pagination,
    ) -> Result<Vec<RouteMessage>, StoreError> {
        let entries = self.db.iter_prefix(&self.chain_prefix(chain_id))?;
        let total = entries.len() as u64;

        let window: Box<dyn Iterator<Item = &(Vec<u8>, Vec<u8>)>> = if pagination.all {
            Box::new(entries.iter())
        } else {
            if pagination.offset != 0 && pagination.offset >= total {
                return Err(StoreError::OffsetOutOfRange {
                    offset: pagination.offset,
                    total,
                });
            }
            Box::new(
                entries
                    .iter()
                    .skip(pagination.offset as usize)
                    .take(pagination.limit as usize),
            )
        };

        window
            .map(|(_, raw)| {
                let message: Message = serde_json::from_slice(raw)?;
                Ok(RouteMessage::new(message))
            })
            .collect()
    }
}
