//! In-memory cache of in-flight outbound messages, one per source chain.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{MessageKey, RouteMessage};

/// Mutex-guarded map of [`MessageKey`] to [`RouteMessage`]. No ordering
/// guarantee across keys; the router snapshots the full map each cycle.
#[derive(Debug, Default)]
pub struct MessageCache {
    inner: Mutex<HashMap<MessageKey, RouteMessage>>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a message under its key. Last write wins: a later observation
    /// of the same key replaces the prior entry and its relay state.
    pub fn add(&self, message: RouteMessage) {
        let key = message.key();
        self.inner.lock().insert(key, message);
    }

    /// Removes the entry for `key`. No-op if absent.
    pub fn remove(&self, key: &MessageKey) {
        self.inner.lock().remove(key);
    }

    pub fn get(&self, key: &MessageKey) -> Option<RouteMessage> {
        self.inner.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Clones the current entries for router iteration.
    pub fn snapshot(&self) -> Vec<RouteMessage> {
        self.inner.lock().values().cloned().collect()
    }

    /// Claims a message for dispatch: if present and not already processing,
    /// marks it processing, bumps its retry counter and returns the updated
    /// entry. Returns `None` when the message is gone or already claimed,
    /// which keeps a message from being dispatched twice concurrently.
    pub fn begin_dispatch(&self, key: &MessageKey) -> Option<RouteMessage> {
        let mut guard = self.inner.lock();
        let entry = guard.get_mut(key)?;
        if entry.is_processing {
            return None;
        }
        entry.is_processing = true;
        entry.retry += 1;
        Some(entry.clone())
    }

    /// Reopens a message for the next router tick after a failed delivery.
    pub fn reset_processing(&self, key: &MessageKey) {
        if let Some(entry) = self.inner.lock().get_mut(key) {
            entry.is_processing = false;
        }
    }
}
