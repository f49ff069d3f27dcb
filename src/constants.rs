//! Tuning constants for the relay engine.

use std::time::Duration;

// === Router ===
/// Delivery attempts before a message is escalated to the durable store.
pub const DEFAULT_TX_RETRY: u64 = 2;
/// Interval between router scans of the message caches.
pub const ROUTE_INTERVAL: Duration = Duration::from_secs(1);
/// Maximum concurrent deliveries in flight per destination chain.
pub const MAX_INFLIGHT_DELIVERIES: usize = 16;

// === Checkpointing ===
/// A message-less block advances the stored checkpoint only after the height
/// has moved this far past the last persisted one.
pub const SAVE_HEIGHT_MAX_AFTER: u64 = 1000;

// === Listener ===
/// Capacity of the per-chain channel between listener and block processor.
pub const LISTENER_CHANNEL_CAPACITY: usize = 1000;
/// Optimistic head-tracking tick: the assumed chain head advances by one.
pub const BLOCK_INTERVAL: Duration = Duration::from_secs(2);
/// How often the true chain head is re-queried.
pub const BLOCK_HEIGHT_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Attempts per block fetch before the height is dropped for the round.
pub const FETCH_RETRY_ATTEMPTS: u32 = 3;
/// Back-off between block fetch attempts.
pub const FETCH_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Upper bound on concurrent per-height fetches while synchronizing.
pub const MAX_BLOCK_FETCH_CONCURRENCY: usize = 1000;
/// Default concurrent per-height fetches when the config leaves it unset.
pub const DEFAULT_BLOCK_FETCH_CONCURRENCY: usize = 100;

// === Store key namespaces ===
pub const PREFIX_MESSAGE_STORE: &str = "message";
pub const PREFIX_BLOCK_STORE: &str = "block";
