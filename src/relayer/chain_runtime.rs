//! Per-chain aggregate binding a provider, its message cache, its last
//! checkpointed height and the listener channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

use crate::constants::{LISTENER_CHANNEL_CAPACITY, MAX_INFLIGHT_DELIVERIES};
use crate::models::{BlockInfo, MessageCache, RouteMessage};
use crate::providers::ChainProvider;

pub struct ChainRuntime {
    provider: Arc<dyn ChainProvider>,
    chain_id: String,
    pub message_cache: MessageCache,
    /// High-water mark: never decreases, updated only after the block's
    /// messages are merged durably enough to re-derive on restart.
    last_saved_height: AtomicU64,
    listener_tx: mpsc::Sender<BlockInfo>,
    listener_rx: Mutex<Option<mpsc::Receiver<BlockInfo>>>,
    /// Bounds concurrent deliveries targeting this chain.
    delivery_permits: Arc<Semaphore>,
}

impl ChainRuntime {
    pub fn new(provider: Arc<dyn ChainProvider>) -> Self {
        let (listener_tx, listener_rx) = mpsc::channel(LISTENER_CHANNEL_CAPACITY);
        let chain_id = provider.chain_id();
        Self {
            provider,
            chain_id,
            message_cache: MessageCache::new(),
            last_saved_height: AtomicU64::new(0),
            listener_tx,
            listener_rx: Mutex::new(Some(listener_rx)),
            delivery_permits: Arc::new(Semaphore::new(MAX_INFLIGHT_DELIVERIES)),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ChainProvider> {
        &self.provider
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn last_saved_height(&self) -> u64 {
        self.last_saved_height.load(Ordering::SeqCst)
    }

    pub fn set_last_saved_height(&self, height: u64) {
        self.last_saved_height.store(height, Ordering::SeqCst);
    }

    pub fn listener_sender(&self) -> mpsc::Sender<BlockInfo> {
        self.listener_tx.clone()
    }

    /// The block processor's end of the listener channel. Yields once.
    pub(crate) fn take_listener_receiver(&self) -> Option<mpsc::Receiver<BlockInfo>> {
        self.listener_rx.lock().take()
    }

    pub fn delivery_permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.delivery_permits)
    }

    /// Upserts a batch's messages into this chain's cache, keyed by message
    /// identity. Idempotent: re-merging a batch leaves one entry per key.
    pub fn merge_messages(&self, block: &BlockInfo) {
        for message in &block.messages {
            self.message_cache.add(RouteMessage::new(message.clone()));
        }
    }

    /// Destination-side duplicate suppression; provider errors demote to
    /// "not now" and the message stays cached for the next tick.
    pub async fn should_send_message(&self, message: &crate::models::Message) -> bool {
        match self.provider.should_send_message(message).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(
                    chain = %self.chain_id,
                    sn = message.sn,
                    error = %err,
                    "should-send check failed"
                );
                false
            }
        }
    }
}
