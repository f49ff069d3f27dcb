//! The relayer orchestrator.
//!
//! Wires chain listeners, per-chain block processors and the router loop
//! together: listeners emit gap-free block batches, processors checkpoint
//! heights and merge discovered messages into per-chain caches, and the
//! router matches cached messages to destination runtimes and drives
//! delivery with bounded retries and durable escalation.

mod chain_runtime;

pub use chain_runtime::ChainRuntime;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::{
    DEFAULT_TX_RETRY, PREFIX_BLOCK_STORE, PREFIX_MESSAGE_STORE, ROUTE_INTERVAL,
    SAVE_HEIGHT_MAX_AFTER,
};
use crate::models::{BlockInfo, MessageKey, RelayerError, RouteMessage, StoreError};
use crate::providers::ChainProvider;
use crate::stores::{BlockStore, KeyValueStore, MessageStore, Pagination};

/// Creates a relayer over `providers` and starts it. Returns the running
/// relayer and the process-level error channel: only unrecovered listener
/// failures surface there, and the embedding process is expected to treat
/// them as fatal.
pub async fn start(
    db: Arc<dyn KeyValueStore>,
    providers: Vec<Arc<dyn ChainProvider>>,
    fresh: bool,
    token: CancellationToken,
) -> Result<(Arc<Relayer>, mpsc::Receiver<RelayerError>), RelayerError> {
    let relayer = Arc::new(Relayer::new(db, providers, fresh)?);
    let errors = Arc::clone(&relayer).start(token);
    Ok((relayer, errors))
}

pub struct Relayer {
    chains: HashMap<String, Arc<ChainRuntime>>,
    message_store: MessageStore,
    block_store: BlockStore,
    db: Arc<dyn KeyValueStore>,
}

impl Relayer {
    /// Builds the fixed chain registry and loads each chain's checkpoint.
    /// With `fresh` set, the store is cleared first.
    pub fn new(
        db: Arc<dyn KeyValueStore>,
        providers: Vec<Arc<dyn ChainProvider>>,
        fresh: bool,
    ) -> Result<Self, RelayerError> {
        if fresh {
            db.clear()?;
        }

        let message_store = MessageStore::new(Arc::clone(&db), PREFIX_MESSAGE_STORE);
        let block_store = BlockStore::new(Arc::clone(&db), PREFIX_BLOCK_STORE);

        let mut chains = HashMap::with_capacity(providers.len());
        for provider in providers {
            let runtime = ChainRuntime::new(provider);
            match block_store.get_last_stored_block(runtime.chain_id()) {
                Ok(height) => runtime.set_last_saved_height(height),
                Err(StoreError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
            chains.insert(runtime.chain_id().to_string(), Arc::new(runtime));
        }

        Ok(Self {
            chains,
            message_store,
            block_store,
            db,
        })
    }

    /// Spawns the listener group, the block-processor group and the router.
    /// All tasks honor `token`; the returned channel carries fatal listener
    /// errors (all-or-nothing: no partial-chain degraded mode).
    pub fn start(self: Arc<Self>, token: CancellationToken) -> mpsc::Receiver<RelayerError> {
        let (err_tx, err_rx) = mpsc::channel(1);

        tokio::spawn(Arc::clone(&self).run_listeners(token.clone(), err_tx));
        tokio::spawn(Arc::clone(&self).run_block_processors(token.clone()));
        tokio::spawn(self.run_router(token));

        err_rx
    }

    pub fn find_chain_runtime(&self, chain_id: &str) -> Result<&Arc<ChainRuntime>, RelayerError> {
        self.chains
            .get(chain_id)
            .ok_or_else(|| RelayerError::ChainNotFound(chain_id.to_string()))
    }

    // === chain listeners ===

    async fn run_listeners(
        self: Arc<Self>,
        token: CancellationToken,
        err_tx: mpsc::Sender<RelayerError>,
    ) {
        let listeners = self.chains.values().map(|runtime| {
            let runtime = Arc::clone(runtime);
            let token = token.clone();
            async move {
                let last_saved = runtime.last_saved_height();
                runtime
                    .provider()
                    .listener(token, last_saved, runtime.listener_sender())
                    .await
                    .map_err(|source| RelayerError::Listener {
                        chain: runtime.chain_id().to_string(),
                        source,
                    })
            }
        });

        if let Err(failure) = try_join_all(listeners).await {
            error!(error = %failure, "chain listener failed, stopping the group");
            token.cancel();
            let _ = err_tx.send(failure).await;
        }
    }

    // === block processors ===

    async fn run_block_processors(self: Arc<Self>, token: CancellationToken) {
        let mut group = JoinSet::new();
        for runtime in self.chains.values() {
            let Some(mut blocks) = runtime.take_listener_receiver() else {
                warn!(chain = %runtime.chain_id(), "block processor already running");
                continue;
            };
            let relayer = Arc::clone(&self);
            let runtime = Arc::clone(runtime);
            let token = token.clone();
            group.spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        received = blocks.recv() => match received {
                            Some(block) => relayer.process_block_info(&runtime, block),
                            None => return,
                        },
                    }
                }
            });
        }
        while group.join_next().await.is_some() {}
    }

    /// Checkpoints the height, then merges the batch's messages into the
    /// source chain's cache.
    fn process_block_info(&self, runtime: &ChainRuntime, block: BlockInfo) {
        if let Err(err) = self.save_block_height(runtime, block.height, block.messages.len()) {
            error!(
                chain = %runtime.chain_id(),
                height = block.height,
                error = %err,
                "unable to save height"
            );
        }
        runtime.merge_messages(&block);
    }

    /// Hysteresis policy: persist only for message-bearing batches, or once
    /// the height has advanced far enough past the last checkpoint to bound
    /// store writes.
    fn save_block_height(
        &self,
        runtime: &ChainRuntime,
        height: u64,
        message_count: usize,
    ) -> Result<(), StoreError> {
        debug!(chain = %runtime.chain_id(), height, "saving height");
        if message_count > 0
            || height.saturating_sub(runtime.last_saved_height()) > SAVE_HEIGHT_MAX_AFTER
        {
            self.block_store.store_block(height, runtime.chain_id())?;
            runtime.set_last_saved_height(height);
        }
        Ok(())
    }

    // === router ===

    async fn run_router(self: Arc<Self>, token: CancellationToken) {
        let mut tick = interval(ROUTE_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tick.tick() => Arc::clone(&self).process_messages().await,
            }
        }
    }

    /// One router cycle: scan every source cache and dispatch whatever is
    /// ready. Iteration order is unspecified; per-message failures never
    /// abort the cycle.
    async fn process_messages(self: Arc<Self>) {
        for src in self.chains.values() {
            for route_message in src.message_cache.snapshot() {
                if route_message.is_processing {
                    continue;
                }

                let dst = match self.find_chain_runtime(&route_message.message.dst) {
                    Ok(dst) => dst,
                    Err(_) => {
                        error!(
                            dst = %route_message.message.dst,
                            sn = route_message.message.sn,
                            "destination chain runtime not found"
                        );
                        continue;
                    }
                };

                if !dst.should_send_message(&route_message.message).await {
                    continue;
                }

                // Claim under the cache lock; a message already claimed by a
                // previous tick's in-flight delivery is skipped here.
                let Some(claimed) = src.message_cache.begin_dispatch(&route_message.key()) else {
                    continue;
                };

                let relayer = Arc::clone(&self);
                let src = Arc::clone(src);
                let dst = Arc::clone(dst);
                tokio::spawn(async move {
                    relayer.route_message(claimed, dst, src).await;
                });
            }
        }
    }

    /// Delivers one claimed message, bounded by the destination's in-flight
    /// budget, and settles the outcome.
    async fn route_message(
        self: Arc<Self>,
        message: RouteMessage,
        dst: Arc<ChainRuntime>,
        src: Arc<ChainRuntime>,
    ) {
        let permits = dst.delivery_permits();
        let Ok(_permit) = permits.acquire_owned().await else {
            return;
        };

        let key = message.key();
        match dst.provider().route(message.message.clone()).await {
            Ok(receipt) => {
                info!(
                    src = %src.chain_id(),
                    dst = %dst.chain_id(),
                    sn = message.message.sn,
                    tx_hash = %receipt.tx_hash,
                    "successfully relayed message"
                );
                self.clear_messages(&[key], &src);
            }
            Err(err) => {
                warn!(
                    src = %src.chain_id(),
                    dst = %dst.chain_id(),
                    sn = message.message.sn,
                    error = %err,
                    "message delivery failed"
                );
                self.handle_delivery_failure(&key, &src);
            }
        }
    }

    /// Retry-then-escalate: within the budget the message reopens for the
    /// next tick; at the budget it moves to the durable store and out of the
    /// cache, a terminal needs-manual-intervention state.
    fn handle_delivery_failure(&self, key: &MessageKey, src: &ChainRuntime) {
        let Some(current) = src.message_cache.get(key) else {
            error!(sn = key.sn, src = %key.src, "message not found for key");
            return;
        };

        if current.retry >= DEFAULT_TX_RETRY {
            if let Err(err) = self.message_store.store_message(&current) {
                error!(error = %err, "failed to persist message after max retry");
                return;
            }
            src.message_cache.remove(key);
            error!(
                src = %current.message.src,
                dst = %current.message.dst,
                sn = current.message.sn,
                "failed to send message, saved to database"
            );
        } else {
            src.message_cache.reset_processing(key);
        }
    }

    /// Terminal-success cleanup: drops the keys from the live cache and from
    /// the durable store, logging (not propagating) store failures.
    fn clear_messages(&self, keys: &[MessageKey], src: &ChainRuntime) {
        for key in keys {
            src.message_cache.remove(key);
            if let Err(err) = self.message_store.delete_message(key) {
                error!(sn = key.sn, error = %err, "failed to delete message from store");
            }
        }
    }

    // === control surface (consumed by the socket layer) ===

    pub fn get_messages(
        &self,
        chain_id: &str,
        pagination: &Pagination,
    ) -> Result<Vec<RouteMessage>, RelayerError> {
        Ok(self.message_store.get_messages(chain_id, pagination)?)
    }

    /// Looks a message up in the live cache first, then the durable store.
    pub fn get_message(&self, key: &MessageKey) -> Result<RouteMessage, RelayerError> {
        if let Ok(runtime) = self.find_chain_runtime(&key.src) {
            if let Some(cached) = runtime.message_cache.get(key) {
                return Ok(cached);
            }
        }
        Ok(self.message_store.get_message(key)?)
    }

    pub fn remove_message(&self, key: &MessageKey) -> Result<(), RelayerError> {
        if let Ok(runtime) = self.find_chain_runtime(&key.src) {
            runtime.message_cache.remove(key);
        }
        self.message_store.delete_message(key)?;
        Ok(())
    }

    pub fn get_block_height(&self, chain_id: &str) -> Result<u64, RelayerError> {
        Ok(self.find_chain_runtime(chain_id)?.last_saved_height())
    }

    /// Re-injects a message for immediate routing: an escalated message
    /// moves from the store back into its source cache with a fresh retry
    /// budget; a cache-resident one is reopened for the next tick.
    pub fn relay_message(
        &self,
        chain_id: &str,
        sn: u64,
        height: Option<u64>,
    ) -> Result<RouteMessage, RelayerError> {
        let runtime = self.find_chain_runtime(chain_id)?;
        let store_key = MessageKey::new(sn, chain_id, "", "");

        match self.message_store.get_message(&store_key) {
            Ok(stored) => {
                runtime.message_cache.add(stored.clone());
                if let Err(err) = self.message_store.delete_message(&store_key) {
                    error!(sn, error = %err, "failed to delete re-injected message");
                }
                return Ok(stored);
            }
            Err(StoreError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let cached = runtime
            .message_cache
            .snapshot()
            .into_iter()
            .find(|m| {
                m.message.sn == sn && height.is_none_or(|h| m.message.message_height == h)
            })
            .ok_or(RelayerError::MessageNotFound {
                chain: chain_id.to_string(),
                sn,
            })?;
        runtime.message_cache.reset_processing(&cached.key());
        Ok(cached)
    }

    /// Wipes the whole database (checkpoints and escalated messages).
    pub fn prune_db(&self) -> Result<(), RelayerError> {
        Ok(self.db.clear()?)
    }
}
