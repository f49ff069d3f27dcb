//! In-process mock chain used by the engine integration tests: a head that
//! advances on a timer, scripted messages emitted at fixed heights, and a
//! deliverable surface that can be told to fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use xrelay::listener::{BlockFetcher, BlockSync, BlockSyncConfig};
use xrelay::models::{BlockInfo, Message};
use xrelay::providers::{ChainProvider, ProviderError, TxReceipt};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Builds the fixture messages the original relay tests use: three messages
/// from `src` to `dst`, emitted a few blocks past `start_height`.
pub fn mock_messages(src: &str, dst: &str, start_height: u64) -> Vec<Message> {
    [3u64, 5, 7]
        .iter()
        .enumerate()
        .map(|(i, offset)| Message {
            src: src.into(),
            dst: dst.into(),
            sn: i as u64 + 1,
            data: format!("from message {src}").into_bytes(),
            message_height: start_height + offset,
            event_type: "emitMessage".into(),
        })
        .collect()
}

/// Chain state shared between the provider surface and its block fetcher.
pub struct MockChainState {
    chain_id: String,
    head: AtomicU64,
    messages_by_height: Mutex<HashMap<u64, Vec<Message>>>,
}

#[async_trait]
impl BlockFetcher for MockChainState {
    fn chain_id(&self) -> String {
        self.chain_id.clone()
    }

    async fn latest_height(&self) -> Result<u64, ProviderError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn fetch_block(&self, height: u64) -> Result<BlockInfo, ProviderError> {
        if height > self.head.load(Ordering::SeqCst) {
            return Err(ProviderError::HeightOutOfRange { height });
        }
        let messages = self
            .messages_by_height
            .lock()
            .get(&height)
            .cloned()
            .unwrap_or_default();
        Ok(BlockInfo { height, messages })
    }
}

pub struct MockProvider {
    state: Arc<MockChainState>,
    block_duration: Duration,
    sync_config: BlockSyncConfig,
    /// Remaining scripted delivery failures before `route` succeeds.
    fail_deliveries: AtomicU64,
    received: Mutex<Vec<Message>>,
}

impl MockProvider {
    pub fn new(
        chain_id: &str,
        start_height: u64,
        block_duration: Duration,
        emitted: Vec<Message>,
    ) -> Arc<Self> {
        let mut messages_by_height: HashMap<u64, Vec<Message>> = HashMap::new();
        for message in emitted {
            messages_by_height
                .entry(message.message_height)
                .or_default()
                .push(message);
        }
        Arc::new(Self {
            state: Arc::new(MockChainState {
                chain_id: chain_id.into(),
                head: AtomicU64::new(start_height),
                messages_by_height: Mutex::new(messages_by_height),
            }),
            block_duration,
            sync_config: BlockSyncConfig {
                start_height: 0,
                concurrency: 8,
                block_interval: block_duration,
                head_poll_interval: Duration::from_secs(1),
            },
            fail_deliveries: AtomicU64::new(0),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_next_deliveries(&self, count: u64) {
        self.fail_deliveries.store(count, Ordering::SeqCst);
    }

    /// Messages successfully delivered to this chain, in delivery order.
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().len()
    }
}

#[async_trait]
impl ChainProvider for MockProvider {
    fn chain_id(&self) -> String {
        self.state.chain_id.clone()
    }

    async fn query_latest_height(&self) -> Result<u64, ProviderError> {
        Ok(self.state.head.load(Ordering::SeqCst))
    }

    async fn listener(
        &self,
        token: CancellationToken,
        last_saved_height: u64,
        out: mpsc::Sender<BlockInfo>,
    ) -> Result<(), ProviderError> {
        // fake block production for the lifetime of the listener
        let producer = tokio::spawn({
            let state = Arc::clone(&self.state);
            let token = token.clone();
            let block_duration = self.block_duration;
            async move {
                let mut tick = tokio::time::interval(block_duration);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tick.tick() => {
                            state.head.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            }
        });

        let sync = BlockSync::new(Arc::clone(&self.state), self.sync_config.clone());
        let result = sync.run(token, last_saved_height, out).await;
        producer.abort();
        result
    }

    async fn should_send_message(&self, message: &Message) -> Result<bool, ProviderError> {
        // duplicate suppression: a delivered message needs no resend
        let already = self
            .received
            .lock()
            .iter()
            .any(|m| m.key() == message.key());
        Ok(!already)
    }

    async fn should_receive_message(&self, _message: &Message) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn route(&self, message: Message) -> Result<TxReceipt, ProviderError> {
        let remaining = self.fail_deliveries.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_deliveries.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::TxFailed(format!(
                "scripted failure delivering sn {}",
                message.sn
            )));
        }
        let receipt = TxReceipt {
            height: self.state.head.load(Ordering::SeqCst),
            tx_hash: format!("0x{:016x}", message.sn),
        };
        self.received.lock().push(message);
        Ok(receipt)
    }
}
