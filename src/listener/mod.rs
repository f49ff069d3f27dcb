//! Block-synchronization engine.
//!
//! [`BlockSync`] converts one chain's height-indexed block stream into an
//! ordered, contiguous, deduplicated sequence of [`BlockInfo`] batches under
//! unreliable, concurrency-limited RPC access. Chain providers implement
//! [`BlockFetcher`] and run the engine from their `listener()` method.

use std::cmp;
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{
    BLOCK_HEIGHT_POLL_INTERVAL, BLOCK_INTERVAL, DEFAULT_BLOCK_FETCH_CONCURRENCY,
    FETCH_RETRY_ATTEMPTS, FETCH_RETRY_DELAY, MAX_BLOCK_FETCH_CONCURRENCY,
};
use crate::models::BlockInfo;
use crate::providers::ProviderError;

/// Per-height block access used by [`BlockSync`].
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    fn chain_id(&self) -> String;

    async fn latest_height(&self) -> Result<u64, ProviderError>;

    /// Fetches the header for `height` and, if the block carries relevant
    /// activity, its events. Must return
    /// [`ProviderError::HeightOutOfRange`] when the height does not exist
    /// yet.
    async fn fetch_block(&self, height: u64) -> Result<BlockInfo, ProviderError>;
}

/// Listener tuning, normally derived from [`crate::config::ChainConfig`].
#[derive(Debug, Clone)]
pub struct BlockSyncConfig {
    /// Height to start from when non-zero and below the chain head.
    pub start_height: u64,
    /// Concurrent per-height fetches per round.
    pub concurrency: usize,
    /// Optimistic head-advance tick.
    pub block_interval: std::time::Duration,
    /// True-head re-query interval.
    pub head_poll_interval: std::time::Duration,
}

impl Default for BlockSyncConfig {
    fn default() -> Self {
        Self {
            start_height: 0,
            concurrency: DEFAULT_BLOCK_FETCH_CONCURRENCY,
            block_interval: BLOCK_INTERVAL,
            head_poll_interval: BLOCK_HEIGHT_POLL_INTERVAL,
        }
    }
}

struct RoundOutcome {
    /// Maximal fetched prefix exactly contiguous with `next`, ascending.
    batches: Vec<BlockInfo>,
    /// Corrected head estimate after a height-overrun response.
    clamp: Option<u64>,
}

/// The per-chain block synchronization loop.
pub struct BlockSync<F> {
    fetcher: Arc<F>,
    config: BlockSyncConfig,
}

impl<F: BlockFetcher + 'static> BlockSync<F> {
    pub fn new(fetcher: Arc<F>, config: BlockSyncConfig) -> Self {
        let concurrency = config.concurrency.clamp(1, MAX_BLOCK_FETCH_CONCURRENCY);
        Self {
            fetcher,
            config: BlockSyncConfig {
                concurrency,
                ..config
            },
        }
    }

    /// Runs until `token` is cancelled or the downstream consumer goes away.
    ///
    /// Batches are released downstream one position behind the sync front:
    /// the most recently fetched batch is held back until the arrival of its
    /// successor confirms it (fixed single-block confirmation lag).
    pub async fn run(
        &self,
        token: CancellationToken,
        last_saved_height: u64,
        out: mpsc::Sender<BlockInfo>,
    ) -> Result<(), ProviderError> {
        let chain = self.fetcher.chain_id();
        let head = self.fetcher.latest_height().await?;
        let start = self.resolve_start_height(head, last_saved_height);
        info!(%chain, start_height = start, head, "starting block listener");

        let mut next = start;
        let mut latest = head;
        // confirmation-lag slot: delivered once the following batch arrives
        let mut last_unverified: Option<BlockInfo> = None;
        let mut pending: VecDeque<BlockInfo> = VecDeque::with_capacity(self.config.concurrency);

        let mut block_tick = interval_at(
            Instant::now() + self.config.block_interval,
            self.config.block_interval,
        );
        block_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut head_poll = interval_at(
            Instant::now() + self.config.head_poll_interval,
            self.config.head_poll_interval,
        );
        head_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if next < latest {
                if !pending.is_empty() {
                    // Heights parked here never advanced `next`, so they are
                    // re-fetched by the round that replaces them.
                    debug!(%chain, dropped = pending.len(), "discarding stale batches");
                    pending.clear();
                }

                let outcome = tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    outcome = self.fetch_round(next, latest) => outcome,
                };

                if let Some(clamp) = outcome.clamp {
                    if clamp < latest {
                        debug!(%chain, latest, clamp, "chain head over-estimated, clamping");
                        latest = clamp;
                    }
                }
                pending.extend(outcome.batches);

                while let Some(batch) = pending.pop_front() {
                    if let Some(confirmed) = last_unverified.take() {
                        debug!(%chain, height = confirmed.height, "releasing confirmed batch");
                        if out.send(confirmed).await.is_err() {
                            return Ok(());
                        }
                    }
                    last_unverified = Some(batch);
                    next += 1;
                }
                continue;
            }

            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = block_tick.tick() => {
                    latest += 1;
                }
                _ = head_poll.tick() => {
                    match self.fetcher.latest_height().await {
                        Ok(height) if height > latest => latest = height,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(%chain, error = %err, "failed to re-query chain head");
                        }
                    }
                }
            }
        }
    }

    /// Starting height, in priority order: configured start height, then the
    /// checkpoint, then the current head (cold start, backlog skipped). The
    /// first two apply only when non-zero and below the head.
    fn resolve_start_height(&self, head: u64, last_saved_height: u64) -> u64 {
        let configured = self.config.start_height;
        if configured > head {
            warn!(
                chain = %self.fetcher.chain_id(),
                start_height = configured,
                head,
                "configured start height is beyond the chain head"
            );
        }
        if configured != 0 && configured < head {
            return configured;
        }
        if last_saved_height != 0 && last_saved_height < head {
            return last_saved_height;
        }
        head
    }

    /// One fetch round: up to `concurrency` heights from `next`, each with a
    /// bounded retry budget. Heights that exhaust their budget are dropped
    /// for this round; `next` has not advanced past them, so the following
    /// round retries them.
    async fn fetch_round(&self, next: u64, latest: u64) -> RoundOutcome {
        let chain = self.fetcher.chain_id();
        let count = cmp::min(latest - next, self.config.concurrency as u64);

        let mut tasks = JoinSet::new();
        for height in next..next + count {
            let fetcher = Arc::clone(&self.fetcher);
            tasks.spawn(async move {
                let mut attempts = FETCH_RETRY_ATTEMPTS;
                loop {
                    match fetcher.fetch_block(height).await {
                        Ok(block) => return (height, Ok(block)),
                        Err(err @ ProviderError::HeightOutOfRange { .. }) => {
                            return (height, Err(err));
                        }
                        Err(err) => {
                            attempts -= 1;
                            if attempts == 0 {
                                return (height, Err(err));
                            }
                            debug!(height, error = %err, "retrying block fetch");
                            sleep(FETCH_RETRY_DELAY).await;
                        }
                    }
                }
            });
        }

        let mut fetched = Vec::with_capacity(count as usize);
        let mut clamp = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(block))) => fetched.push(block),
                Ok((height, Err(ProviderError::HeightOutOfRange { .. }))) => {
                    let below = height.saturating_sub(1);
                    clamp = Some(clamp.map_or(below, |c: u64| cmp::min(c, below)));
                }
                Ok((height, Err(err))) => {
                    warn!(%chain, height, error = %err, "dropping block fetch after retries");
                }
                Err(err) => {
                    warn!(%chain, error = %err, "block fetch task failed");
                }
            }
        }

        fetched.sort_by_key(|block| block.height);
        let mut batches = Vec::with_capacity(fetched.len());
        for (i, block) in fetched.into_iter().enumerate() {
            if block.height != next + i as u64 {
                break;
            }
            batches.push(block);
        }

        RoundOutcome { batches, clamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Deterministic fetcher: fixed head, optional per-height transient
    /// failure scripts.
    struct ScriptedFetcher {
        head: AtomicU64,
        // height -> remaining failures before the fetch succeeds
        failures: Mutex<HashMap<u64, u32>>,
    }

    impl ScriptedFetcher {
        fn new(head: u64) -> Self {
            Self {
                head: AtomicU64::new(head),
                failures: Mutex::new(HashMap::new()),
            }
        }

        fn fail_times(self, height: u64, times: u32) -> Self {
            self.failures.lock().insert(height, times);
            self
        }
    }

    #[async_trait]
    impl BlockFetcher for ScriptedFetcher {
        fn chain_id(&self) -> String {
            "mock-1".into()
        }

        async fn latest_height(&self) -> Result<u64, ProviderError> {
            Ok(self.head.load(Ordering::SeqCst))
        }

        async fn fetch_block(&self, height: u64) -> Result<BlockInfo, ProviderError> {
            if height > self.head.load(Ordering::SeqCst) {
                return Err(ProviderError::HeightOutOfRange { height });
            }
            if let Some(remaining) = self.failures.lock().get_mut(&height) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ProviderError::Rpc(format!("flaky fetch at {height}")));
                }
            }
            Ok(BlockInfo {
                height,
                messages: vec![],
            })
        }
    }

    fn sync(fetcher: ScriptedFetcher, start_height: u64) -> BlockSync<ScriptedFetcher> {
        BlockSync::new(
            Arc::new(fetcher),
            BlockSyncConfig {
                start_height,
                concurrency: 4,
                block_interval: Duration::from_millis(100),
                head_poll_interval: Duration::from_secs(60),
            },
        )
    }

    async fn collect_heights(
        sync: BlockSync<ScriptedFetcher>,
        want: usize,
    ) -> Vec<u64> {
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        let run_token = token.clone();
        let handle = tokio::spawn(async move { sync.run(run_token, 0, tx).await });

        let mut heights = Vec::new();
        while heights.len() < want {
            match rx.recv().await {
                Some(block) => heights.push(block.height),
                None => break,
            }
        }
        token.cancel();
        handle.await.unwrap().unwrap();
        heights
    }

    #[tokio::test(start_paused = true)]
    async fn emits_contiguous_heights_from_start() {
        let heights = collect_heights(sync(ScriptedFetcher::new(20), 10), 6).await;
        assert_eq!(heights, vec![10, 11, 12, 13, 14, 15]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_do_not_break_contiguity() {
        let fetcher = ScriptedFetcher::new(20)
            .fail_times(12, 2) // recovered within the per-fetch budget
            .fail_times(14, 5); // exhausts the budget, retried next round
        let heights = collect_heights(sync(fetcher, 10), 8).await;
        assert_eq!(heights, vec![10, 11, 12, 13, 14, 15, 16, 17]);
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_lag_holds_back_newest_batch() {
        // Head never moves: heights 10..14 get fetched, 14 stays unverified.
        let sync = sync(ScriptedFetcher::new(15), 10);
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        let run_token = token.clone();
        let handle = tokio::spawn(async move { sync.run(run_token, 0, tx).await });

        let mut heights = Vec::new();
        for _ in 0..4 {
            heights.push(rx.recv().await.unwrap().height);
        }
        assert_eq!(heights, vec![10, 11, 12, 13]);

        // The lag slot only opens once a successor exists; with the head
        // parked at 15 nothing else may arrive promptly.
        let extra =
            tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(extra.is_err());

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn head_overrun_clamps_latest_and_recovers() {
        // Optimistic ticking pushes `latest` past the real head; fetches
        // beyond it must clamp rather than spin, then progress resumes as
        // the head actually advances.
        let fetcher = Arc::new(ScriptedFetcher::new(12));
        let head = Arc::clone(&fetcher);
        let sync = BlockSync::new(
            fetcher,
            BlockSyncConfig {
                start_height: 10,
                concurrency: 4,
                block_interval: Duration::from_millis(10),
                head_poll_interval: Duration::from_secs(60),
            },
        );

        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        let run_token = token.clone();
        let handle = tokio::spawn(async move { sync.run(run_token, 0, tx).await });

        // let the fake chain produce blocks slower than the optimistic tick
        let producer = tokio::spawn({
            let head = Arc::clone(&head);
            async move {
                for _ in 0..8 {
                    tokio::time::sleep(Duration::from_millis(35)).await;
                    head.head.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let mut heights = Vec::new();
        while heights.len() < 6 {
            heights.push(rx.recv().await.unwrap().height);
        }
        assert_eq!(heights, vec![10, 11, 12, 13, 14, 15]);

        producer.await.unwrap();
        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_exits_cleanly() {
        let sync = sync(ScriptedFetcher::new(5), 0);
        let token = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(16);
        token.cancel();
        sync.run(token, 0, tx).await.unwrap();
    }

    #[test]
    fn start_height_resolution_priority() {
        let sync = sync(ScriptedFetcher::new(0), 50);
        // configured start below head wins
        assert_eq!(sync.resolve_start_height(100, 80), 50);

        let sync = super::BlockSync::new(
            Arc::new(ScriptedFetcher::new(0)),
            BlockSyncConfig {
                start_height: 0,
                ..BlockSyncConfig::default()
            },
        );
        // checkpoint wins when no configured start
        assert_eq!(sync.resolve_start_height(100, 80), 80);
        // cold start: no config, no checkpoint
        assert_eq!(sync.resolve_start_height(100, 0), 100);
        // stale values at or beyond the head fall through to the head
        assert_eq!(sync.resolve_start_height(100, 100), 100);
        assert_eq!(sync.resolve_start_height(100, 120), 100);
    }
}
