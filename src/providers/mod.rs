//! The contract between the relay engine and chain-specific integrations.
//!
//! One [`ChainProvider`] is implemented per chain family (RPC bindings,
//! transaction signing and submission live there). The engine only consumes
//! this surface: it runs the provider's listener, asks it whether a message
//! still needs sending, and hands it messages to deliver.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{BlockInfo, Message};

/// Provider-side failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The queried height does not exist yet. Listeners treat this as a
    /// signal that the assumed chain head over-shot, not as retryable.
    #[error("requested height {height} beyond current chain height")]
    HeightOutOfRange { height: u64 },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("transaction failed: {0}")]
    TxFailed(String),
}

/// Receipt for a delivered message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxReceipt {
    pub height: u64,
    pub tx_hash: String,
}

/// Chain-family integration consumed by the relay engine.
///
/// `route` returns its outcome directly rather than invoking a completion
/// callback, so exactly-once completion per dispatch is enforced by the
/// type rather than by caller discipline.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    fn chain_id(&self) -> String;

    async fn query_latest_height(&self) -> Result<u64, ProviderError>;

    /// Runs the chain's block-synchronization loop, emitting gap-free
    /// [`BlockInfo`] batches on `out` until cancelled. Implementations
    /// typically instantiate [`crate::listener::BlockSync`].
    async fn listener(
        &self,
        token: CancellationToken,
        last_saved_height: u64,
        out: mpsc::Sender<BlockInfo>,
    ) -> Result<(), ProviderError>;

    /// Whether `message` should still be sent to this chain. Providers use
    /// this for duplicate suppression, e.g. an on-chain receipt check.
    async fn should_send_message(&self, message: &Message) -> Result<bool, ProviderError>;

    /// Whether this chain should accept `message` from its source.
    async fn should_receive_message(&self, message: &Message) -> Result<bool, ProviderError>;

    /// Delivers `message` on chain.
    async fn route(&self, message: Message) -> Result<TxReceipt, ProviderError>;
}

#[cfg(test)]
mockall::mock! {
    pub ChainProvider {}

    #[async_trait]
    impl ChainProvider for ChainProvider {
        fn chain_id(&self) -> String;
        async fn query_latest_height(&self) -> Result<u64, ProviderError>;
        async fn listener(
            &self,
            token: CancellationToken,
            last_saved_height: u64,
            out: mpsc::Sender<BlockInfo>,
        ) -> Result<(), ProviderError>;
        async fn should_send_message(&self, message: &Message) -> Result<bool, ProviderError>;
        async fn should_receive_message(&self, message: &Message) -> Result<bool, ProviderError>;
        async fn route(&self, message: Message) -> Result<TxReceipt, ProviderError>;
    }
}
