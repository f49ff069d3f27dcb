//! Error taxonomy for the persistence layer and the relay engine.

use thiserror::Error;

use crate::providers::ProviderError;

/// Failures surfaced by the key-value store and the stores built on it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,

    #[error("offset {offset} is out of range for {total} stored messages")]
    OffsetOutOfRange { offset: u64, total: u64 },

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] sled::Error),
}

/// Failures surfaced by the relayer orchestrator. Only listener failures are
/// fatal to the process; everything else is recovered or logged locally.
#[derive(Debug, Error)]
pub enum RelayerError {
    #[error("chain runtime not found, chain id: {0}")]
    ChainNotFound(String),

    #[error("message not found for chain {chain}, sn {sn}")]
    MessageNotFound { chain: String, sn: u64 },

    #[error("listener for chain {chain} failed: {source}")]
    Listener {
        chain: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
