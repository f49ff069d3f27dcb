//! # xrelay
//!
//! Relay engine for application messages between independent blockchains.
//! Each configured chain gets a block-synchronization listener that turns the
//! chain's block stream into an ordered, gap-free sequence of message batches;
//! discovered messages are cached in memory, checkpointed, and routed to their
//! destination chain with bounded retries and durable fallback storage.
//!
//! Chain-specific RPC, signing and submission live behind the
//! [`providers::ChainProvider`] trait; the embedding process supplies one
//! provider per chain family and drives the engine through [`relayer::start`].

pub mod config;
pub mod constants;
pub mod listener;
pub mod models;
pub mod providers;
pub mod relayer;
pub mod stores;

pub use models::{BlockInfo, Message, MessageCache, MessageKey, RelayerError, RouteMessage};
pub use providers::{ChainProvider, ProviderError, TxReceipt};
pub use relayer::{start, Relayer};
pub use stores::{BlockStore, KeyValueStore, MessageStore, Pagination, SledDb, StoreError};
