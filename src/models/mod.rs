//! Domain types shared across the relay engine.

mod cache;
mod error;
mod message;

pub use cache::*;
pub use error::*;
pub use message::*;
