//! Message and block types observed on-chain and relayed across chains.

use serde::{Deserialize, Serialize};

/// An application message emitted on a source chain, destined for another
/// chain. Immutable once observed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub src: String,
    pub dst: String,
    pub sn: u64,
    pub data: Vec<u8>,
    #[serde(rename = "messageHeight")]
    pub message_height: u64,
    #[serde(rename = "eventType")]
    pub event_type: String,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.sn, &self.src, &self.dst, &self.event_type)
    }
}

/// Unique identity of a message. Two messages with identical keys are the
/// same logical event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
    pub sn: u64,
    pub src: String,
    pub dst: String,
    pub event_type: String,
}

impl MessageKey {
    pub fn new(
        sn: u64,
        src: impl Into<String>,
        dst: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            sn,
            src: src.into(),
            dst: dst.into(),
            event_type: event_type.into(),
        }
    }
}

/// A [`Message`] plus mutable relay state. Owned by the per-chain
/// [`super::MessageCache`] while in flight; ownership moves to the message
/// store on escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMessage {
    pub message: Message,
    pub retry: u64,
    pub is_processing: bool,
}

impl RouteMessage {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            retry: 0,
            is_processing: false,
        }
    }

    pub fn key(&self) -> MessageKey {
        self.message.key()
    }
}

/// The unit emitted by a chain listener: one block's height and the relay
/// messages discovered in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInfo {
    pub height: u64,
    pub messages: Vec<Message>,
}
