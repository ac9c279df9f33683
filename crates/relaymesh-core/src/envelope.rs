//! Peer Envelope
//!
//! Every payload exchanged between nodes is one of these, encoded as
//! `{"kind": "presence" | "message", "body": {...}}`. The receiver dispatches
//! on `kind` rather than guessing the body type.

use crate::error::CodecError;
use crate::message::Message;
use crate::presence::PresenceEvent;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "lowercase")]
pub enum PeerEnvelope {
    Presence(PresenceEvent),
    Message(Message),
}

impl PeerEnvelope {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerEnvelope::Presence(_) => "presence",
            PeerEnvelope::Message(_) => "message",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a peer frame, rejecting frames larger than `limit` bytes.
    pub fn decode(bytes: &[u8], limit: usize) -> Result<Self, CodecError> {
        if bytes.len() > limit {
            return Err(CodecError::TooLarge {
                size: bytes.len(),
                limit,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<PresenceEvent> for PeerEnvelope {
    fn from(event: PresenceEvent) -> Self {
        PeerEnvelope::Presence(event)
    }
}

impl From<Message> for PeerEnvelope {
    fn from(message: Message) -> Self {
        PeerEnvelope::Message(message)
    }
}
