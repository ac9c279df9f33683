//! Core shared types for relaymesh
//!
//! This crate contains the wire types exchanged by relaymesh nodes and their
//! clients: addressed messages, presence events and the peer envelope that
//! multiplexes both over a single inter-node channel.

pub mod envelope;
pub mod error;
pub mod message;
pub mod presence;

pub use envelope::PeerEnvelope;
pub use error::{ClientIdError, CodecError};
pub use message::{validate_client_id, ClientId, Message, PayloadType, MAX_CLIENT_ID_LEN};
pub use presence::{PresenceEvent, PresenceOp};
