//! Network Type Definitions
//!
//! Peer state tracked by the libp2p membership layer.

mod peer;
mod state;

pub use peer::{ConnectionStatus, PeerInfo};
pub use state::{short_id, MemberTable, PeerConnectionState};
