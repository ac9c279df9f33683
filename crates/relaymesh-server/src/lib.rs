//! Relaymesh Server Library
//!
//! A clustered relay: clients attach over WebSocket to any node and exchange
//! addressed messages as if they shared one server.

pub mod api;
pub mod hub;
pub mod network;
pub mod observability;
pub mod version;
