//! Swarm Module
//!
//! Owns the libp2p swarm: construction, and the single task that drives it
//! and executes commands from the membership handle.

mod builder;
mod event_loop;

pub use builder::build_swarm;
pub use event_loop::{spawn_event_loop, SwarmCommand, SwarmEventLoop};
