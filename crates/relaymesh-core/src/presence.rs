//! Presence Events
//!
//! Announcements that a set of client ids attached to, or detached from, a
//! named node. A single id is sent on every local connect and disconnect;
//! anti-entropy sends the full local set as chunked `Add` events.

use crate::message::ClientId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub op: PresenceOp,
    #[serde(rename = "clientIDs")]
    pub client_ids: BTreeSet<ClientId>,
    /// Node the clients are attached to
    pub node_name: String,
}

impl PresenceEvent {
    pub fn new(
        op: PresenceOp,
        node_name: impl Into<String>,
        client_ids: impl IntoIterator<Item = ClientId>,
    ) -> Self {
        Self {
            op,
            client_ids: client_ids.into_iter().collect(),
            node_name: node_name.into(),
        }
    }

    pub fn add(node_name: impl Into<String>, client_id: impl Into<ClientId>) -> Self {
        Self::new(PresenceOp::Add, node_name, [client_id.into()])
    }

    pub fn remove(node_name: impl Into<String>, client_id: impl Into<ClientId>) -> Self {
        Self::new(PresenceOp::Remove, node_name, [client_id.into()])
    }

    pub fn is_empty(&self) -> bool {
        self.client_ids.is_empty()
    }

    /// Split a full snapshot into `Add` events of at most `chunk` ids each.
    pub fn snapshot(node_name: &str, client_ids: Vec<ClientId>, chunk: usize) -> Vec<Self> {
        client_ids
            .chunks(chunk.max(1))
            .map(|ids| Self::new(PresenceOp::Add, node_name, ids.iter().cloned()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let event = PresenceEvent::add("node-a", "c1");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["op"], "add");
        assert_eq!(json["clientIDs"], serde_json::json!(["c1"]));
        assert_eq!(json["nodeName"], "node-a");
    }

    #[test]
    fn test_snapshot_chunks() {
        let ids: Vec<ClientId> = (0..5).map(|i| format!("c{i}")).collect();
        let events = PresenceEvent::snapshot("node-a", ids, 2);

        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.op == PresenceOp::Add));
        assert_eq!(events[2].client_ids.len(), 1);
    }

    #[test]
    fn test_empty_snapshot_yields_nothing() {
        assert!(PresenceEvent::snapshot("node-a", Vec::new(), 16).is_empty());
    }
}
