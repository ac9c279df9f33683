//! Client Messages
//!
//! The addressed message that clients submit and receive. The same structure
//! travels between nodes inside a [`PeerEnvelope`](crate::PeerEnvelope); the
//! node-only fields (`origNodeName`, `hops`) are omitted from the JSON when
//! unset so clients never see them on locally delivered messages.

use crate::error::{ClientIdError, CodecError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Opaque client identifier chosen by the connecting client.
pub type ClientId = String;

/// Longest accepted client id, in bytes.
pub const MAX_CLIENT_ID_LEN: usize = 256;

/// Hint about how the payload should be interpreted. Never validated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    #[default]
    String,
    Json,
}

/// An addressed message.
///
/// An empty `to` list addresses every client (broadcast).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Optional correlation id supplied by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub to: Vec<ClientId>,

    #[serde(default)]
    pub from: ClientId,

    #[serde(default, with = "base64_bytes")]
    pub payload: Vec<u8>,

    #[serde(default)]
    pub payload_type: PayloadType,

    /// Name of the node that forwarded this copy, set only between nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_node_name: Option<String>,

    /// Number of node-to-node hops taken so far
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hops: u8,
}

fn is_zero(hops: &u8) -> bool {
    *hops == 0
}

impl Message {
    pub fn new(to: Vec<ClientId>, from: impl Into<ClientId>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: None,
            to,
            from: from.into(),
            payload: payload.into(),
            payload_type: PayloadType::default(),
            orig_node_name: None,
            hops: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload_type(mut self, payload_type: PayloadType) -> Self {
        self.payload_type = payload_type;
        self
    }

    /// True when the message addresses every client.
    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    /// True when the message arrived from another node.
    pub fn is_from_peer(&self) -> bool {
        self.orig_node_name.is_some()
    }

    /// Recipients in submission order with duplicates removed.
    pub fn recipients(&self) -> Vec<&ClientId> {
        let mut seen = HashSet::with_capacity(self.to.len());
        self.to.iter().filter(|id| seen.insert(id.as_str())).collect()
    }

    /// Copy of this message addressed to `recipient` alone, stamped with the
    /// forwarding node. The original `to` list is left untouched.
    pub fn narrowed_for(&self, recipient: &str, origin: &str) -> Self {
        Self {
            to: vec![recipient.to_string()],
            ..self.forwarded_by(origin)
        }
    }

    /// Copy of this message stamped with the forwarding node and one more hop.
    pub fn forwarded_by(&self, origin: &str) -> Self {
        Self {
            orig_node_name: Some(origin.to_string()),
            hops: self.hops.saturating_add(1),
            ..self.clone()
        }
    }

    /// The message as a client sees it, without node-to-node fields.
    pub fn into_client_view(mut self) -> Self {
        self.orig_node_name = None;
        self.hops = 0;
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a message, rejecting frames larger than `limit` bytes.
    pub fn from_json(bytes: &[u8], limit: usize) -> Result<Self, CodecError> {
        if bytes.len() > limit {
            return Err(CodecError::TooLarge {
                size: bytes.len(),
                limit,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Check a client id supplied on connect.
pub fn validate_client_id(id: &str) -> Result<(), ClientIdError> {
    if id.is_empty() {
        return Err(ClientIdError::Empty);
    }
    if id.len() > MAX_CLIENT_ID_LEN {
        return Err(ClientIdError::TooLong {
            len: id.len(),
            max: MAX_CLIENT_ID_LEN,
        });
    }
    if let Some(c) = id.chars().find(|c| c.is_control() || c.is_whitespace()) {
        return Err(ClientIdError::InvalidCharacter(c));
    }
    Ok(())
}

/// Serde adapter carrying raw bytes as standard base64 text.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(text) => STANDARD.decode(text.as_bytes()).map_err(de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 64 * 1024;

    #[test]
    fn test_payload_is_base64_on_the_wire() {
        let msg = Message::new(vec!["c2".into()], "c1", "hi");
        let json: serde_json::Value = serde_json::from_slice(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["payload"], "aGk=");
        assert_eq!(json["payloadType"], "string");
        assert!(json.get("origNodeName").is_none());
        assert!(json.get("hops").is_none());
    }

    #[test]
    fn test_decode_client_frame_with_defaults() {
        let frame = br#"{"to":["a","b"],"payload":"aGk="}"#;
        let msg = Message::from_json(frame, LIMIT).unwrap();

        assert_eq!(msg.to, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(msg.payload, b"hi");
        assert_eq!(msg.payload_type, PayloadType::String);
        assert!(msg.from.is_empty());
        assert!(!msg.is_from_peer());
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let frame = br#"{"to":["a"],"payload":"***"}"#;
        assert!(matches!(
            Message::from_json(frame, LIMIT),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let frame = br#"{"to":["a"],"payload":"aGk="}"#;
        assert!(matches!(
            Message::from_json(frame, 8),
            Err(CodecError::TooLarge { limit: 8, .. })
        ));
    }

    #[test]
    fn test_narrowed_copy_leaves_original_untouched() {
        let msg = Message::new(vec!["x".into(), "y".into()], "c1", "hi").with_id("m-1");
        let copy = msg.narrowed_for("y", "node-a");

        assert_eq!(copy.to, vec!["y".to_string()]);
        assert_eq!(copy.orig_node_name.as_deref(), Some("node-a"));
        assert_eq!(copy.hops, 1);
        assert_eq!(copy.id.as_deref(), Some("m-1"));
        assert_eq!(copy.payload, msg.payload);

        assert_eq!(msg.to.len(), 2);
        assert!(msg.orig_node_name.is_none());
        assert_eq!(msg.hops, 0);

        let delivered = copy.into_client_view();
        assert!(delivered.orig_node_name.is_none());
        assert_eq!(delivered.hops, 0);
        assert_eq!(delivered.to, vec!["y".to_string()]);
    }

    #[test]
    fn test_recipients_are_deduplicated_in_order() {
        let msg = Message::new(vec!["b".into(), "a".into(), "b".into()], "c1", "");
        assert_eq!(msg.recipients(), vec!["b", "a"]);
    }

    #[test]
    fn test_validate_client_id() {
        assert!(validate_client_id("client-42").is_ok());
        assert_eq!(validate_client_id(""), Err(ClientIdError::Empty));
        assert_eq!(
            validate_client_id("a b"),
            Err(ClientIdError::InvalidCharacter(' '))
        );
        let long = "x".repeat(MAX_CLIENT_ID_LEN + 1);
        assert!(matches!(
            validate_client_id(&long),
            Err(ClientIdError::TooLong { .. })
        ));
    }
}
