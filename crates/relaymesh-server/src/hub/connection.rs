//! Connection Handles
//!
//! A handle is the hub's side of one attached client: its id, a unique
//! connection id, and the sending half of its bounded outbound queue. The
//! directory holds the only long-lived copy, so removing the entry closes the
//! queue and the connection's write pump drains and exits.

use relaymesh_core::{ClientId, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    Full,
    Closed,
}

impl EnqueueError {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueueError::Full => "queue_full",
            EnqueueError::Closed => "queue_closed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub client_id: ClientId,
    tx: mpsc::Sender<Message>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    pub fn channel(
        client_id: impl Into<ClientId>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::next(),
            client_id: client_id.into(),
            tx,
        };
        (handle, rx)
    }

    /// Enqueue without waiting.
    pub fn try_enqueue(&self, message: Message) -> Result<(), EnqueueError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_preserves_order_until_full() {
        let (handle, mut rx) = ConnectionHandle::channel("c1", 2);
        handle.try_enqueue(Message::new(vec!["c1".into()], "a", "1")).unwrap();
        handle.try_enqueue(Message::new(vec!["c1".into()], "a", "2")).unwrap();
        assert_eq!(
            handle.try_enqueue(Message::new(vec!["c1".into()], "a", "3")),
            Err(EnqueueError::Full)
        );

        assert_eq!(rx.recv().await.unwrap().payload, b"1");
        assert_eq!(rx.recv().await.unwrap().payload, b"2");
    }

    #[test]
    fn test_closed_when_receiver_dropped() {
        let (handle, rx) = ConnectionHandle::channel("c1", 2);
        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(
            handle.try_enqueue(Message::new(Vec::new(), "a", "x")),
            Err(EnqueueError::Closed)
        );
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::next(), ConnectionId::next());
    }
}
