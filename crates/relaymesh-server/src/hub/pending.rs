//! Pending Buffer
//!
//! Messages for clients the directory does not know yet. Entries are held per
//! client in arrival order and released the moment the client resolves,
//! locally or on a peer. Bounded per client and in distinct clients, and aged
//! out after a TTL.

use super::config::{HubConfig, OverflowPolicy};
use relaymesh_core::{ClientId, Message};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    Buffered,
    /// Buffered after evicting the oldest entry for this client
    DroppedOldest,
    /// Rejected because this client's queue is full
    DroppedNewest,
    /// Rejected because too many distinct clients are waiting
    TooManyClients,
}

impl BufferOutcome {
    pub fn dropped(&self) -> bool {
        !matches!(self, BufferOutcome::Buffered)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BufferOutcome::Buffered => "buffered",
            BufferOutcome::DroppedOldest => "drop_oldest",
            BufferOutcome::DroppedNewest => "drop_newest",
            BufferOutcome::TooManyClients => "too_many_clients",
        }
    }
}

#[derive(Debug)]
struct Pending {
    message: Message,
    queued_at: Instant,
}

#[derive(Debug)]
pub struct PendingBuffer {
    queues: HashMap<ClientId, VecDeque<Pending>>,
    per_client: usize,
    max_clients: usize,
    ttl: Duration,
    policy: OverflowPolicy,
    total: usize,
}

impl PendingBuffer {
    pub fn new(per_client: usize, max_clients: usize, ttl: Duration, policy: OverflowPolicy) -> Self {
        Self {
            queues: HashMap::new(),
            per_client: per_client.max(1),
            max_clients,
            ttl,
            policy,
            total: 0,
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(
            config.pending_per_client,
            config.pending_max_clients,
            config.pending_ttl,
            config.overflow_policy,
        )
    }

    pub fn push(&mut self, client_id: &str, message: Message) -> BufferOutcome {
        if !self.queues.contains_key(client_id) && self.queues.len() >= self.max_clients {
            return BufferOutcome::TooManyClients;
        }

        let queue = self.queues.entry(client_id.to_string()).or_default();
        let mut outcome = BufferOutcome::Buffered;
        if queue.len() >= self.per_client {
            match self.policy {
                OverflowPolicy::DropNewest => return BufferOutcome::DroppedNewest,
                OverflowPolicy::DropOldest => {
                    queue.pop_front();
                    self.total -= 1;
                    outcome = BufferOutcome::DroppedOldest;
                }
            }
        }
        queue.push_back(Pending {
            message,
            queued_at: Instant::now(),
        });
        self.total += 1;
        outcome
    }

    /// Remove and return everything waiting for `client_id`, oldest first.
    pub fn take(&mut self, client_id: &str) -> Vec<Message> {
        match self.queues.remove(client_id) {
            Some(queue) => {
                self.total -= queue.len();
                queue.into_iter().map(|p| p.message).collect()
            }
            None => Vec::new(),
        }
    }

    /// Drop entries older than the TTL. Returns how many were dropped.
    pub fn expire(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut expired = 0;
        self.queues.retain(|_, queue| {
            while queue
                .front()
                .is_some_and(|p| now.saturating_duration_since(p.queued_at) >= ttl)
            {
                queue.pop_front();
                expired += 1;
            }
            !queue.is_empty()
        });
        self.total -= expired;
        expired
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.queues.contains_key(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.queues.len()
    }

    pub fn message_count(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(payload: &str) -> Message {
        Message::new(vec!["x".into()], "a", payload)
    }

    fn payloads(messages: Vec<Message>) -> Vec<Vec<u8>> {
        messages.into_iter().map(|m| m.payload).collect()
    }

    #[test]
    fn test_take_returns_fifo_and_clears() {
        let mut buffer = PendingBuffer::new(8, 8, Duration::from_secs(60), OverflowPolicy::DropOldest);
        buffer.push("x", msg("1"));
        buffer.push("x", msg("2"));
        buffer.push("y", msg("3"));

        assert_eq!(payloads(buffer.take("x")), vec![b"1".to_vec(), b"2".to_vec()]);
        assert!(!buffer.contains("x"));
        assert_eq!(buffer.message_count(), 1);
        assert!(buffer.take("x").is_empty());
    }

    #[test]
    fn test_drop_oldest_policy() {
        let mut buffer = PendingBuffer::new(2, 8, Duration::from_secs(60), OverflowPolicy::DropOldest);
        buffer.push("x", msg("1"));
        buffer.push("x", msg("2"));
        assert_eq!(buffer.push("x", msg("3")), BufferOutcome::DroppedOldest);

        assert_eq!(payloads(buffer.take("x")), vec![b"2".to_vec(), b"3".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drop_newest_policy() {
        let mut buffer = PendingBuffer::new(2, 8, Duration::from_secs(60), OverflowPolicy::DropNewest);
        buffer.push("x", msg("1"));
        buffer.push("x", msg("2"));
        assert_eq!(buffer.push("x", msg("3")), BufferOutcome::DroppedNewest);

        assert_eq!(payloads(buffer.take("x")), vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn test_distinct_client_bound() {
        let mut buffer = PendingBuffer::new(2, 1, Duration::from_secs(60), OverflowPolicy::DropOldest);
        assert_eq!(buffer.push("x", msg("1")), BufferOutcome::Buffered);
        assert_eq!(buffer.push("y", msg("2")), BufferOutcome::TooManyClients);
        assert_eq!(buffer.push("x", msg("3")), BufferOutcome::Buffered);
        assert_eq!(buffer.client_count(), 1);
    }

    #[test]
    fn test_expire_drops_old_entries() {
        let mut buffer = PendingBuffer::new(8, 8, Duration::from_secs(30), OverflowPolicy::DropOldest);
        buffer.push("x", msg("1"));
        buffer.push("y", msg("2"));

        assert_eq!(buffer.expire(Instant::now()), 0);
        assert_eq!(buffer.expire(Instant::now() + Duration::from_secs(31)), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.client_count(), 0);
    }
}
