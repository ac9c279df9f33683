//! Client Directory
//!
//! Concurrent map from client id to where that client is attached: here, as a
//! connection handle, or on a named remote node. The hub actor is the only
//! writer; the API and anti-entropy read it concurrently.
//!
//! Unguarded writers are last-writer-wins. Presence updates go through the
//! guarded writers so a peer's view never overwrites a local attachment.

use super::connection::{ConnectionHandle, ConnectionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relaymesh_core::ClientId;
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum Location {
    Local(ConnectionHandle),
    Remote(String),
}

impl Location {
    pub fn is_local(&self) -> bool {
        matches!(self, Location::Local(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryStats {
    pub local: usize,
    pub remote: usize,
}

#[derive(Debug, Default)]
pub struct Directory {
    entries: DashMap<ClientId, Location>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, client_id: &str) -> Option<Location> {
        self.entries.get(client_id).map(|e| e.value().clone())
    }

    /// Unconditional write. Returns the previous location.
    pub fn set(&self, client_id: impl Into<ClientId>, location: Location) -> Option<Location> {
        self.entries.insert(client_id.into(), location)
    }

    pub fn remove(&self, client_id: &str) -> Option<Location> {
        self.entries.remove(client_id).map(|(_, location)| location)
    }

    /// Record remote ownership unless the client is attached here.
    ///
    /// Returns the previous remote owner (`Some(None)` for a new entry), or
    /// `None` when a local entry blocked the write.
    pub fn set_remote_unless_local(&self, client_id: &str, node: &str) -> Option<Option<String>> {
        match self.entries.entry(client_id.to_string()) {
            Entry::Occupied(mut entry) => match entry.get() {
                Location::Local(_) => None,
                Location::Remote(prev) => {
                    let prev = prev.clone();
                    entry.insert(Location::Remote(node.to_string()));
                    Some(Some(prev))
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(Location::Remote(node.to_string()));
                Some(None)
            }
        }
    }

    /// Remove the entry only if it points at a remote node. Returns that node.
    pub fn remove_if_remote(&self, client_id: &str) -> Option<String> {
        self.entries
            .remove_if(client_id, |_, location| !location.is_local())
            .and_then(|(_, location)| match location {
                Location::Remote(node) => Some(node),
                Location::Local(_) => None,
            })
    }

    /// Remove the entry only if it is this exact local connection.
    pub fn remove_if_local_connection(
        &self,
        client_id: &str,
        connection: ConnectionId,
    ) -> Option<ConnectionHandle> {
        self.entries
            .remove_if(client_id, |_, location| {
                matches!(location, Location::Local(handle) if handle.id == connection)
            })
            .and_then(|(_, location)| match location {
                Location::Local(handle) => Some(handle),
                Location::Remote(_) => None,
            })
    }

    /// Drop every entry owned by `node`. Returns the ids removed.
    pub fn purge_node(&self, node: &str) -> Vec<ClientId> {
        let mut purged = Vec::new();
        self.entries.retain(|client_id, location| match location {
            Location::Remote(owner) if owner.as_str() == node => {
                purged.push(client_id.clone());
                false
            }
            _ => true,
        });
        purged
    }

    pub fn for_each_local(&self, mut f: impl FnMut(&ClientId, &ConnectionHandle)) {
        for entry in self.entries.iter() {
            if let Location::Local(handle) = entry.value() {
                f(entry.key(), handle);
            }
        }
    }

    pub fn for_each_remote(&self, mut f: impl FnMut(&ClientId, &str)) {
        for entry in self.entries.iter() {
            if let Location::Remote(node) = entry.value() {
                f(entry.key(), node);
            }
        }
    }

    /// Snapshot of locally attached ids.
    pub fn local_ids(&self) -> Vec<ClientId> {
        let mut ids = Vec::new();
        self.for_each_local(|id, _| ids.push(id.clone()));
        ids
    }

    /// Snapshot of local connection handles.
    pub fn local_handles(&self) -> Vec<ConnectionHandle> {
        let mut handles = Vec::new();
        self.for_each_local(|_, handle| handles.push(handle.clone()));
        handles
    }

    pub fn stats(&self) -> DirectoryStats {
        let mut stats = DirectoryStats::default();
        for entry in self.entries.iter() {
            match entry.value() {
                Location::Local(_) => stats.local += 1,
                Location::Remote(_) => stats.remote += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
