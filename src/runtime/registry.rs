//! Registry of live connections.
//!
//! Shared by every connection worker behind a single mutex. Besides the
//! live sessions it holds the logged-in table (user id to connection),
//! which is the only authority on whether a user is logged in.
//!
//! Messages for other connections go through each connection's outbound
//! channel; the registry never touches a socket itself.

use bytes::Bytes;
use slab::Slab;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::storage::UserId;

/// Key of a connection in the registry.
pub type ConnectionId = usize;

/// Sender half of a connection's outbound queue.
pub type Outbound = mpsc::UnboundedSender<Bytes>;

/// A registered connection.
#[derive(Debug)]
struct Entry {
    peer: SocketAddr,
    user_id: Option<UserId>,
    outbound: Outbound,
}

#[derive(Debug, Default)]
struct Inner {
    connections: Slab<Entry>,
    logged_in: HashMap<UserId, ConnectionId>,
}

/// Thread-safe registry of live connections and logged-in users.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a newly accepted connection.
    pub fn register(&self, peer: SocketAddr, outbound: Outbound) -> ConnectionId {
        let mut inner = self.lock();
        let id = inner.connections.insert(Entry {
            peer,
            user_id: None,
            outbound,
        });
        debug!(conn = id, peer = %peer, live = inner.connections.len(), "Connection registered");
        id
    }

    /// Remove a connection, logging its user out.
    ///
    /// Returns false if the connection was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.connections.try_remove(id) else {
            return false;
        };
        if let Some(user_id) = entry.user_id {
            if inner.logged_in.get(&user_id) == Some(&id) {
                inner.logged_in.remove(&user_id);
            }
        }
        debug!(conn = id, peer = %entry.peer, live = inner.connections.len(), "Connection unregistered");
        true
    }

    /// Mark `user_id` as logged in on connection `id`.
    ///
    /// Fails if the connection is gone, already has a user, or the user is
    /// logged in elsewhere.
    pub fn login(&self, id: ConnectionId, user_id: UserId) -> bool {
        let mut inner = self.lock();
        if inner.logged_in.contains_key(&user_id) {
            return false;
        }
        match inner.connections.get_mut(id) {
            Some(entry) if entry.user_id.is_none() => entry.user_id = Some(user_id),
            _ => return false,
        }
        inner.logged_in.insert(user_id, id);
        trace!(conn = id, user_id, "User logged in");
        true
    }

    /// Whether `user_id` is logged in on connection `id`.
    pub fn is_logged_in(&self, id: ConnectionId, user_id: UserId) -> bool {
        self.lock().logged_in.get(&user_id) == Some(&id)
    }

    /// Number of logged-in users.
    pub fn logged_in_count(&self) -> usize {
        self.lock().logged_in.len()
    }

    /// Queue `message` for every connection of the given users.
    ///
    /// Returns the number of connections the message was queued for.
    pub fn notify(&self, user_ids: &[UserId], message: &Bytes) -> usize {
        let inner = self.lock();
        user_ids
            .iter()
            .filter_map(|user_id| inner.logged_in.get(user_id))
            .filter_map(|&id| inner.connections.get(id))
            .filter(|entry| entry.outbound.send(message.clone()).is_ok())
            .count()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    /// Check if there are no live connections.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().connections.is_empty()
    }
}
