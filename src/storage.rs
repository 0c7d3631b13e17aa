//! User record storage.
//!
//! The gateway only talks to users through the [`UserStore`] trait. The
//! server ships with [`MemoryUserStore`], a thread-safe in-process store;
//! a database-backed store plugs in behind the same trait.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Identifier issued to a user on creation.
pub type UserId = u64;

/// A stored user
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Storage failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The username is already registered.
    #[error("username already taken: {0}")]
    UsernameTaken(String),

    /// The backing store could not serve the request.
    #[error("user store unavailable: {0}")]
    Unavailable(String),
}

/// Operations the server needs from a user store.
pub trait UserStore: Send + Sync {
    #[allow(dead_code)]
    fn lookup_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    fn is_username_taken(&self, username: &str) -> Result<bool, StoreError>;

    /// Create a user and return its fresh id.
    ///
    /// Must fail with [`StoreError::UsernameTaken`] rather than issue a
    /// second id for a name that already exists, even under concurrent
    /// calls.
    fn create_user(&self, username: &str) -> Result<UserId, StoreError>;

    /// Remove a user, returning whether it existed.
    fn delete_user(&self, id: UserId) -> Result<bool, StoreError>;
}

/// Thread-safe in-memory user store
pub struct MemoryUserStore {
    /// Users keyed by username
    users: RwLock<HashMap<String, User>>,
    /// Next id to hand out
    next_id: AtomicU64,
}

impl MemoryUserStore {
    /// Create a new, empty store
    pub fn new() -> Arc<Self> {
        info!("Initializing in-memory user store");
        Arc::new(Self {
            users: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Number of stored users
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.users.read().map(|users| users.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

impl UserStore for MemoryUserStore {
    fn lookup_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.get(username).cloned())
    }

    fn is_username_taken(&self, username: &str) -> Result<bool, StoreError> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.contains_key(username))
    }

    fn create_user(&self, username: &str) -> Result<UserId, StoreError> {
        // Check and insert under one write lock.
        let mut users = self.users.write().map_err(poisoned)?;
        if users.contains_key(username) {
            return Err(StoreError::UsernameTaken(username.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        users.insert(
            username.to_string(),
            User {
                id,
                username: username.to_string(),
                created_at: Utc::now(),
            },
        );

        debug!(user_id = id, username, "User created");
        Ok(id)
    }

    fn delete_user(&self, id: UserId) -> Result<bool, StoreError> {
        let mut users = self.users.write().map_err(poisoned)?;
        let before = users.len();
        users.retain(|_, user| user.id != id);
        let removed = users.len() != before;
        if removed {
            trace!(user_id = id, "User deleted");
        }
        Ok(removed)
    }
}
