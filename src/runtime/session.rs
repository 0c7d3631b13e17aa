//! Per-connection session state.
//!
//! A session is owned by its connection worker and never shared. It holds
//! the framing buffer and the id of the user the connection logged in as;
//! whether that user is still logged in is decided by the registry.

use std::net::SocketAddr;

use super::registry::ConnectionId;
use crate::protocol::FrameDecoder;
use crate::storage::UserId;

/// Authentication state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated(UserId),
}

/// State of one client connection.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    peer: SocketAddr,
    pub decoder: FrameDecoder,
    auth: AuthState,
}

impl Session {
    /// Create an anonymous session for a newly accepted connection.
    pub fn new(id: ConnectionId, peer: SocketAddr, max_frame_bytes: usize) -> Self {
        Self {
            id,
            peer,
            decoder: FrameDecoder::new(max_frame_bytes),
            auth: AuthState::Anonymous,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn auth(&self) -> AuthState {
        self.auth
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self.auth {
            AuthState::Anonymous => None,
            AuthState::Authenticated(id) => Some(id),
        }
    }

    /// Move from `Anonymous` to `Authenticated`.
    ///
    /// Returns false, leaving the state untouched, if the session is
    /// already authenticated.
    pub fn authenticate(&mut self, user_id: UserId) -> bool {
        match self.auth {
            AuthState::Anonymous => {
                self.auth = AuthState::Authenticated(user_id);
                true
            }
            AuthState::Authenticated(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(0, "127.0.0.1:4000".parse().unwrap(), 64)
    }

    #[test]
    fn test_starts_anonymous() {
        let session = session();
        assert_eq!(session.auth(), AuthState::Anonymous);
        assert_eq!(session.user_id(), None);
        assert!(session.decoder.pending().is_empty());
    }

    #[test]
    fn test_authenticates_once() {
        let mut session = session();
        assert!(session.authenticate(3));
        assert_eq!(session.auth(), AuthState::Authenticated(3));

        assert!(!session.authenticate(4));
        assert_eq!(session.user_id(), Some(3));
    }
}
