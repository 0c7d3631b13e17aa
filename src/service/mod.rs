//! Request dispatch.
//!
//! The gateway routes each parsed request to the service owning its
//! resource, enforces the login gate, and turns results into wire bytes.
//!
//! ## Resources
//! - `AUTH`: login
//! - `T`, `TL`: tasks and task lists (routed, not yet implemented)

pub mod auth;
pub mod validation;

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{AuthError, Error, ServiceError};
use crate::protocol::{ParsedRequest, ResourceMethod};
use crate::runtime::{Registry, Session};
use crate::storage::{UserId, UserStore};

pub use auth::AuthService;

/// A message to push to other logged-in users.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub struct Notification {
    pub user_ids: Vec<UserId>,
    pub message: Bytes,
}

/// Successful outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    /// Wire-ready reply for the requesting connection.
    pub message: Bytes,
    pub notification: Option<Notification>,
}

impl ServiceResponse {
    pub fn new(message: Bytes) -> Self {
        Self {
            message,
            notification: None,
        }
    }
}

/// Routes requests to services.
pub struct ServiceGateway {
    registry: Arc<Registry>,
    auth: AuthService,
}

impl ServiceGateway {
    pub fn new(store: Arc<dyn UserStore>, registry: Arc<Registry>) -> Self {
        Self {
            auth: AuthService::new(store, Arc::clone(&registry)),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Whether the session's user is logged in on this connection.
    pub fn is_authenticated(&self, session: &Session) -> bool {
        session
            .user_id()
            .is_some_and(|user_id| self.registry.is_logged_in(session.id(), user_id))
    }

    /// Route one request.
    pub fn dispatch(
        &self,
        request: &ParsedRequest,
        session: &mut Session,
    ) -> Result<ServiceResponse, Error> {
        if request.method.requires_auth() && !self.is_authenticated(session) {
            return Err(AuthError::NotLoggedIn.into());
        }

        match request.method {
            ResourceMethod::AuthLogin => self.auth.login(&request.payload, session),
            ResourceMethod::TaskGetAll
            | ResourceMethod::TaskCreate
            | ResourceMethod::TaskDelete
            | ResourceMethod::TaskListGetAll
            | ResourceMethod::TaskListCreate
            | ResourceMethod::TaskListDelete => {
                Err(ServiceError::unknown_operation(request.method.source()).into())
            }
        }
    }

    /// Dispatch a request and render the reply for the requesting
    /// connection, delivering any notification on the way.
    pub fn respond(&self, request: &ParsedRequest, session: &mut Session) -> Bytes {
        match self.dispatch(request, session) {
            Ok(response) => {
                if let Some(notification) = &response.notification {
                    let delivered = self
                        .registry
                        .notify(&notification.user_ids, &notification.message);
                    trace!(delivered, "Notification queued");
                }
                response.message
            }
            Err(e) => {
                debug!(peer = %session.peer(), method = %request.method, error = %e, "Request failed");
                e.to_wire()
            }
        }
    }
}
