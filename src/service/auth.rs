//! Login handler.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use super::validation::{Validate, ValidationErrors};
use super::ServiceResponse;
use crate::error::{AuthError, Error, ServiceError};
use crate::protocol::{Response, Source};
use crate::runtime::{Registry, Session};
use crate::storage::{StoreError, UserStore};

/// Payload of `AUTH|LOGIN`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("username", &self.username);
        errors.into_result()
    }
}

/// Handles the `AUTH` resource.
pub struct AuthService {
    store: Arc<dyn UserStore>,
    registry: Arc<Registry>,
}

impl AuthService {
    pub fn new(store: Arc<dyn UserStore>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    /// Register `username` and log the session in as the new user.
    ///
    /// Every fallible step runs before the registry or the session is
    /// touched, so a failed login leaves no trace.
    pub fn login(&self, payload: &[u8], session: &mut Session) -> Result<ServiceResponse, Error> {
        if session.user_id().is_some() {
            return Err(AuthError::AlreadyLoggedIn.into());
        }

        let request: LoginRequest = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::new(e.to_string(), Source::Auth))?;
        request
            .validate()
            .map_err(|e| ServiceError::new(e.to_string(), Source::Auth))?;
        let username = request.username.as_str();

        if self.store.is_username_taken(username).map_err(unavailable)? {
            return Err(AuthError::UsernameTaken.into());
        }

        let user_id = match self.store.create_user(username) {
            Ok(id) => id,
            Err(StoreError::UsernameTaken(_)) => return Err(AuthError::UsernameTaken.into()),
            Err(e) => return Err(unavailable(e)),
        };

        if !self.registry.login(session.id(), user_id) {
            // The connection left the registry; undo the record.
            if let Err(e) = self.store.delete_user(user_id) {
                error!(user_id, error = %e, "Failed to roll back user");
            }
            return Err(ServiceError::new("Login failed", Source::Auth).into());
        }
        let authenticated = session.authenticate(user_id);
        debug_assert!(authenticated);

        info!(
            peer = %session.peer(),
            user_id,
            username,
            online = self.registry.logged_in_count(),
            "User logged in"
        );

        Ok(ServiceResponse::new(Response::ok_empty()))
    }
}

fn unavailable(e: StoreError) -> Error {
    error!(error = %e, "User store failure");
    ServiceError::new("Service unavailable", Source::Auth).into()
}
