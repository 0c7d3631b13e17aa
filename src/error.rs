//! Error types for request handling.
//!
//! Every per-request failure is rendered back to the client in the `FAIL`
//! wire form; only transport errors end a connection.

use crate::protocol::response::{Response, Source};
use bytes::Bytes;
use thiserror::Error;

/// A frame that cannot be turned into a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame is not exactly a method line and a payload line.
    #[error("Invalid request form")]
    Malformed,

    /// The unterminated tail of the stream outgrew the frame limit.
    #[error("Request exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// A well-shaped frame whose contents are rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Method unknown")]
    UnknownMethod,

    #[error("Invalid request body")]
    InvalidPayload,
}

/// Authentication failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Already logged in")]
    AlreadyLoggedIn,

    #[error("User with that name already exists")]
    UsernameTaken,
}

/// A business-rule failure, namespaced by the resource that raised it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
    pub origin: Source,
}

impl ServiceError {
    pub fn new(message: impl Into<String>, origin: Source) -> Self {
        Self {
            message: message.into(),
            origin,
        }
    }

    pub fn unknown_operation(origin: Source) -> Self {
        Self::new("Unknown operation", origin)
    }
}

/// Top-level error for everything that can go wrong with one request or
/// one connection.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("I/O error: {0}")]
    Transport(#[from] std::io::Error),
}

impl Error {
    /// Namespace reported in the failure body.
    ///
    /// Protocol-level failures have no resource of their own and are
    /// reported under `AUTH`, the gateway's default namespace.
    pub fn source_tag(&self) -> Source {
        match self {
            Error::Service(e) => e.origin,
            _ => Source::Auth,
        }
    }

    /// Render the error in the `FAIL` wire form.
    pub fn to_wire(&self) -> Bytes {
        Response::fail(&self.to_string(), self.source_tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_keeps_its_namespace() {
        let err = Error::from(ServiceError::unknown_operation(Source::TaskList));
        assert_eq!(err.source_tag(), Source::TaskList);
        assert_eq!(
            &err.to_wire()[..],
            b"FAIL\n{\"message\":\"Unknown operation\",\"source\":\"TL\"}\n\n"
        );
    }

    #[test]
    fn test_protocol_errors_report_auth() {
        let err = Error::from(ParseError::UnknownMethod);
        assert_eq!(err.source_tag(), Source::Auth);
        assert_eq!(
            &err.to_wire()[..],
            b"FAIL\n{\"message\":\"Method unknown\",\"source\":\"AUTH\"}\n\n"
        );
    }

    #[test]
    fn test_transport_error_display() {
        let err = Error::from(std::io::Error::other("reset"));
        assert_eq!(err.to_string(), "I/O error: reset");
        assert_eq!(err.source_tag(), Source::Auth);
    }

    #[test]
    fn test_frame_errors() {
        assert_eq!(
            Error::from(FrameError::TooLarge { limit: 8 }).to_string(),
            "Request exceeds 8 bytes"
        );
        assert_eq!(
            Error::from(FrameError::Malformed).to_string(),
            "Invalid request form"
        );
    }
}
