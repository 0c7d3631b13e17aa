//! Request parser.
//!
//! A frame is exactly two lines:
//!
//! ```text
//! <RESOURCE|METHOD>
//! <json-payload>
//! ```
//!
//! Only JSON syntax is checked here; the payload's shape is up to the
//! handler that receives it.

use bytes::Bytes;
use serde::de::IgnoredAny;
use std::fmt;
use std::str::FromStr;

use super::response::Source;
use crate::error::{Error, FrameError, ParseError};
use tracing::trace;

/// The closed set of operations a client can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceMethod {
    AuthLogin,
    TaskGetAll,
    TaskCreate,
    TaskDelete,
    TaskListGetAll,
    TaskListCreate,
    TaskListDelete,
}

impl ResourceMethod {
    pub const ALL: [ResourceMethod; 7] = [
        ResourceMethod::AuthLogin,
        ResourceMethod::TaskGetAll,
        ResourceMethod::TaskCreate,
        ResourceMethod::TaskDelete,
        ResourceMethod::TaskListGetAll,
        ResourceMethod::TaskListCreate,
        ResourceMethod::TaskListDelete,
    ];

    /// Wire tag, e.g. `AUTH|LOGIN`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceMethod::AuthLogin => "AUTH|LOGIN",
            ResourceMethod::TaskGetAll => "T|GET_ALL",
            ResourceMethod::TaskCreate => "T|CREATE",
            ResourceMethod::TaskDelete => "T|DELETE",
            ResourceMethod::TaskListGetAll => "TL|GET_ALL",
            ResourceMethod::TaskListCreate => "TL|CREATE",
            ResourceMethod::TaskListDelete => "TL|DELETE",
        }
    }

    /// Resource namespace the method belongs to.
    pub fn source(&self) -> Source {
        match self {
            ResourceMethod::AuthLogin => Source::Auth,
            ResourceMethod::TaskGetAll | ResourceMethod::TaskCreate | ResourceMethod::TaskDelete => {
                Source::Task
            }
            ResourceMethod::TaskListGetAll
            | ResourceMethod::TaskListCreate
            | ResourceMethod::TaskListDelete => Source::TaskList,
        }
    }

    /// Whether the method may only be used by a logged-in session.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, ResourceMethod::AuthLogin)
    }
}

impl FromStr for ResourceMethod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or(ParseError::UnknownMethod)
    }
}

impl fmt::Display for ResourceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated request ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: ResourceMethod,
    /// Syntactically valid JSON.
    pub payload: Bytes,
}

/// Parse one frame into a request.
pub fn parse(frame: &Bytes) -> Result<ParsedRequest, Error> {
    let lines = frame.split(|&b| b == b'\n').count();
    if lines != 2 {
        trace!(lines, "Frame is not a method line and a payload line");
        return Err(FrameError::Malformed.into());
    }

    // Exactly one newline, so this split always succeeds.
    let newline = frame
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(FrameError::Malformed)?;

    let tag = std::str::from_utf8(&frame[..newline]).map_err(|_| ParseError::UnknownMethod)?;
    let method: ResourceMethod = tag.parse()?;

    let payload = frame.slice(newline + 1..);
    if serde_json::from_slice::<IgnoredAny>(&payload).is_err() {
        return Err(ParseError::InvalidPayload.into());
    }

    Ok(ParsedRequest { method, payload })
}
