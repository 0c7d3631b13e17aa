//! Response generation for the wire protocol.
//!
//! ```text
//! OK\n<json-body>\n\n
//! FAIL\n{"message":"<text>","source":"<AUTH|T|TL>"}\n\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use super::DELIMITER;

/// Resource namespace a response originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Source {
    #[serde(rename = "AUTH")]
    Auth,
    #[serde(rename = "T")]
    Task,
    #[serde(rename = "TL")]
    TaskList,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Auth => "AUTH",
            Source::Task => "T",
            Source::TaskList => "TL",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response generator
pub struct Response;

impl Response {
    /// Generate an OK response with an empty body
    pub fn ok_empty() -> Bytes {
        Self::ok(&Value::Object(Default::default()))
    }

    /// Generate an OK response carrying a JSON body
    pub fn ok(body: &Value) -> Bytes {
        Self::frame(b"OK", body)
    }

    /// Generate a FAIL response
    pub fn fail(message: &str, source: Source) -> Bytes {
        let body = serde_json::json!({
            "message": message,
            "source": source,
        });
        Self::frame(b"FAIL", &body)
    }

    /// Notice written to a client right before the server drops it
    pub fn disconnecting() -> &'static [u8] {
        b"Disconnecting!"
    }

    fn frame(status: &[u8], body: &Value) -> Bytes {
        let body = body.to_string();
        let mut response = BytesMut::with_capacity(status.len() + body.len() + 3);
        response.put_slice(status);
        response.put_u8(b'\n');
        response.put_slice(body.as_bytes());
        response.put_slice(DELIMITER);
        response.freeze()
    }
}
