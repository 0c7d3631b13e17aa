//! Wire protocol.
//!
//! Requests and responses are text frames terminated by a blank line:
//!
//! ```text
//! Request:  <RESOURCE|METHOD>\n<json-payload>\n\n
//! Response: OK\n<json-body>\n\n
//!           FAIL\n{"message":"<text>","source":"<AUTH|T|TL>"}\n\n
//! ```

pub mod frame;
pub mod request;
pub mod response;

pub use frame::FrameDecoder;
pub use request::{parse, ParsedRequest, ResourceMethod};
pub use response::{Response, Source};

/// Blank line terminating every request and response.
pub const DELIMITER: &[u8] = b"\n\n";
