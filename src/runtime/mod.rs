//! Connection runtime.
//!
//! - `Session`: per-connection framing buffer and auth state
//! - `Registry`: live connections and logged-in users, shared by all workers
//! - `connection`: the per-connection reader/dispatch task pair

pub mod connection;
pub mod registry;
pub mod session;

pub use connection::{serve_connection, ConnectionContext, DEFAULT_READ_BUFFER_SIZE};
pub use registry::Registry;
pub use session::Session;
