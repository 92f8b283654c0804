//! Wire-level types for the ferry remote store API.
//!
//! The remote store exposes a session-oriented chunk API: initiate a
//! session, send (or fetch) chunks addressed by index and byte range,
//! then finalize with a manifest. This crate holds the request/response
//! payloads, the shared status enums, and the error type remote calls
//! return. It contains no I/O.

pub mod error;
pub mod messages;
pub mod types;

pub use error::RemoteError;
