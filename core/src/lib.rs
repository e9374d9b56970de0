//! Socket-level HTTP/1.1 transport for a CouchDB client.
//!
//! # Overview
//! Turns a (method, path, body, headers) request into bytes on a socket and
//! the bytes coming back into a parsed response with status, headers,
//! cookies and body. The protocol is handled here by hand: request
//! serialization, a line-oriented response parser with content-length,
//! chunked and close-delimited framing, and a pool of persistent
//! connections reused across calls.
//!
//! # Design
//! - [`Transport`] is the entry point. It owns a [`ConnectionPool`] and a
//!   [`MakeResult`] collaborator that shapes the final result.
//! - Parsing state lives in a per-response [`ResponseParser`], never on the
//!   transport, so one transport can serve concurrent callers.
//! - I/O is blocking; connect and read/write are bounded by the timeouts in
//!   [`TransportConfig`].
//! - Errors are values: every layer returns [`TransportError`], and a
//!   connection involved in any error is closed instead of pooled.

pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod parse;
pub mod pool;
pub mod reader;
pub mod result;
pub mod serialize;
pub mod tls;
pub mod transport;

pub use config::{Scheme, TransportConfig};
pub use connection::Connection;
pub use error::TransportError;
pub use http::{Headers, HttpMethod, HttpRequest, HttpResponse, StatusLine};
pub use parse::{read_response, ParseState, ResponseParser};
pub use pool::{ConnectionPool, PoolStats};
pub use reader::LineReader;
pub use result::{JsonEnvelope, JsonResult, MakeResult, RawResult};
pub use serialize::encode_request;
pub use transport::Transport;
