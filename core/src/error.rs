//! Error types for the socket transport.
//!
//! # Design
//! The layer above distinguishes three failure families when deciding
//! whether to retry: the socket never worked (`Connection`), the peer was too
//! slow (`Timeout`), or the peer spoke something that is not HTTP/1.1 as we
//! understand it (`MalformedResponse`). The remaining variants cover problems
//! on our side of the wire: a configuration that cannot produce a transport,
//! and a result collaborator that cannot build its envelope.
//!
//! Every variant carries a message string rather than a source error, so the
//! type is `Clone` and comparable in tests.

/// Errors returned by [`Transport::send`](crate::Transport::send) and the
/// pieces it is built from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// A socket could not be opened, the TLS handshake failed, or the socket
    /// failed outright mid-exchange.
    #[error("connection error: {0}")]
    Connection(String),

    /// Connecting or a read/write exceeded the configured bound.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The status line, a header, or the body framing violated the grammar.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The configuration cannot be turned into a working transport.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The result collaborator rejected an otherwise complete response.
    #[error("could not build result: {0}")]
    Result(String),
}

impl TransportError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        TransportError::MalformedResponse(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }

    /// Classify an io error raised while connecting or exchanging bytes.
    ///
    /// `WouldBlock` is what a blocking socket with a read timeout reports on
    /// unix when the timeout fires; `TimedOut` is the windows spelling and
    /// what `connect_timeout` returns everywhere.
    pub(crate) fn from_io(context: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                TransportError::Timeout(format!("{context}: {err}"))
            }
            _ => TransportError::Connection(format!("{context}: {err}")),
        }
    }
}
