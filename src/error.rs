use thiserror::Error;

/// The C-taxonomy-shaped error kind from the interface contract: application
/// code that wants to match on "the literal code" rather than the message
/// can go through [`Error::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    Ok,
    AlreadyInProgress,
    ConnectionRefused,
    TimedOut,
    Eof,
    NotConnected,
    OutOfMemory,
    InvalidArgument,
    Tls,
    Protocol,
}

/// Errors surfaced by the runtime, either synchronously from a handle
/// operation's precondition check or asynchronously via `Handler::on_disconnect`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// `Connect()`/`Disconnect()` called in a state that cannot accept it.
    #[error("operation already in progress or already completed")]
    AlreadyInProgress,
    /// No listener at the requested address.
    #[error("connection refused by peer")]
    ConnectionRefused,
    /// `Connect(timeout)` fired its timer before the attempt completed.
    #[error("operation timed out")]
    TimedOut,
    /// Peer closed the stream (no local `Disconnect()` in progress).
    #[error("connection closed by peer")]
    Eof,
    /// `Send()` issued while not `CONNECTED`.
    #[error("socket is not connected")]
    NotConnected,
    /// Allocation failed at construction time.
    #[error("allocation failed")]
    OutOfMemory,
    /// A precondition on a caller-supplied value was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(Box<str>),
    /// TLS-specific failure; `detail` carries the backend's own error text when available.
    #[error("TLS error ({code}): {}", detail.as_deref().unwrap_or("no further detail"))]
    Tls {
        code: i32,
        detail: Option<Box<str>>,
    },
    /// The WebSocket/HTTP Upgrade handshake failed (after auth retries, if any).
    #[error("WebSocket handshake failed: {0}")]
    Handshake(Box<str>),
    /// A second authentication challenge was rejected.
    #[error("authentication failed")]
    AuthFailed,
    /// The local end finished a graceful close; this is the "OK" reason in `on_disconnect`.
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Closed => ErrorKind::Ok,
            Error::AlreadyInProgress => ErrorKind::AlreadyInProgress,
            Error::ConnectionRefused => ErrorKind::ConnectionRefused,
            Error::TimedOut => ErrorKind::TimedOut,
            Error::Eof => ErrorKind::Eof,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::OutOfMemory => ErrorKind::OutOfMemory,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Tls { .. } => ErrorKind::Tls,
            Error::Handshake(_) | Error::AuthFailed => ErrorKind::Protocol,
            Error::Io(err) => match err.kind() {
                std::io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
                std::io::ErrorKind::TimedOut => ErrorKind::TimedOut,
                std::io::ErrorKind::UnexpectedEof => ErrorKind::Eof,
                _ => ErrorKind::Protocol,
            },
        }
    }

    /// True if the peer side closed the connection (as opposed to a local-initiated close).
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Eof) || matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
