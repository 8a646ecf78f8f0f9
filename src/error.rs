//! Error handling.

use crate::frame::coding::Data;
use std::io;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Possible protocol violations. Each variant maps to the close code a
/// caught violation sends back to the peer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported HTTP method, only GET is allowed")]
    WrongHttpMethod,
    #[error("HTTP version must be 1.1 or higher")]
    WrongHttpVersion,
    #[error("missing Host header")]
    MissingHost,
    #[error("missing Sec-WebSocket-Key header")]
    MissingSecWebSocketKey,
    #[error("missing or wrong Sec-WebSocket-Version header, expected 13")]
    MissingOrWrongVersion,
    #[error("junk found after client request")]
    JunkAfterRequest,
    #[error("reserved RSV bits are non-zero")]
    NonZeroReservedBits,
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),
    #[error("received an unmasked frame from client")]
    UnmaskedFrameFromClient,
    #[error("fragmented control frame")]
    FragmentedControlFrame,
    #[error("control frame payload larger than 125 bytes")]
    ControlFrameTooBig,
    #[error("continuation frame but nothing to continue")]
    UnexpectedContinuationFrame,
    #[error("received {0} while waiting for more fragments")]
    ExpectedContinuation(Data),
    #[error("invalid close frame payload")]
    InvalidCloseSequence,
    #[error("text message is not valid UTF-8")]
    InvalidUtf8,
    #[error("httparse error: {0}")]
    Httparse(#[from] httparse::Error),
}

/// Errors relating to configured resource limits.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error("frame payload {size} exceeds the configured maximum of {max_size}")]
    MessageTooLarge { size: u64, max_size: u64 },
    #[error("too many handshake headers")]
    TooManyHeaders,
}

/// TLS setup/handshake failures, kept as its own enum so the crate can be
/// built without the `tls` feature while still exposing an `Error::Tls`
/// variant in its public surface.
#[derive(thiserror::Error, Debug)]
pub enum TlsError {
    #[cfg(feature = "tls")]
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
    #[error("failed to load certificate/key material: {0}")]
    Cert(String),
    #[error("TLS is not compiled into this build")]
    NotCompiledIn,
}

/// Possible WebSocket connection-subsystem errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The connection is already closed; trying to operate on it further
    /// indicates a caller bug.
    #[error("trying to operate on an already-closed connection")]
    AlreadyClosed,
    /// Transport failure. Apart from `WouldBlock` (which call sites
    /// translate into `Ok(None)` before it ever reaches here), these are
    /// fatal to the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
    /// Configured resource limit exceeded (message size, header count).
    #[error("capacity error: {0}")]
    Capacity(#[from] CapacityError),
    /// Protocol violation — covers both a malformed opening handshake
    /// (while the connection is still in `NEW`) and a bad frame once
    /// `OPEN`. [`Connection::cycle`](crate::connection::Connection::cycle)
    /// tells the two apart by its own ready-state, not by the error value.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
