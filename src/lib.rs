//! Server-side RFC 6455 WebSocket connection subsystem.
//!
//! This crate implements the non-blocking, single-threaded half of RFC
//! 6455: an opening-handshake parser, a masking-aware frame codec, a
//! per-connection state machine (`NEW` → `OPEN` → `CLOSING` → `CLOSED`)
//! driven by a `cycle()` step, a `Listener` accept loop enforcing the
//! one-CONNECTING-per-source-IP limit, and an observer bus applications
//! subscribe to instead of blocking on reads. There is no event loop or
//! thread pool inside the crate: the embedding application owns the
//! driver loop and calls `Listener::accept` and `Connection::drive`
//! (or `Connection::cycle` directly) on its own schedule.
//!
//! Deliberately out of scope: extension negotiation beyond reserving the
//! RSV bits, HTTP/2+, permessage-deflate, any form of persistence, origin
//! enforcement policy, and a WebSocket client — this is a server-only
//! protocol engine.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod cookie;
pub mod error;
pub mod frame;
pub mod http;
pub mod listener;
pub mod message;
pub mod observer;
pub mod stream;
#[cfg(feature = "tls")]
pub mod tls;

pub use config::{ConnectionConfig, ListenerConfig};
pub use connection::{Connection, ConnectionEvent, ConnectionHandle, ConnectionId, ReadyState};
pub use cookie::Cookie;
pub use error::{CapacityError, Error, ProtocolError, Result};
pub use frame::coding::CloseCode;
pub use frame::{Frame, FrameParser};
pub use listener::Listener;
pub use message::{Message, MessageType};
pub use observer::{ConnectionObserver, ServerObserver};
pub use stream::{ByteStream, RawSocket, Socket};
