//! Non-blocking accept loop enforcing a one-CONNECTING-connection-per-
//! source-IP limit: a second connection attempt from an address that
//! already has one mid-handshake is deferred rather than rejected, and
//! promoted once that slot frees up.
//!
//! Unlike `Connection<S>`, this is concrete over [`Socket`] rather than
//! generic: a listener only ever produces real TCP (optionally TLS-wrapped)
//! connections, so there's no test double to swap in the way `Connection`'s
//! own unit tests swap in a `Cursor`-backed mock.

use crate::config::ListenerConfig;
use crate::connection::{Connection, ConnectionHandle, ConnectionId};
use crate::error::{Error, Result};
use crate::frame::coding::CloseCode;
use crate::observer::{ConnectionObserver, ObserverBus, ServerObserver};
use crate::stream::{RawSocket, Socket};
use log::{debug, trace, warn};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::rc::Rc;

/// A raw socket that arrived while its source IP already had a connection
/// mid-handshake, waiting for that slot to free up.
struct Deferred {
    ip: IpAddr,
    socket: TcpStream,
}

/// A `ConnectionObserver` the listener subscribes to every connection it
/// creates, purely to learn when the connection leaves `NEW` so its source
/// IP can be freed from the connecting map. The listener itself never
/// retains the connection, so this is the only way it finds out — the map
/// is shared (`Rc<RefCell<_>>`) precisely so this tracker can keep
/// mutating it long after the `accept()` call that created it returns.
struct ConnectingTracker {
    ip: IpAddr,
    connecting: Rc<RefCell<HashSet<IpAddr>>>,
}

impl ConnectionObserver<Socket> for ConnectingTracker {
    fn open(&self, _conn: ConnectionHandle<Socket>) {
        self.connecting.borrow_mut().remove(&self.ip);
    }

    fn close(&self, _conn: ConnectionHandle<Socket>, _code: CloseCode, _reason: &str) {
        self.connecting.borrow_mut().remove(&self.ip);
    }
}

/// A non-blocking TCP (optionally TLS) accept loop. Owns the listening
/// socket and the connecting-map/deferred-queue bookkeeping; does *not*
/// own the connections it produces — each `new_connection` event hands
/// the application a [`ConnectionHandle`] and it's up to the application
/// to `upgrade()` and retain it.
pub struct Listener {
    config: ListenerConfig,
    socket: Option<TcpListener>,
    #[cfg(feature = "tls")]
    tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
    connecting: Rc<RefCell<HashSet<IpAddr>>>,
    deferred: VecDeque<Deferred>,
    next_id: ConnectionId,
    observers: ObserverBus<dyn ServerObserver<Socket>>,
}

impl Listener {
    pub fn new(config: ListenerConfig) -> Self {
        Listener {
            config,
            socket: None,
            #[cfg(feature = "tls")]
            tls_config: None,
            connecting: Rc::new(RefCell::new(HashSet::new())),
            deferred: VecDeque::new(),
            next_id: 0,
            observers: ObserverBus::new(),
        }
    }

    /// Bind the listening socket (optionally loading TLS certificate
    /// material) and emit `server-opened`.
    pub fn open(&mut self) -> Result<()> {
        let host = self.config.bind_ip.as_deref().unwrap_or(&self.config.bind_host);
        let addr = format!("{host}:{}", self.config.bind_port);
        let socket = TcpListener::bind(&addr)?;
        socket.set_nonblocking(true)?;

        #[cfg(feature = "tls")]
        {
            if let Some(cert_config) = &self.config.tls {
                self.tls_config = Some(crate::tls::load_server_config(cert_config)?);
            }
        }

        debug!("listening on {addr}");
        self.socket = Some(socket);
        self.observers.dispatch(|o| o.server_opened());
        Ok(())
    }

    /// The address actually bound, once [`open`](Self::open) has succeeded.
    /// Mostly useful when `bind_port` was `0` (ephemeral port).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Non-blocking accept step, run once per driver tick.
    pub fn accept(&mut self) -> Result<()> {
        let Some(listener) = self.socket.as_ref() else {
            return Ok(());
        };

        let incoming = match listener.accept() {
            Ok((stream, addr)) => Some((stream, addr.ip())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => return Err(Error::Io(e)),
        };

        let selected = match incoming {
            Some((stream, ip)) => {
                if self.connecting.borrow().contains(&ip) {
                    trace!("deferring connection from {ip}, already connecting");
                    self.deferred.push_back(Deferred { ip, socket: stream });
                    None
                } else {
                    self.connecting.borrow_mut().insert(ip);
                    Some((stream, ip))
                }
            }
            None => self.promote_deferred(),
        };

        match selected {
            Some((stream, ip)) => self.finish_accept(stream, ip),
            None => Ok(()),
        }
    }

    /// Walk the deferred queue once from the head, promoting the first
    /// entry whose source IP is no longer connecting.
    fn promote_deferred(&mut self) -> Option<(TcpStream, IpAddr)> {
        let mut remaining = VecDeque::with_capacity(self.deferred.len());
        let mut promoted = None;
        while let Some(entry) = self.deferred.pop_front() {
            if promoted.is_none() && !self.connecting.borrow().contains(&entry.ip) {
                self.connecting.borrow_mut().insert(entry.ip);
                promoted = Some((entry.socket, entry.ip));
            } else {
                remaining.push_back(entry);
            }
        }
        self.deferred = remaining;
        promoted
    }

    /// Complete TLS (if configured), spawn a `Connection`, run its first
    /// `cycle` to kick off handshake parsing, and emit `new-connection`.
    fn finish_accept(&mut self, stream: TcpStream, ip: IpAddr) -> Result<()> {
        let mut socket = match self.wrap_socket(stream) {
            Ok(socket) => socket,
            Err(e) => {
                warn!("TLS handshake with {ip} failed: {e}");
                self.connecting.borrow_mut().remove(&ip);
                return Ok(());
            }
        };
        // An accepted socket doesn't inherit the listener's non-blocking
        // mode, and the TLS path above deliberately runs its handshake in
        // blocking mode; every connection needs non-blocking before
        // `Connection::cycle` ever touches it.
        socket.set_nonblocking(true)?;

        let id = self.next_id;
        self.next_id += 1;
        let conn = Connection::spawn(id, socket, self.config.connection.clone());
        conn.borrow_mut()
            .subscribe(Rc::new(ConnectingTracker { ip, connecting: self.connecting.clone() }));

        // Kick off handshake parsing immediately; further progress happens
        // as the application keeps calling `Connection::drive`.
        let _ = Connection::drive(&conn);

        let handle = conn.borrow().handle();
        debug!("accepted connection {id} from {ip}");
        self.observers.dispatch(|o| o.new_connection(handle.clone()));
        Ok(())
    }

    /// How long the blocking TLS handshake in `wrap_socket` is allowed to
    /// take. Bounded so a client that completes the TCP handshake and then
    /// never sends a ClientHello (or drips it in slowly) can't hang the
    /// single thread that also drives every other connection's `cycle()`.
    #[cfg(feature = "tls")]
    const TLS_HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

    #[cfg(feature = "tls")]
    fn wrap_socket(&self, stream: TcpStream) -> Result<Socket> {
        use crate::error::TlsError;
        use crate::stream::tls_socket::TlsSocket;

        match &self.tls_config {
            Some(server_config) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(Self::TLS_HANDSHAKE_TIMEOUT))?;
                stream.set_write_timeout(Some(Self::TLS_HANDSHAKE_TIMEOUT))?;
                let mut session = rustls::ServerConnection::new(server_config.clone())
                    .map_err(|e| Error::Tls(TlsError::Rustls(e)))?;
                let mut raw = stream;
                session.complete_io(&mut raw).map_err(Error::Io)?;
                raw.set_read_timeout(None)?;
                raw.set_write_timeout(None)?;
                Ok(Socket::Tls(TlsSocket(rustls::StreamOwned::new(session, raw))))
            }
            None => Ok(Socket::Plain(stream)),
        }
    }

    #[cfg(not(feature = "tls"))]
    fn wrap_socket(&self, stream: TcpStream) -> Result<Socket> {
        Ok(Socket::Plain(stream))
    }

    /// Stop accepting and emit `server-closed`. Already-open connections
    /// are unaffected; they keep running until their own `cycle` closes
    /// them.
    pub fn close(&mut self) {
        self.socket = None;
        self.observers.dispatch(|o| o.server_closed());
    }

    pub fn subscribe(&mut self, observer: Rc<dyn ServerObserver<Socket>>) {
        self.observers.subscribe(observer);
    }

    pub fn unsubscribe(&mut self, observer: &Rc<dyn ServerObserver<Socket>>) {
        self.observers.unsubscribe(observer);
    }

    /// Number of source IPs currently holding the one-CONNECTING-per-host
    /// slot. Exposed mainly for tests.
    pub fn connecting_count(&self) -> usize {
        self.connecting.borrow().len()
    }

    /// Number of accepted sockets waiting in the deferred queue.
    pub fn pending_count(&self) -> usize {
        self.deferred.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfig;
    use std::net::TcpStream as ClientStream;
    use std::time::Duration;

    fn loopback_config() -> ListenerConfig {
        ListenerConfig::new("127.0.0.1", 0)
    }

    #[test]
    fn open_emits_server_opened() {
        struct Recorder(RefCell<bool>);
        impl ServerObserver<Socket> for Recorder {
            fn server_opened(&self) {
                *self.0.borrow_mut() = true;
            }
        }
        let mut listener = Listener::new(loopback_config());
        let recorder = Rc::new(Recorder(RefCell::new(false)));
        listener.subscribe(recorder.clone());
        listener.open().unwrap();
        assert!(*recorder.0.borrow());
        assert!(listener.local_addr().is_some());
    }

    #[test]
    fn accept_is_a_no_op_with_nothing_pending() {
        let mut listener = Listener::new(loopback_config());
        listener.open().unwrap();
        listener.accept().unwrap();
        assert_eq!(listener.connecting_count(), 0);
        assert_eq!(listener.pending_count(), 0);
    }

    #[test]
    fn accepts_a_connection_and_emits_new_connection() {
        struct Recorder(RefCell<Option<ConnectionHandle<Socket>>>);
        impl ServerObserver<Socket> for Recorder {
            fn new_connection(&self, conn: ConnectionHandle<Socket>) {
                *self.0.borrow_mut() = Some(conn);
            }
        }

        let mut listener = Listener::new(loopback_config());
        listener.open().unwrap();
        let addr = listener.local_addr().unwrap();
        let recorder = Rc::new(Recorder(RefCell::new(None)));
        listener.subscribe(recorder.clone());

        let _client = ClientStream::connect(addr).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        listener.accept().unwrap();

        let handle = recorder.0.borrow_mut().take();
        let handle = handle.expect("new_connection should have fired");
        let conn = handle.upgrade().expect("connection should still be alive");
        assert_eq!(conn.borrow().ready_state(), crate::connection::ReadyState::New);
        assert_eq!(listener.connecting_count(), 1);
    }

    #[test]
    fn second_connection_from_same_source_is_deferred() {
        let mut listener = Listener::new(loopback_config());
        listener.open().unwrap();
        let addr = listener.local_addr().unwrap();

        let _first = ClientStream::connect(addr).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        listener.accept().unwrap();
        assert_eq!(listener.connecting_count(), 1);

        let _second = ClientStream::connect(addr).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        listener.accept().unwrap();

        // Same source IP (127.0.0.1) is still connecting: deferred, not
        // promoted, and the connecting-map slot count doesn't grow.
        assert_eq!(listener.pending_count(), 1);
        assert_eq!(listener.connecting_count(), 1);
    }

    #[test]
    fn close_emits_server_closed_and_stops_accepting() {
        struct Recorder(RefCell<bool>);
        impl ServerObserver<Socket> for Recorder {
            fn server_closed(&self) {
                *self.0.borrow_mut() = true;
            }
        }
        let mut listener = Listener::new(loopback_config());
        listener.open().unwrap();
        let recorder = Rc::new(Recorder(RefCell::new(false)));
        listener.subscribe(recorder.clone());
        listener.close();
        assert!(*recorder.0.borrow());
        // No socket left to accept on; this must not error.
        listener.accept().unwrap();
    }
}
