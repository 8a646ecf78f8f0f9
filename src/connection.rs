//! Per-connection state machine: opening handshake, frame reassembly,
//! closing handshake, and the application-facing operations. A `Connection`
//! owns a stream, a `ReadyState`, and an incomplete-message slot, and
//! exposes `send_text`/`send_binary`/`disconnect`/`ping`. Accept-key
//! derivation and response formatting live alongside the handshake cycle
//! below. The single `cycle()` step function never blocks waiting on I/O;
//! callers drive it on their own schedule instead of looping on a blocking
//! read.

use crate::buffer::ReadBuffer;
use crate::config::ConnectionConfig;
use crate::cookie::{parse_cookie_header, Cookie};
use crate::error::{CapacityError, Error, ProtocolError, Result};
use crate::frame::coding::{CloseCode, Control, Data, OpCode};
use crate::frame::{Frame, FrameParser};
use crate::http::{self, HandshakeRequest};
use crate::message::{IncompleteMessage, Message, MessageType};
use crate::observer::{ConnectionObserver, ObserverBus};
use crate::stream::ByteStream;
use log::{debug, trace, warn};
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::{Rc, Weak};
use std::time::Instant;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Bytes read from the transport per `cycle()` step.
const READ_CHUNK: usize = 2048;

/// Derive `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`,
/// per RFC 6455 §1.3.
pub fn compute_accept_key(key: &str) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    data_encoding::BASE64.encode(&hasher.finalize())
}

/// First client-preferred subprotocol that's also in `allowed` (see
/// DESIGN.md for why client preference wins over server order).
fn negotiate_subprotocol(requested: Option<&str>, allowed: &[String]) -> Option<String> {
    let requested = requested?;
    requested
        .split(',')
        .map(str::trim)
        .find(|candidate| allowed.iter().any(|a| a == candidate))
        .map(str::to_string)
}

/// A unique, process-lifetime identifier handed out by a `Listener`.
pub type ConnectionId = u64;

/// One lifecycle notification produced by a `cycle()` call, queued rather
/// than dispatched inline. `cycle()` runs under a borrowed `RefCell`; a
/// handler that calls back into this same connection (the ordinary "echo
/// what I just received" case) would otherwise try to borrow it a second
/// time and panic. Queuing defers the observer calls until after that
/// borrow has ended — see [`Connection::drive`].
pub enum ConnectionEvent {
    HandshakeReceived,
    Open,
    Message(Message),
    Ping,
    Pong,
    Close(CloseCode, String),
}

fn event_dispatch<S>(event: &ConnectionEvent, observer: &Rc<dyn ConnectionObserver<S>>, handle: &ConnectionHandle<S>) {
    match event {
        ConnectionEvent::HandshakeReceived => observer.handshake_received(handle.clone()),
        ConnectionEvent::Open => observer.open(handle.clone()),
        ConnectionEvent::Message(message) => observer.message(handle.clone(), message),
        ConnectionEvent::Ping => observer.ping(handle.clone()),
        ConnectionEvent::Pong => observer.pong(handle.clone()),
        ConnectionEvent::Close(code, reason) => observer.close(handle.clone(), *code, reason),
    }
}

/// Connection lifecycle state. Declaration order is the
/// monotonic order the state machine advances through; `Ord`/`PartialOrd`
/// are derived from it so callers can assert `new_state >= old_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    New,
    Open,
    Closing,
    Closed,
}

/// A cloneable, non-owning reference to a live `Connection`, the value
/// passed to every observer callback. Holding one does not keep
/// the connection alive or block it from being dropped by its `Listener`.
pub struct ConnectionHandle<S> {
    id: ConnectionId,
    inner: Weak<RefCell<Connection<S>>>,
}

impl<S> Clone for ConnectionHandle<S> {
    fn clone(&self) -> Self {
        ConnectionHandle { id: self.id, inner: self.inner.clone() }
    }
}

impl<S> ConnectionHandle<S> {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Upgrade to a strong reference, for the duration of one borrow.
    /// Returns `None` once the connection has been dropped (after CLOSED).
    pub fn upgrade(&self) -> Option<Rc<RefCell<Connection<S>>>> {
        self.inner.upgrade()
    }
}

/// One server-side WebSocket connection. Generic over the transport
/// so tests can drive it over an in-memory duplex double instead of a
/// `TcpStream`.
pub struct Connection<S> {
    id: ConnectionId,
    self_handle: Weak<RefCell<Connection<S>>>,
    stream: ByteStream<S>,
    config: ConnectionConfig,
    state: ReadyState,

    in_buf: ReadBuffer,
    out_buf: Vec<u8>,
    parser: FrameParser,

    request_path: Option<String>,
    request_headers: http::HeaderMap,
    request_cookies: Vec<(String, String)>,
    pending_set_cookies: Vec<Cookie>,
    negotiated_subprotocol: Option<String>,
    response_built: bool,
    read_handshake: bool,
    sent_handshake: bool,

    current_message: Option<IncompleteMessage>,

    sent_close: bool,
    received_close: bool,
    close_emitted: bool,
    close_code: Option<CloseCode>,
    close_reason: Option<String>,
    close_started_at: Option<Instant>,

    last_activity: Instant,
    observers: ObserverBus<dyn ConnectionObserver<S>>,
    pending_events: Vec<ConnectionEvent>,
}

impl<S> Connection<S> {
    /// Construct a new connection wrapped for shared, weak-referenced
    /// ownership: observer handles only ever borrow weakly, while whoever
    /// accepted the connection holds the strong `Rc`. `new_cyclic` lets the
    /// connection hand out handles to itself before it exists anywhere else.
    pub fn spawn(id: ConnectionId, stream: S, config: ConnectionConfig) -> Rc<RefCell<Connection<S>>> {
        Rc::new_cyclic(|weak| {
            RefCell::new(Connection {
                id,
                self_handle: weak.clone(),
                stream: ByteStream::new(stream),
                config,
                state: ReadyState::New,
                in_buf: ReadBuffer::new(),
                out_buf: Vec::new(),
                parser: FrameParser::new(),
                request_path: None,
                request_headers: http::HeaderMap::new(),
                request_cookies: Vec::new(),
                pending_set_cookies: Vec::new(),
                negotiated_subprotocol: None,
                response_built: false,
                read_handshake: false,
                sent_handshake: false,
                current_message: None,
                sent_close: false,
                received_close: false,
                close_emitted: false,
                close_code: None,
                close_reason: None,
                close_started_at: None,
                last_activity: Instant::now(),
                observers: ObserverBus::new(),
                pending_events: Vec::new(),
            })
        })
    }

    /// Events queued by the most recent `cycle()` call, not yet dispatched
    /// to observers.
    pub fn take_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Current observer snapshot, for a caller about to dispatch events
    /// (see [`Connection::drive`]).
    pub fn observer_snapshot(&self) -> Vec<Rc<dyn ConnectionObserver<S>>> {
        self.observers.snapshot()
    }

    /// Run one `cycle()` and deliver every event it queued to the current
    /// observers, with no `RefCell` borrow of `this` held during delivery.
    /// This is the reentrancy-safe way to drive a connection; observer
    /// callbacks are free to borrow `this` again (e.g. to call `send_text`
    /// from a `message` handler).
    pub fn drive(this: &Rc<RefCell<Connection<S>>>) -> Result<()>
    where
        S: crate::stream::RawSocket,
    {
        let result = this.borrow_mut().cycle();
        let events = this.borrow_mut().take_events();
        if !events.is_empty() {
            let snapshot = this.borrow().observer_snapshot();
            let handle = this.borrow().handle();
            for event in events {
                for observer in &snapshot {
                    event_dispatch(&event, observer, &handle);
                }
            }
        }
        result
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn handle(&self) -> ConnectionHandle<S> {
        ConnectionHandle { id: self.id, inner: self.self_handle.clone() }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.request_headers.find(name)
    }

    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.request_cookies.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn path(&self) -> Option<&str> {
        self.request_path.as_deref()
    }

    pub fn subprotocol(&self) -> Option<&str> {
        self.negotiated_subprotocol.as_deref()
    }

    /// Queue a `Set-Cookie` to go out with the handshake response. Only
    /// has an effect while the response hasn't been built yet — in
    /// practice, from inside a `handshake_received` observer callback.
    pub fn set_cookie(&mut self, cookie: Cookie) {
        if self.state == ReadyState::New && !self.response_built {
            self.pending_set_cookies.push(cookie);
        } else {
            warn!("set_cookie called after the handshake response was already sent; ignored");
        }
    }

    pub fn subscribe(&mut self, observer: Rc<dyn ConnectionObserver<S>>) {
        self.observers.subscribe(observer);
    }

    pub fn unsubscribe(&mut self, observer: &Rc<dyn ConnectionObserver<S>>) {
        self.observers.unsubscribe(observer);
    }

    fn advance_state(&mut self, new_state: ReadyState) {
        debug_assert!(new_state >= self.state, "ready state must not go backwards");
        self.state = new_state;
    }

    fn emit_close(&mut self) {
        if self.close_emitted {
            return;
        }
        self.close_emitted = true;
        let code = self.close_code.unwrap_or(CloseCode::Abnormal);
        let reason = self.close_reason.clone().unwrap_or_default();
        debug!("connection {} closed: {code} {reason:?}", self.id);
        self.pending_events.push(ConnectionEvent::Close(code, reason));
    }
}

impl<S: crate::stream::RawSocket> Connection<S> {
    /// Queue raw bytes (handshake response or a serialized frame) for
    /// output and try to flush immediately.
    fn queue_raw(&mut self, bytes: &[u8]) {
        self.out_buf.extend_from_slice(bytes);
        self.flush_out();
    }

    fn queue_frame(&mut self, mut frame: Frame) {
        let bytes = frame.serialize().to_vec();
        self.queue_raw(&bytes);
    }

    /// Push as much of `out_buf` to the transport as it will accept
    /// without blocking; a non-blocking write may be short. A write error
    /// other than `WouldBlock` (already absorbed by `ByteStream::write`)
    /// is a dead transport, not something the application can act on — it
    /// closes the connection the same way an unexpected EOF would.
    fn flush_out(&mut self) {
        while !self.out_buf.is_empty() {
            match self.stream.write(&self.out_buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.out_buf.drain(..n);
                }
                Err(_) => {
                    self.fail_eof();
                    return;
                }
            }
        }
    }

    /// Read up to `READ_CHUNK` bytes. A transport error other than
    /// `WouldBlock` closes the connection abnormally and reads back as
    /// an empty chunk, the same as EOF with nothing buffered.
    fn read_chunk(&mut self) -> Vec<u8> {
        match self.stream.read(READ_CHUNK) {
            Ok(chunk) => chunk,
            Err(_) => {
                self.fail_eof();
                Vec::new()
            }
        }
    }

    /// Advance the state machine by one step. Non-blocking: reads and
    /// writes whatever is currently available and returns immediately.
    /// Intended to be called repeatedly by a driver loop.
    pub fn cycle(&mut self) -> Result<()> {
        match self.state {
            ReadyState::New => self.cycle_handshake(),
            ReadyState::Open => self.cycle_open(),
            ReadyState::Closing => self.cycle_closing(),
            ReadyState::Closed => Ok(()),
        }
    }

    fn cycle_handshake(&mut self) -> Result<()> {
        self.flush_out();
        if !self.read_handshake {
            let chunk = self.read_chunk();
            if chunk.is_empty() {
                if self.stream.is_eof() {
                    self.fail_eof();
                }
                return Ok(());
            }
            self.last_activity = Instant::now();
            self.in_buf.extend(&chunk);

            match http::parse_request(self.in_buf.as_slice()) {
                Ok(None) => return Ok(()),
                Ok(Some((consumed, request))) => {
                    self.in_buf.consume(consumed);
                    self.finish_handshake(request)?;
                }
                Err(Error::Protocol(err)) => return self.reject_handshake(err),
                Err(other) => return Err(other),
            }
        }

        // The request parsed on an earlier tick, and `HandshakeReceived`
        // has had a chance to reach observers (who may have called
        // `set_cookie`): build and send the response now.
        if self.read_handshake && !self.response_built {
            self.build_handshake_response();
            return Ok(());
        }

        // Once the response has fully drained to the transport, the
        // handshake is done and the connection opens. A partial write
        // means this same check runs again, flush-first, next cycle.
        if self.out_buf.is_empty() && !self.sent_handshake {
            self.sent_handshake = true;
            self.advance_state(ReadyState::Open);
            self.pending_events.push(ConnectionEvent::Open);
        }
        Ok(())
    }

    /// Parse and validate the request, stash everything `get_header`/
    /// `get_cookie`/`subprotocol` need, and queue the `HandshakeReceived`
    /// event. Deliberately does *not* build the response yet — that
    /// happens on a later cycle, after observers have had a chance to call
    /// `set_cookie`.
    fn finish_handshake(&mut self, request: HandshakeRequest) -> Result<()> {
        if request.headers.find("sec-websocket-key").is_none() {
            return self.reject_handshake(ProtocolError::MissingSecWebSocketKey);
        }
        if request.headers.find("host").is_none() {
            return self.reject_handshake(ProtocolError::MissingHost);
        }
        match request.headers.find("sec-websocket-version") {
            Some("13") => {}
            _ => return self.reject_handshake(ProtocolError::MissingOrWrongVersion),
        }

        self.request_cookies = request
            .headers
            .find("cookie")
            .map(parse_cookie_header)
            .unwrap_or_default();
        self.negotiated_subprotocol = negotiate_subprotocol(
            request.headers.find("sec-websocket-protocol"),
            &self.config.allowed_subprotocols,
        );
        self.request_path = Some(request.path);
        self.request_headers = request.headers;
        self.read_handshake = true;
        self.pending_events.push(ConnectionEvent::HandshakeReceived);
        Ok(())
    }

    fn build_handshake_response(&mut self) {
        let accept_key = compute_accept_key(
            self.request_headers.find("sec-websocket-key").unwrap_or_default(),
        );
        let mut headers = vec![
            ("Upgrade".to_string(), "websocket".to_string()),
            ("Connection".to_string(), "Upgrade".to_string()),
            ("Sec-WebSocket-Accept".to_string(), accept_key),
        ];
        if let Some(ref proto) = self.negotiated_subprotocol {
            headers.push(("Sec-WebSocket-Protocol".to_string(), proto.clone()));
        }
        for cookie in self.pending_set_cookies.drain(..) {
            headers.push(("Set-Cookie".to_string(), cookie.to_string()));
        }
        self.response_built = true;
        let response = http::format_response("HTTP/1.1 101 Switching Protocols", &headers);
        self.queue_raw(&response);
    }

    fn reject_handshake(&mut self, err: ProtocolError) -> Result<()> {
        let status_line = match err {
            ProtocolError::WrongHttpMethod => "HTTP/1.1 405 Method Not Allowed",
            _ => "HTTP/1.1 400 Bad Request",
        };
        let mut headers = Vec::new();
        if matches!(err, ProtocolError::WrongHttpMethod) {
            headers.push(("Allow".to_string(), "GET".to_string()));
        }
        let response = http::format_response(status_line, &headers);
        // Best-effort: we're tearing the connection down regardless of
        // whether this write fully lands.
        let _ = self.stream.write(&response);
        self.force_close(CloseCode::Protocol, "");
        Err(Error::Protocol(err))
    }

    fn cycle_open(&mut self) -> Result<()> {
        self.flush_out();
        let chunk = self.read_chunk();
        if chunk.is_empty() {
            if self.stream.is_eof() {
                self.fail_eof();
            }
            return Ok(());
        }
        self.last_activity = Instant::now();
        self.in_buf.extend(&chunk);

        loop {
            let result = self.parser.advance(&mut self.in_buf, self.config.max_in);
            match result {
                Ok(Some(frame)) => {
                    if let Err(e) = self.handle_frame(frame) {
                        self.fail_protocol(e);
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.fail_protocol(e);
                    break;
                }
            }
            if self.state != ReadyState::Open {
                break;
            }
        }
        Ok(())
    }

    fn fail_protocol(&mut self, err: Error) {
        let (code, reason) = match &err {
            Error::Protocol(ProtocolError::InvalidUtf8) => (CloseCode::Invalid, "Invalid UTF-8"),
            Error::Protocol(ProtocolError::UnmaskedFrameFromClient) => {
                (CloseCode::Protocol, "Message should be masked.")
            }
            Error::Protocol(ProtocolError::NonZeroReservedBits) => {
                (CloseCode::Protocol, "Reserved bits must be zero")
            }
            Error::Protocol(ProtocolError::FragmentedControlFrame) => {
                (CloseCode::Protocol, "Control frames must not be fragmented")
            }
            Error::Protocol(ProtocolError::ControlFrameTooBig) => {
                (CloseCode::Protocol, "Control frame payload too large")
            }
            Error::Protocol(ProtocolError::UnexpectedContinuationFrame) => {
                (CloseCode::Protocol, "Unexpected continuation frame")
            }
            Error::Protocol(ProtocolError::ExpectedContinuation(_)) => {
                (CloseCode::Protocol, "Expected a continuation frame")
            }
            Error::Protocol(ProtocolError::InvalidCloseSequence) => {
                (CloseCode::Protocol, "Invalid close frame payload")
            }
            Error::Capacity(_) => (CloseCode::Size, "Frame too large"),
            _ => (CloseCode::Protocol, "Protocol error"),
        };
        warn!("connection {} protocol violation: {err}", self.id);
        self.protocol_violation_close(code, reason);
    }

    /// Send a close frame (best-effort) and close immediately, without
    /// waiting for the peer's reply. Unlike [`disconnect`](Self::disconnect),
    /// which waits out the closing handshake for a graceful,
    /// application-initiated close, a peer that just broke protocol isn't
    /// trusted to complete one.
    fn protocol_violation_close(&mut self, code: CloseCode, reason: &str) {
        if self.state == ReadyState::Closed {
            return;
        }
        if !self.sent_close {
            let truncated = truncate_close_reason(reason);
            self.queue_frame(Frame::close(Some((code, &truncated))));
            self.sent_close = true;
        }
        self.close_code.get_or_insert(code);
        self.close_reason.get_or_insert_with(|| reason.to_string());
        self.finish_close();
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        if frame.header().rsv != 0 {
            return Err(Error::Protocol(ProtocolError::NonZeroReservedBits));
        }
        if !frame.header().is_masked() {
            return Err(Error::Protocol(ProtocolError::UnmaskedFrameFromClient));
        }
        frame.check_control_invariants()?;

        match frame.header().opcode {
            OpCode::Control(Control::Close) => self.on_close_frame(frame),
            OpCode::Control(Control::Ping) => {
                trace!("connection {} received ping", self.id);
                self.queue_frame(Frame::pong(frame.payload().to_vec()));
                self.pending_events.push(ConnectionEvent::Ping);
                Ok(())
            }
            OpCode::Control(Control::Pong) => {
                self.pending_events.push(ConnectionEvent::Pong);
                Ok(())
            }
            OpCode::Control(Control::Reserved(_)) => unreachable!("filtered by the frame parser"),
            OpCode::Data(data) => self.handle_data_frame(frame, data),
        }
    }

    fn handle_data_frame(&mut self, frame: Frame, data: Data) -> Result<()> {
        let is_final = frame.header().is_final;
        match data {
            Data::Continue => {
                let current_len = self
                    .current_message
                    .as_ref()
                    .ok_or(Error::Protocol(ProtocolError::UnexpectedContinuationFrame))?
                    .len();
                self.check_message_size(current_len + frame.payload().len() as u64)?;
                let msg = self.current_message.as_mut().unwrap();
                msg.extend(frame.payload())?;
                if is_final {
                    let message = self.current_message.take().unwrap().complete()?;
                    self.deliver_message(message);
                }
            }
            Data::Text | Data::Binary => {
                if self.current_message.is_some() {
                    return Err(Error::Protocol(ProtocolError::ExpectedContinuation(data)));
                }
                self.check_message_size(frame.payload().len() as u64)?;
                let kind = if data == Data::Text { MessageType::Text } else { MessageType::Binary };
                let mut incomplete = IncompleteMessage::new(kind);
                incomplete.extend(frame.payload())?;
                if is_final {
                    self.deliver_message(incomplete.complete()?);
                } else {
                    self.current_message = Some(incomplete);
                }
            }
            Data::Reserved(_) => unreachable!("filtered by the frame parser"),
        }
        Ok(())
    }

    /// `max_in` bounds a single frame's payload; this bounds the running
    /// total across however many continuation frames a fragmented message
    /// is split into, which no per-frame check catches.
    fn check_message_size(&self, projected: u64) -> Result<()> {
        if projected > self.config.max_in {
            return Err(Error::Capacity(CapacityError::MessageTooLarge {
                size: projected,
                max_size: self.config.max_in,
            }));
        }
        Ok(())
    }

    fn deliver_message(&mut self, message: Message) {
        self.pending_events.push(ConnectionEvent::Message(message));
    }

    fn on_close_frame(&mut self, frame: Frame) -> Result<()> {
        let parsed = frame.parse_close()?;
        self.received_close = true;
        if self.close_code.is_none() {
            match &parsed {
                Some((code, reason)) => {
                    self.close_code = Some(*code);
                    self.close_reason = Some(reason.clone());
                }
                None => {
                    self.close_code = Some(CloseCode::NoStatusRcvd);
                    self.close_reason = Some(String::new());
                }
            }
        }
        if !self.sent_close {
            let reply = match &parsed {
                Some((code, _)) if code.is_allowed() => Frame::close(Some((CloseCode::Normal, ""))),
                Some(_) => Frame::close(Some((CloseCode::Protocol, "protocol violation"))),
                None => Frame::close(None),
            };
            self.queue_frame(reply);
            self.sent_close = true;
            self.close_started_at = Some(Instant::now());
        }
        self.advance_state(ReadyState::Closing);
        if self.sent_close && self.received_close {
            self.finish_close();
        }
        Ok(())
    }

    fn cycle_closing(&mut self) -> Result<()> {
        self.flush_out();
        if self.state == ReadyState::Closed {
            return Ok(());
        }
        let chunk = self.read_chunk();
        if !chunk.is_empty() {
            self.in_buf.extend(&chunk);
            while let Some(frame) = self.parser.advance(&mut self.in_buf, self.config.max_in)? {
                if let OpCode::Control(Control::Close) = frame.header().opcode {
                    self.on_close_frame(frame)?;
                    break;
                }
                // Any other post-close traffic is ignored; the peer
                // shouldn't send it, but it isn't our job to police it.
            }
        } else if self.stream.is_eof() {
            self.finish_close();
            return Ok(());
        }

        if let Some(started) = self.close_started_at {
            if self.state != ReadyState::Closed && started.elapsed() >= self.config.close_grace {
                debug!("connection {} close grace expired, forcing shutdown", self.id);
                self.finish_close();
            }
        }
        Ok(())
    }

    fn finish_close(&mut self) {
        if self.state == ReadyState::Closed {
            return;
        }
        self.flush_out();
        self.stream_close();
        self.advance_state(ReadyState::Closed);
        self.close_code.get_or_insert(CloseCode::NoStatusRcvd);
        self.close_reason.get_or_insert_with(String::new);
        self.emit_close();
    }

    fn fail_eof(&mut self) {
        if self.state == ReadyState::Closed {
            return;
        }
        self.stream_close();
        self.advance_state(ReadyState::Closed);
        self.close_code = Some(CloseCode::Abnormal);
        self.close_reason = Some(String::new());
        self.emit_close();
    }

    /// Force the connection closed with `code`/`reason` without
    /// negotiating — used for handshake rejection, where no WebSocket
    /// session ever opened to negotiate a close over.
    fn force_close(&mut self, code: CloseCode, reason: &str) {
        self.stream_close();
        self.advance_state(ReadyState::Closed);
        self.close_code = Some(code);
        self.close_reason = Some(reason.to_string());
        self.emit_close();
    }

    /// Begin or complete the closing handshake.
    /// A no-op beyond recording the request if already sent; if the peer's
    /// close was already received, completes the handshake immediately.
    pub fn disconnect(&mut self, code: Option<CloseCode>, reason: Option<&str>) {
        if self.state == ReadyState::Closed {
            return;
        }
        if !self.sent_close {
            let reason = reason.unwrap_or("");
            let truncated = truncate_close_reason(reason);
            let frame = match code {
                Some(c) => Frame::close(Some((c, &truncated))),
                None => Frame::close(None),
            };
            self.queue_frame(frame);
            self.sent_close = true;
            self.close_started_at = Some(Instant::now());
            if self.close_code.is_none() {
                self.close_code = Some(code.unwrap_or(CloseCode::Normal));
                self.close_reason = Some(truncated);
            }
            if self.state < ReadyState::Closing {
                self.advance_state(ReadyState::Closing);
            }
        }
        if self.sent_close && self.received_close {
            self.finish_close();
        }
    }

    /// Send a text message, fragmenting into frames of at most
    /// `config.max_out` payload bytes each.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_fragmented(text.as_bytes(), Data::Text)
    }

    /// Send a binary message, fragmented the same way as `send_text`.
    pub fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.send_fragmented(data, Data::Binary)
    }

    fn send_fragmented(&mut self, payload: &[u8], kind: Data) -> Result<()> {
        if self.state != ReadyState::Open {
            return Err(Error::AlreadyClosed);
        }
        let max = usize::try_from(self.config.max_out).unwrap_or(usize::MAX).max(1);
        if payload.is_empty() {
            self.queue_frame(Frame::message(Vec::new(), OpCode::Data(kind), true));
            return Ok(());
        }
        let mut chunks = payload.chunks(max).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let is_final = chunks.peek().is_none();
            let opcode = if first { OpCode::Data(kind) } else { OpCode::Data(Data::Continue) };
            self.queue_frame(Frame::message(chunk.to_vec(), opcode, is_final));
            first = false;
        }
        Ok(())
    }

    pub fn ping(&mut self) -> Result<()> {
        if self.state != ReadyState::Open {
            return Err(Error::AlreadyClosed);
        }
        self.queue_frame(Frame::ping(Vec::new()));
        Ok(())
    }

    pub fn pong(&mut self) -> Result<()> {
        if self.state != ReadyState::Open {
            return Err(Error::AlreadyClosed);
        }
        self.queue_frame(Frame::pong(Vec::new()));
        Ok(())
    }

    fn stream_close(&mut self) {
        self.stream.close();
    }
}

/// Truncate `reason` so `code (2 bytes) + reason` fits the 125-byte
/// control-frame payload limit, splitting on a UTF-8 boundary.
fn truncate_close_reason(reason: &str) -> String {
    const MAX: usize = 123;
    if reason.len() <= MAX {
        return reason.to_string();
    }
    let mut end = MAX;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
