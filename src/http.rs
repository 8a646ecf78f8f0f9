//! One-shot HTTP request-line + header parsing used only during the
//! opening handshake, built on `httparse::Request` with a small
//! standalone case-insensitive header map rather than a typed `Request`
//! type (see DESIGN.md for the dependency tradeoff).

use crate::error::{Error, ProtocolError, Result};
use std::fmt::Write as _;

const MAX_HEADERS: usize = 64;

/// Case-insensitive header storage, preserving original insertion order
/// and original-case names (lookups fold to lower-case).
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, appending rather than replacing (mirrors raw wire
    /// order; callers doing a lookup only ever want `find` i.e. the first
    /// match, as RFC 6455 requires for `Sec-WebSocket-Key`/`Host`).
    pub fn insert(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.trim().to_string()));
    }

    /// Find the first header matching `name`, case-insensitively.
    pub fn find(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate all `(name, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A parsed opening-handshake request line + headers.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// The request-target, e.g. `/chat`.
    pub path: String,
    /// Request headers, folded for case-insensitive lookup.
    pub headers: HeaderMap,
}

/// Attempt to parse a complete HTTP request (request line + headers,
/// terminated by a blank line) from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet contain a complete request
/// (more bytes are needed); the caller should retry once more bytes have
/// accumulated. Returns `Ok(Some((consumed, request)))` on success, where
/// `consumed` is the number of bytes of `buf` that made up the request
/// (including the trailing blank line).
pub fn parse_request(buf: &[u8]) -> Result<Option<(usize, HandshakeRequest)>> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw_headers);
    let status = req.parse(buf).map_err(|e| Error::Protocol(e.into()))?;

    let consumed = match status {
        httparse::Status::Partial => return Ok(None),
        httparse::Status::Complete(n) => n,
    };

    let method = req.method.ok_or(Error::Protocol(ProtocolError::WrongHttpMethod))?;
    if method != "GET" {
        return Err(Error::Protocol(ProtocolError::WrongHttpMethod));
    }
    // httparse encodes HTTP/1.x as the minor version number: 0 => 1.0, 1 => 1.1.
    if req.version != Some(1) {
        return Err(Error::Protocol(ProtocolError::WrongHttpVersion));
    }

    let path = req.path.ok_or(Error::Protocol(ProtocolError::WrongHttpMethod))?.to_string();
    let mut headers = HeaderMap::new();
    for h in req.headers.iter() {
        let value = std::str::from_utf8(h.value).unwrap_or("");
        headers.insert(h.name, value);
    }

    Ok(Some((consumed, HandshakeRequest { path, headers })))
}

/// HTTP status line + header block for the 101 Switching Protocols
/// response, or for a handshake-rejection error response.
pub fn format_response(status_line: &str, headers: &[(String, String)]) -> Vec<u8> {
    let mut out = String::new();
    let _ = writeln!(out, "{status_line}\r");
    for (name, value) in headers {
        let _ = write!(out, "{name}: {value}\r\n");
    }
    out.push_str("\r\n");
    out.into_bytes()
}
