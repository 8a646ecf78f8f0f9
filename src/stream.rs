//! Non-blocking byte I/O over TCP/TLS. `Socket` is a plain/TLS switch
//! implementing `Read`+`Write`; `RawSocket` adds the non-blocking toggle
//! and shutdown every concrete transport needs, and `ByteStream` wraps
//! either one with byte counters, clean-EOF tracking, and a buffered
//! `read_line` for line-oriented protocols.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};

/// A concrete transport `ByteStream` can wrap: anything that is `Read +
/// Write` and additionally knows how to flip its own blocking mode and
/// shut itself down. Implemented for `TcpStream` directly and, behind the
/// `tls` feature, for a TLS-wrapped socket.
pub trait RawSocket: Read + Write {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;
    fn shutdown(&mut self);
}

impl RawSocket for TcpStream {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn shutdown(&mut self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }
}

#[cfg(feature = "tls")]
pub mod tls_socket {
    use super::RawSocket;
    use rustls::{ServerConnection, StreamOwned};
    use std::io::{self, Read, Write};
    use std::net::TcpStream;

    /// A TLS-wrapped server-side socket.
    pub struct TlsSocket(pub StreamOwned<ServerConnection, TcpStream>);

    impl Read for TlsSocket {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for TlsSocket {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    impl RawSocket for TlsSocket {
        fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
            self.0.sock.set_nonblocking(nonblocking)
        }

        fn shutdown(&mut self) {
            let _ = self.0.sock.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// Plain-or-TLS transport switch.
pub enum Socket {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(tls_socket::TlsSocket),
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Socket::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => s.flush(),
        }
    }
}

impl RawSocket for Socket {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        match self {
            Socket::Plain(s) => RawSocket::set_nonblocking(s, nonblocking),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => s.set_nonblocking(nonblocking),
        }
    }

    fn shutdown(&mut self) {
        match self {
            Socket::Plain(s) => RawSocket::shutdown(s),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => s.shutdown(),
        }
    }
}

/// Non-blocking byte-stream wrapper. Generic over the transport so tests
/// can plug in an in-memory duplex double instead of a real socket.
pub struct ByteStream<S> {
    inner: S,
    bytes_in: u64,
    bytes_out: u64,
    eof: bool,
    line_buf: Vec<u8>,
    closed: bool,
}

impl<S> ByteStream<S> {
    pub fn new(inner: S) -> Self {
        ByteStream { inner, bytes_in: 0, bytes_out: 0, eof: false, line_buf: Vec::new(), closed: false }
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// True once a `read` has observed a clean EOF from the transport.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: Read> ByteStream<S> {
    /// Read up to `max` bytes without blocking. Returns an empty vector
    /// (not an error) both when no data is currently available
    /// (`WouldBlock`) and, distinguishably, when the peer has performed a
    /// clean shutdown — check [`is_eof`](Self::is_eof) to tell the two
    /// apart.
    pub fn read(&mut self, max: usize) -> io::Result<Vec<u8>> {
        if self.closed {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; max];
        match self.inner.read(&mut buf) {
            Ok(0) => {
                self.eof = true;
                Ok(Vec::new())
            }
            Ok(n) => {
                buf.truncate(n);
                self.bytes_in += n as u64;
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Read through the next `\r\n`, buffering partial lines across calls.
    /// Returns `None` if no full line is available yet (or the transport
    /// is at EOF with nothing left), matching the non-blocking contract.
    pub fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = find_crlf(&self.line_buf) {
                let line = self.line_buf[..pos].to_vec();
                self.line_buf.drain(..pos + 2);
                return Ok(Some(line));
            }
            let chunk = self.read(2048)?;
            if chunk.is_empty() {
                return Ok(None);
            }
            self.line_buf.extend_from_slice(&chunk);
        }
    }
}

impl<S: Write> ByteStream<S> {
    /// Write `data`, returning however many bytes were accepted (possibly
    /// fewer than `data.len()` — a short write, not an error; the caller
    /// is responsible for resuming with the remainder).
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.inner.write(data) {
            Ok(n) => {
                self.bytes_out += n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl<S: RawSocket> ByteStream<S> {
    pub fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.inner.set_nonblocking(!blocking)
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.inner.shutdown();
            self.closed = true;
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // A minimal non-blocking-capable duplex double: reads from a fixed
    // input, writes into a growable output, and reports `WouldBlock` once
    // the input is exhausted rather than `Ok(0)`, the way a real
    // non-blocking socket with nothing left to deliver would (plain EOF
    // is reserved for a genuinely closed peer).
    struct Mock {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        exhausted_is_eof: bool,
    }

    impl Read for Mock {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = Read::read(&mut self.input, buf)?;
            if n == 0 && !self.exhausted_is_eof {
                return Err(io::Error::from(ErrorKind::WouldBlock));
            }
            Ok(n)
        }
    }

    impl Write for Mock {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_reports_empty_without_blocking() {
        let mock = Mock { input: Cursor::new(vec![]), output: vec![], exhausted_is_eof: false };
        let mut stream = ByteStream::new(mock);
        let data = stream.read(16).unwrap();
        assert!(data.is_empty());
        assert!(!stream.is_eof());
    }

    #[test]
    fn read_reports_eof_on_clean_close() {
        let mock = Mock { input: Cursor::new(vec![]), output: vec![], exhausted_is_eof: true };
        let mut stream = ByteStream::new(mock);
        let data = stream.read(16).unwrap();
        assert!(data.is_empty());
        assert!(stream.is_eof());
    }

    #[test]
    fn read_counts_bytes_in() {
        let mock = Mock { input: Cursor::new(b"hello".to_vec()), output: vec![], exhausted_is_eof: false };
        let mut stream = ByteStream::new(mock);
        let data = stream.read(16).unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(stream.bytes_in(), 5);
    }

    #[test]
    fn read_line_splits_on_crlf_across_reads() {
        let mock = Mock {
            input: Cursor::new(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec()),
            output: vec![],
            exhausted_is_eof: false,
        };
        let mut stream = ByteStream::new(mock);
        assert_eq!(stream.read_line().unwrap().unwrap(), b"GET / HTTP/1.1");
        assert_eq!(stream.read_line().unwrap().unwrap(), b"Host: x");
        assert_eq!(stream.read_line().unwrap().unwrap(), b"");
    }

    #[test]
    fn write_counts_bytes_out() {
        let mock = Mock { input: Cursor::new(vec![]), output: vec![], exhausted_is_eof: false };
        let mut stream = ByteStream::new(mock);
        let n = stream.write(b"hi").unwrap();
        assert_eq!(n, 2);
        assert_eq!(stream.bytes_out(), 2);
        assert_eq!(stream.get_ref().output, b"hi");
    }
}
