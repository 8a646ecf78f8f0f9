//! Application-visible message payloads and the fragment-reassembly
//! collector that builds them. `IncompleteMessage` streams a text
//! fragment's bytes through the `utf8` crate's incremental validator so a
//! multi-byte codepoint split across frames is checked once the full
//! sequence is in, rather than per-frame; invalid UTF-8 closes with 1007.

use crate::error::{Error, ProtocolError, Result};

/// A complete WebSocket message delivered to the application via the
/// `message` observer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message; already validated as UTF-8.
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
}

impl Message {
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Message::Text(s) => s.into_bytes(),
            Message::Binary(b) => b,
        }
    }
}

/// The type of message currently being assembled.
#[derive(Debug, Clone, Copy)]
pub enum MessageType {
    Text,
    Binary,
}

enum Collector {
    Text(String, utf8::Incomplete),
    Binary(Vec<u8>),
}

/// Accumulates fragments of one in-progress message. One instance lives
/// per `Connection`, created when the first (non-final) data frame of a
/// message arrives and consumed when the terminating final frame lands.
pub struct IncompleteMessage {
    collector: Collector,
}

impl IncompleteMessage {
    pub fn new(kind: MessageType) -> Self {
        IncompleteMessage {
            collector: match kind {
                MessageType::Binary => Collector::Binary(Vec::new()),
                MessageType::Text => Collector::Text(String::new(), utf8::Incomplete::empty()),
            },
        }
    }

    /// Append one more fragment's payload bytes.
    pub fn extend(&mut self, tail: &[u8]) -> Result<()> {
        match &mut self.collector {
            Collector::Binary(buf) => {
                buf.extend_from_slice(tail);
                Ok(())
            }
            Collector::Text(text, incomplete) => {
                let mut input = tail;
                if !incomplete.is_empty() {
                    match incomplete.try_complete(input) {
                        Some((Ok(s), rest)) => {
                            text.push_str(s);
                            input = rest;
                        }
                        Some((Err(_), _)) => return Err(Error::Protocol(ProtocolError::InvalidUtf8)),
                        None => return Ok(()),
                    }
                }
                match utf8::decode(input) {
                    Ok(s) => {
                        text.push_str(s);
                        Ok(())
                    }
                    Err(utf8::DecodeError::Incomplete { valid_prefix, incomplete_suffix }) => {
                        text.push_str(valid_prefix);
                        *incomplete = incomplete_suffix;
                        Ok(())
                    }
                    Err(utf8::DecodeError::Invalid { .. }) => Err(Error::Protocol(ProtocolError::InvalidUtf8)),
                }
            }
        }
    }

    /// Bytes assembled so far, across every fragment extended in. Checked
    /// against the configured message-size cap on each fragment, since
    /// `max_in` alone only bounds a single frame's payload, not the sum of
    /// a long run of small continuation frames.
    pub fn len(&self) -> u64 {
        match &self.collector {
            Collector::Binary(buf) => buf.len() as u64,
            Collector::Text(text, _) => text.len() as u64,
        }
    }

    /// Finish assembly, returning the completed message. Fails if a text
    /// message ends mid way through a multi-byte UTF-8 sequence.
    pub fn complete(self) -> Result<Message> {
        match self.collector {
            Collector::Binary(buf) => Ok(Message::Binary(buf)),
            Collector::Text(text, incomplete) => {
                if incomplete.is_empty() {
                    Ok(Message::Text(text))
                } else {
                    Err(Error::Protocol(ProtocolError::InvalidUtf8))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_binary_fragments() {
        let mut msg = IncompleteMessage::new(MessageType::Binary);
        msg.extend(&[1, 2]).unwrap();
        msg.extend(&[3]).unwrap();
        assert_eq!(msg.complete().unwrap(), Message::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn assembles_text_fragments() {
        let mut msg = IncompleteMessage::new(MessageType::Text);
        msg.extend("Hello, ".as_bytes()).unwrap();
        msg.extend("World!".as_bytes()).unwrap();
        assert_eq!(msg.complete().unwrap(), Message::Text("Hello, World!".into()));
    }

    #[test]
    fn assembles_text_split_mid_codepoint() {
        let bytes = "héllo".as_bytes().to_vec();
        let mut msg = IncompleteMessage::new(MessageType::Text);
        // Split right inside the 2-byte 'é' sequence.
        msg.extend(&bytes[..2]).unwrap();
        msg.extend(&bytes[2..]).unwrap();
        assert_eq!(msg.complete().unwrap(), Message::Text("héllo".into()));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut msg = IncompleteMessage::new(MessageType::Text);
        let result = msg.extend(&[0xff, 0xfe]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_truncated_utf8_at_completion() {
        let mut msg = IncompleteMessage::new(MessageType::Text);
        // Leading byte of a 2-byte sequence with no continuation byte.
        msg.extend(&[0xc3]).unwrap();
        assert!(msg.complete().is_err());
    }
}
