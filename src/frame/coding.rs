//! Opcodes and close codes, as laid out in RFC 6455 §5.2 and §7.4.

use std::fmt;

/// Operation codes as part of rfc6455.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum OpCode {
    /// Data (text, binary, or continuation).
    Data(Data),
    /// Control (close, ping, pong).
    Control(Control),
}

/// Data opcodes as part of rfc6455.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum Data {
    /// 0x0 denotes a continuation frame.
    Continue,
    /// 0x1 denotes a text frame.
    Text,
    /// 0x2 denotes a binary frame.
    Binary,
    /// 0x3-7 are reserved for further non-control frames.
    Reserved(u8),
}

/// Control opcodes as part of rfc6455.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum Control {
    /// 0x8 denotes a connection close.
    Close,
    /// 0x9 denotes a ping.
    Ping,
    /// 0xA denotes a pong.
    Pong,
    /// 0xB-F are reserved for further control frames.
    Reserved(u8),
}

impl OpCode {
    /// Test whether the opcode is "final", i.e. leaves the reserved range.
    pub fn is_reserved(self) -> bool {
        matches!(self, OpCode::Data(Data::Reserved(_)) | OpCode::Control(Control::Reserved(_)))
    }
}

impl From<u8> for OpCode {
    fn from(byte: u8) -> OpCode {
        use self::{Control::*, Data::*, OpCode::*};
        match byte {
            0 => Data(Continue),
            1 => Data(Text),
            2 => Data(Binary),
            3..=7 => Data(self::Data::Reserved(byte)),
            8 => Control(Close),
            9 => Control(Ping),
            10 => Control(Pong),
            11..=15 => Control(self::Control::Reserved(byte)),
            _ => panic!("Bug: invalid opcode"),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(opcode: OpCode) -> u8 {
        use self::{Control::*, Data::*, OpCode::*};
        match opcode {
            Data(Continue) => 0,
            Data(Text) => 1,
            Data(Binary) => 2,
            Data(self::Data::Reserved(byte)) => byte,
            Control(Close) => 8,
            Control(Ping) => 9,
            Control(Pong) => 10,
            Control(self::Control::Reserved(byte)) => byte,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            OpCode::Data(Data::Continue) => write!(f, "CONTINUE"),
            OpCode::Data(Data::Text) => write!(f, "TEXT"),
            OpCode::Data(Data::Binary) => write!(f, "BINARY"),
            OpCode::Data(Data::Reserved(i)) => write!(f, "RESERVED_DATA_{}", i),
            OpCode::Control(Control::Close) => write!(f, "CLOSE"),
            OpCode::Control(Control::Ping) => write!(f, "PING"),
            OpCode::Control(Control::Pong) => write!(f, "PONG"),
            OpCode::Control(Control::Reserved(i)) => write!(f, "RESERVED_CONTROL_{}", i),
        }
    }
}

/// Status code used to indicate why an endpoint is closing the WebSocket connection.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum CloseCode {
    /// Indicates a normal closure.
    Normal,
    /// Indicates that an endpoint is "going away", such as a server going down.
    Away,
    /// Indicates that an endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// Indicates that an endpoint is terminating the connection because it has received a
    /// type of data it cannot accept.
    Unsupported,
    /// Reserved for indicating that no status code was present, despite a closing frame
    /// having been received. Must not be sent.
    NoStatusRcvd,
    /// Reserved for indicating that the connection was closed abnormally, e.g. without
    /// sending/receiving a close frame. Must not be sent.
    Abnormal,
    /// Indicates that an endpoint is terminating the connection because it has received
    /// data within a message that was not consistent with the type of the message (e.g.,
    /// non-UTF-8 data within a text message).
    Invalid,
    /// Indicates that an endpoint is terminating the connection because it has received a
    /// message that violates its policy.
    Policy,
    /// Indicates that an endpoint is terminating the connection because it has received a
    /// message that is too big for it to process.
    Size,
    /// Indicates that an endpoint (client) is terminating the connection because it has
    /// expected the server to negotiate one or more extension, but the server didn't return
    /// them in the response message of the WebSocket handshake.
    Extension,
    /// Indicates that a server is terminating the connection because it encountered an
    /// unexpected condition that prevented it from fulfilling the request.
    Error,
    /// Indicates that the server is restarting.
    Restart,
    /// Indicates that the server is overloaded and the client should either connect to a
    /// different IP (when multiple targets for hostname are available) or reconnect to the
    /// same IP when a user has performed an action.
    Again,
    #[doc(hidden)]
    Tls,
    #[doc(hidden)]
    Reserved(u16),
    #[doc(hidden)]
    Iana(u16),
    #[doc(hidden)]
    Library(u16),
    #[doc(hidden)]
    Bad(u16),
}

impl CloseCode {
    /// Tell if this code is allowed to be sent on the wire by RFC 6455 §7.4.1/§7.4.2.
    pub fn is_allowed(self) -> bool {
        !matches!(
            self,
            CloseCode::Bad(_)
                | CloseCode::Reserved(_)
                | CloseCode::NoStatusRcvd
                | CloseCode::Abnormal
                | CloseCode::Tls
        )
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatusRcvd => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(c) | CloseCode::Iana(c) | CloseCode::Library(c) | CloseCode::Bad(c) => c,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::NoStatusRcvd,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            1012 => CloseCode::Restart,
            1013 => CloseCode::Again,
            1015 => CloseCode::Tls,
            1..=999 => CloseCode::Bad(code),
            1016..=2999 => CloseCode::Reserved(code),
            3000..=3999 => CloseCode::Iana(code),
            4000..=4999 => CloseCode::Library(code),
            _ => CloseCode::Bad(code),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&OpCode::Data(*self), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for byte in 0..16u8 {
            let op = OpCode::from(byte);
            assert_eq!(u8::from(op), byte);
        }
    }

    #[test]
    fn close_code_roundtrip() {
        for code in [1000u16, 1001, 1002, 1003, 1007, 1008, 1009, 1011, 4500] {
            assert_eq!(u16::from(CloseCode::from(code)), code);
        }
    }

    #[test]
    fn reserved_opcodes_are_reserved() {
        assert!(OpCode::from(3).is_reserved());
        assert!(OpCode::from(11).is_reserved());
        assert!(!OpCode::from(1).is_reserved());
    }

    #[test]
    fn disallowed_close_codes() {
        assert!(!CloseCode::Abnormal.is_allowed());
        assert!(!CloseCode::NoStatusRcvd.is_allowed());
        assert!(CloseCode::Normal.is_allowed());
        assert!(CloseCode::Protocol.is_allowed());
    }
}
