//! 9P client error types.

use std::{fmt, io};

use crate::fcall::MsgType;

/// Ways in which a received byte sequence can fail to be a 9P message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramingError {
    /// The buffer ended before a field's declared width
    Truncated,
    /// The frame's length prefix disagrees with the bytes present
    LengthMismatch { declared: u32, actual: usize },
    /// Bytes were left over after the message was decoded
    TrailingBytes(usize),
    /// A string field was not valid UTF-8
    InvalidUtf8,
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FramingError::Truncated => write!(f, "truncated frame"),
            FramingError::LengthMismatch { declared, actual } => write!(
                f,
                "frame declares {} bytes but {} are present",
                declared, actual
            ),
            FramingError::TrailingBytes(n) => write!(f, "{} trailing bytes after message", n),
            FramingError::InvalidUtf8 => write!(f, "invalid UTF-8 sequence"),
        }
    }
}

/// The error type of the client.
#[derive(Debug)]
pub enum Error {
    /// Transport failure while dialing or talking to the server
    Io(io::Error),
    /// Truncated or malformed frame
    Framing(FramingError),
    /// The kind id of a received message is not registered
    UnknownMessageKind(u8),
    /// The server answered with `Rerror`; carries its message verbatim
    Protocol(String),
    /// The server did not accept the 9P2000 dialect
    UnsupportedVersion(String),
    /// The server answered with a well-formed reply of the wrong kind
    UnexpectedReply(MsgType),
    /// The connection was closed before a reply arrived
    ConnectionClosed,
    /// Every tag is in flight
    TagExhausted,
    /// A caller-chosen tag is already in flight
    DuplicateTag(u16),
    /// No reply within the configured request timeout
    TimedOut,
}

impl Error {
    /// Whether this is an `Rerror` relayed from the server.
    pub fn is_protocol(&self) -> bool {
        matches!(*self, Error::Protocol(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "I/O error: {}", e),
            Error::Framing(ref e) => write!(f, "framing error: {}", e),
            Error::UnknownMessageKind(id) => write!(f, "unknown message kind {}", id),
            Error::Protocol(ref msg) => write!(f, "{}", msg),
            Error::UnsupportedVersion(ref v) => write!(f, "unsupported 9P version: {:?}", v),
            Error::UnexpectedReply(typ) => write!(f, "unexpected reply: {:?}", typ),
            Error::ConnectionClosed => write!(f, "connection closed"),
            Error::TagExhausted => write!(f, "no free tag"),
            Error::DuplicateTag(tag) => write!(f, "tag {} is already in flight", tag),
            Error::TimedOut => write!(f, "request timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<FramingError> for Error {
    fn from(e: FramingError) -> Self {
        Error::Framing(e)
    }
}

/// Map a reader failure inside the decoder to the framing error it means.
///
/// Decoding always works on an in-memory frame, so running out of input is
/// the only way a read can fail there.
pub(crate) fn truncated(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Framing(FramingError::Truncated),
        _ => Error::Io(e),
    }
}
