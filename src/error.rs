//! Error types for the long-poll messaging transport.

use thiserror::Error;

use crate::context::SocketId;

/// Fatal socket-level errors.
///
/// Workers report these through the error callback registered at
/// [`HttpSocket::start`](crate::socket::HttpSocket::start) and then close
/// the socket; nothing at this layer is retried.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Operation on a socket that has already been closed.
    #[error("socket is closed")]
    Closed,

    /// The HTTP backend failed to connect, write, read, or timed out.
    #[error("HTTP request error: {0}")]
    Request(String),

    /// The server answered with a status other than 200.
    #[error("unexpected response status {status}")]
    Status {
        /// The HTTP status code received.
        status: u16,
    },

    /// The response document violated the wire protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server re-used an inbound sequence number.
    #[error("duplicate incoming sequence {seq}")]
    DuplicateSequence {
        /// The repeated server sequence.
        seq: u64,
    },

    /// A message payload failed to encode or decode.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// A socket with the same identifier is already registered.
    #[error("socket {id} is already registered")]
    DuplicateSocket {
        /// The identifier that collided.
        id: SocketId,
    },
}

/// Violations of the inbound XML message-batch format.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The document has no `messages` root element.
    #[error("expected a messages root element")]
    MissingRoot,

    /// The root element has the wrong name.
    #[error("unexpected root element: {name}")]
    UnexpectedRoot {
        /// The name actually found.
        name: String,
    },

    /// The first child of a `message` element was neither absent nor text.
    #[error("child of message is not a text node")]
    NonTextChild,

    /// The `seq` attribute was missing or not a decimal 64-bit integer.
    #[error("bad message sequence: {value:?}")]
    BadSequence {
        /// The attribute value as received (empty when absent).
        value: String,
    },

    /// The `type` attribute was missing or did not name a message kind.
    #[error("bad message type: {value:?}")]
    BadType {
        /// The attribute value as received (empty when absent).
        value: String,
    },

    /// Document type declarations are refused outright.
    #[error("document type declarations are not allowed")]
    DtdForbidden,

    /// The document ended before the root element closed.
    #[error("unexpected end of document")]
    Truncated,

    /// Malformed XML.
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Malformed element attribute.
    #[error("XML attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    /// Text content was not valid UTF-8.
    #[error("invalid UTF-8 in document: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Failures encoding or decoding a message payload.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The type character does not name a registered message kind.
    #[error("unknown message type: {type_char:?}")]
    UnknownType {
        /// The unrecognized wire tag.
        type_char: char,
    },

    /// A binary payload was not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Reading or writing a spilled payload failed.
    #[error("payload I/O error: {0}")]
    Io(#[from] std::io::Error),
}
