//! Wire formats: the outbound form-urlencoded POST body and the inbound
//! XML message batch.
//!
//! # Request body
//!
//! UTF-8, `application/x-www-form-urlencoded`, fields in a fixed order:
//!
//! ```text
//! action=messages & id=<id> & l=<N> & s0=..&t0=..&m0=.. & s1=.. ...
//! ```
//!
//! where `s<i>` is the outbound sequence, `t<i>` the one-character message
//! type, and `m<i>` the percent-encoded payload string.
//!
//! # Response body
//!
//! An XML document whose root element is `messages`, holding zero or more
//! `message` children with `seq` and `type` attributes and the encoded
//! payload as their first text child:
//!
//! ```text
//! <messages>
//!   <message seq="7" type="s">payload</message>
//! </messages>
//! ```
//!
//! Parsing is a streaming pull over the body bytes. The parser never
//! resolves external entities or fetches DTDs/schemas — `quick-xml` has no
//! such machinery — and any document type declaration is refused outright.

use std::str;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, BytesText, Event};
use url::form_urlencoded;

use crate::error::{MessageError, ProtocolError};
use crate::message::{Message, MessageKind};

/// Content type of every outbound POST.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

const ROOT_ELEMENT: &[u8] = b"messages";
const MESSAGE_ELEMENT: &[u8] = b"message";

/// One `<message>` element pulled off an inbound batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Server-assigned sequence number.
    pub seq: u64,
    /// Message kind named by the `type` attribute.
    pub kind: MessageKind,
    /// The encoded payload string.
    pub payload: String,
}

/// Build the form-urlencoded body for one outbound batch.
///
/// `entries` pairs each message with the outbound sequence assigned to it
/// as it entered the body. An empty batch is valid: it is the kicker POST
/// that establishes a receive channel when there is nothing to say.
///
/// # Errors
///
/// Returns [`MessageError`] when a file-backed payload cannot be read.
pub fn encode_post_body(id: &str, entries: &[(u64, Message)]) -> Result<Vec<u8>, MessageError> {
    let mut body = form_urlencoded::Serializer::new(String::new());
    body.append_pair("action", "messages");
    body.append_pair("id", id);
    body.append_pair("l", &entries.len().to_string());

    let mut tag = [0u8; 4];
    for (i, (seq, message)) in entries.iter().enumerate() {
        body.append_pair(&format!("s{i}"), &seq.to_string());
        body.append_pair(&format!("t{i}"), message.kind().type_char().encode_utf8(&mut tag));
        body.append_pair(&format!("m{i}"), &message.encode()?);
    }

    Ok(body.finish().into_bytes())
}

/// Parse an inbound response body into its wire messages.
///
/// Elements under the root that are not named `message` are skipped, as is
/// any text between children. Only the *first* child of a `message`
/// element contributes payload text; an element first child is fatal.
///
/// # Errors
///
/// Returns [`ProtocolError`] for a missing or misnamed root, a DOCTYPE,
/// malformed `seq`/`type` attributes, a non-text first child, or any
/// lower-level XML error.
pub fn parse_message_batch(body: &[u8]) -> Result<Vec<WireMessage>, ProtocolError> {
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();

    // Locate the root element, refusing DOCTYPE on the way in.
    let root_is_empty = loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) => {}
            Event::Text(text) if is_blank(&text) => {}
            Event::DocType(_) => return Err(ProtocolError::DtdForbidden),
            Event::Start(start) => {
                require_root_name(&start)?;
                break false;
            }
            Event::Empty(start) => {
                require_root_name(&start)?;
                break true;
            }
            Event::Eof => return Err(ProtocolError::Truncated),
            _ => return Err(ProtocolError::MissingRoot),
        }
    };

    let mut messages = Vec::new();
    if root_is_empty {
        return Ok(messages);
    }

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) if start.name().as_ref() == MESSAGE_ELEMENT => {
                let (seq, kind) = message_attributes(&start)?;
                let payload = message_payload(&mut reader)?;
                messages.push(WireMessage { seq, kind, payload });
            }
            Event::Empty(start) if start.name().as_ref() == MESSAGE_ELEMENT => {
                let (seq, kind) = message_attributes(&start)?;
                messages.push(WireMessage {
                    seq,
                    kind,
                    payload: String::new(),
                });
            }
            // Children are iterated by name; anything else is skipped.
            Event::Start(start) => {
                let mut skipped = Vec::new();
                reader.read_to_end_into(start.to_end().name(), &mut skipped)?;
            }
            Event::End(end) if end.name().as_ref() == ROOT_ELEMENT => break,
            Event::Eof => return Err(ProtocolError::Truncated),
            _ => {}
        }
    }

    Ok(messages)
}

fn require_root_name(start: &BytesStart<'_>) -> Result<(), ProtocolError> {
    if start.name().as_ref() == ROOT_ELEMENT {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedRoot {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        })
    }
}

fn is_blank(text: &BytesText<'_>) -> bool {
    text.iter().all(u8::is_ascii_whitespace)
}

/// Pull the `seq` and `type` attributes off a `message` element.
///
/// Absent attributes surface as their empty-string parse failures, the
/// same way the original treated a missing attribute.
fn message_attributes(element: &BytesStart<'_>) -> Result<(u64, MessageKind), ProtocolError> {
    let mut seq = None;
    let mut kind = None;

    for attribute in element.attributes() {
        let attribute = attribute?;
        match attribute.key.as_ref() {
            b"seq" => {
                let value = attribute
                    .unescape_value()
                    .map_err(|e| ProtocolError::Xml(e.into()))?;
                let parsed = value.parse::<u64>().map_err(|_| ProtocolError::BadSequence {
                    value: value.clone().into_owned(),
                })?;
                seq = Some(parsed);
            }
            b"type" => {
                let value = attribute
                    .unescape_value()
                    .map_err(|e| ProtocolError::Xml(e.into()))?;
                let mut chars = value.chars();
                let type_char = match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        return Err(ProtocolError::BadType {
                            value: value.into_owned(),
                        });
                    }
                };
                let parsed =
                    MessageKind::from_type_char(type_char).map_err(|_| ProtocolError::BadType {
                        value: value.clone().into_owned(),
                    })?;
                kind = Some(parsed);
            }
            _ => {}
        }
    }

    let seq = seq.ok_or(ProtocolError::BadSequence {
        value: String::new(),
    })?;
    let kind = kind.ok_or(ProtocolError::BadType {
        value: String::new(),
    })?;
    Ok((seq, kind))
}

/// Read the payload of a `message` element whose start tag was just
/// consumed, leaving the reader past its end tag.
fn message_payload(reader: &mut Reader<&[u8]>) -> Result<String, ProtocolError> {
    let mut buf = Vec::new();

    // The first node decides: absent means empty, text or CDATA is the
    // payload, anything else is fatal.
    let payload = match reader.read_event_into(&mut buf)? {
        Event::End(_) => return Ok(String::new()),
        Event::Text(text) => text
            .unescape()
            .map_err(|e| ProtocolError::Xml(e.into()))?
            .into_owned(),
        Event::CData(cdata) => str::from_utf8(&cdata)?.to_owned(),
        Event::Eof => return Err(ProtocolError::Truncated),
        _ => return Err(ProtocolError::NonTextChild),
    };

    // Trailing children carry no payload; skip to the end tag.
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::End(end) if end.name().as_ref() == MESSAGE_ELEMENT => break,
            Event::Start(start) => {
                let mut skipped = Vec::new();
                reader.read_to_end_into(start.to_end().name(), &mut skipped)?;
            }
            Event::Eof => return Err(ProtocolError::Truncated),
            _ => {}
        }
    }

    Ok(payload)
}
