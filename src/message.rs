//! The message model and its string codec.
//!
//! Every message travels as a single form-encodable string plus a
//! one-character type tag. Text payloads are carried verbatim; binary and
//! file payloads are carried as base64. File payloads are spilled into a
//! [`TempFileContext`] while decoding so large messages never have to stay
//! resident past their delivery.

use std::fs;
use std::path::{Path, PathBuf};

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::MessageError;
use crate::tempfiles::TempFileContext;

/// The registered message kinds and their wire type characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Plain text, tag `s`.
    Text,
    /// Raw bytes, tag `b`.
    Bytes,
    /// Disk-backed payload, tag `f`.
    File,
}

impl MessageKind {
    /// Look up the kind named by a wire type character.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::UnknownType`] for an unregistered tag.
    pub fn from_type_char(type_char: char) -> Result<Self, MessageError> {
        match type_char {
            's' => Ok(Self::Text),
            'b' => Ok(Self::Bytes),
            'f' => Ok(Self::File),
            _ => Err(MessageError::UnknownType { type_char }),
        }
    }

    /// The wire type character for this kind.
    #[must_use]
    pub const fn type_char(self) -> char {
        match self {
            Self::Text => 's',
            Self::Bytes => 'b',
            Self::File => 'f',
        }
    }
}

/// A decoded application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A plain text payload.
    Text(String),
    /// A raw byte payload, base64 on the wire.
    Bytes(Vec<u8>),
    /// A payload spilled to disk during decoding.
    File(FileMessage),
}

/// A message whose payload lives in a spilled temp file.
///
/// The file belongs to the [`TempFileContext`] that decoded it and is
/// deleted once the delivery that handed it upward completes; read it
/// during delivery or copy it elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMessage {
    path: PathBuf,
}

impl FileMessage {
    /// Wrap an existing file as a message payload.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Where the payload lives on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the payload back into memory.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, notably once the backing spill
    /// context has been released.
    pub fn read(&self) -> std::io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

impl Message {
    /// The kind (and thus the wire type character) of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Bytes(_) => MessageKind::Bytes,
            Self::File(_) => MessageKind::File,
        }
    }

    /// Encode the payload as its wire string.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Io`] when a file-backed payload cannot be
    /// read.
    pub fn encode(&self) -> Result<String, MessageError> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Bytes(bytes) => Ok(STANDARD.encode(bytes)),
            Self::File(file) => Ok(STANDARD.encode(file.read()?)),
        }
    }

    /// Decode a wire payload of the given kind.
    ///
    /// File payloads are written into `spill`, which must stay alive until
    /// the message has been handled.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] on bad base64 or a failed spill write.
    pub fn decode(
        kind: MessageKind,
        payload: &str,
        spill: &TempFileContext,
    ) -> Result<Self, MessageError> {
        match kind {
            MessageKind::Text => Ok(Self::Text(payload.to_owned())),
            MessageKind::Bytes => Ok(Self::Bytes(STANDARD.decode(payload)?)),
            MessageKind::File => {
                let bytes = STANDARD.decode(payload)?;
                let path = spill.spill(&bytes)?;
                Ok(Self::File(FileMessage::new(path)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_chars_round_trip() {
        for kind in [MessageKind::Text, MessageKind::Bytes, MessageKind::File] {
            assert_eq!(MessageKind::from_type_char(kind.type_char()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_type_char_is_rejected() {
        assert!(matches!(
            MessageKind::from_type_char('z'),
            Err(MessageError::UnknownType { type_char: 'z' })
        ));
    }

    #[test]
    fn text_encodes_verbatim() {
        let message = Message::Text("hello world".into());
        assert_eq!(message.encode().unwrap(), "hello world");
    }

    #[test]
    fn bytes_round_trip_through_base64() {
        let spill = TempFileContext::new();
        let message = Message::Bytes(vec![0, 1, 2, 254, 255]);
        let encoded = message.encode().unwrap();
        let decoded = Message::decode(MessageKind::Bytes, &encoded, &spill).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn file_payload_spills_to_disk() {
        let spill = TempFileContext::new();
        let encoded = STANDARD.encode(b"spilled payload");
        let decoded = Message::decode(MessageKind::File, &encoded, &spill).unwrap();

        let Message::File(file) = &decoded else {
            panic!("expected a file message");
        };
        assert_eq!(file.read().unwrap(), b"spilled payload");
        assert_eq!(spill.file_count(), 1);
        assert_eq!(decoded.encode().unwrap(), encoded);
    }
}
