//! Text-based packet envelope and codec
//!
//! A packet is a message-type tag plus an ordered list of string-encoded
//! fields. On the wire it is a single ASCII digit for the tag, then each
//! field preceded by the reserved separator byte. No length prefix and no
//! terminator: one transport send is assumed to equal one receive.

use crate::{PACKET_SIZE, SEPARATOR};
use std::fmt::Display;
use std::str::FromStr;

/// Closed enumeration of protocol message kinds.
///
/// Tag values are part of the wire format and must not be reordered.
/// `0` is never a valid tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Initial handshake: name, colors, screen size.
    Init = 1,
    /// A peer joined, with entry side, offset, spawn fraction and colors.
    New = 2,
    /// A peer left.
    Del = 3,
    /// A peer renamed.
    Name = 4,
    /// A peer changed its particle colors.
    ParticleParams = 5,
    /// Screen geometry changed.
    Screen = 6,
    /// Relative position delta.
    Move = 7,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Init),
            2 => Ok(MessageType::New),
            3 => Ok(MessageType::Del),
            4 => Ok(MessageType::Name),
            5 => Ok(MessageType::ParticleParams),
            6 => Ok(MessageType::Screen),
            7 => Ok(MessageType::Move),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// Errors raised by the codec and the typed field accessors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty packet payload")]
    Empty,
    #[error("message type tag {0:?} is not an integer")]
    BadTypeTag(String),
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("field index {index} out of range ({len} fields)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("field {index} ({value:?}) failed to parse")]
    FieldParse { index: usize, value: String },
    #[error("field contains the reserved separator byte")]
    SeparatorInField,
    #[error("encoded packet would be {len} bytes, over the buffer bound")]
    Oversized { len: usize },
}

/// The protocol message envelope: type tag plus ordered field list.
///
/// Fields are loosely typed strings appended in order and extracted by
/// positional index. Validation happens at construction time: a field may
/// not contain the separator byte, and the encoded packet may not outgrow
/// [`PACKET_SIZE`]. A `Packet` built through [`Packet::push`] therefore
/// always encodes successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    kind: MessageType,
    fields: Vec<String>,
}

impl Packet {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            fields: Vec::new(),
        }
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// Number of application fields (type tag excluded).
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Index of the trailing field, used by the stamped-id convention.
    pub fn last(&self) -> usize {
        self.fields.len().saturating_sub(1)
    }

    fn encoded_len(&self) -> usize {
        1 + self.fields.iter().map(|f| 1 + f.len()).sum::<usize>()
    }

    /// Appends one string-converted field.
    ///
    /// Rejects payloads containing the separator byte and growth past the
    /// packet size bound, so invalid packets cannot be constructed.
    pub fn push(&mut self, value: impl Display) -> Result<(), ProtocolError> {
        let field = value.to_string();

        if field.as_bytes().contains(&SEPARATOR) {
            return Err(ProtocolError::SeparatorInField);
        }

        let len = self.encoded_len() + 1 + field.len();
        if len > PACKET_SIZE {
            return Err(ProtocolError::Oversized { len });
        }

        self.fields.push(field);
        Ok(())
    }

    /// Builder-style [`Packet::push`].
    pub fn with(mut self, value: impl Display) -> Result<Self, ProtocolError> {
        self.push(value)?;
        Ok(self)
    }

    /// Parses the field at `index` into the requested type.
    ///
    /// Out-of-range access and parse failures are hard errors, never a
    /// silently substituted default.
    pub fn field<T: FromStr>(&self, index: usize) -> Result<T, ProtocolError> {
        let raw = self
            .fields
            .get(index)
            .ok_or(ProtocolError::IndexOutOfRange {
                index,
                len: self.fields.len(),
            })?;

        raw.parse().map_err(|_| ProtocolError::FieldParse {
            index,
            value: raw.clone(),
        })
    }

    /// Encodes into the flat wire form: one ASCII digit for the tag, then
    /// separator + content per field.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());

        out.push(b'0' + self.kind.tag());
        for field in &self.fields {
            out.push(SEPARATOR);
            out.extend_from_slice(field.as_bytes());
        }

        out
    }

    /// Decodes the raw bytes of a single transport receive.
    ///
    /// Splits on the separator byte; the first token becomes the message
    /// type and is stripped, so a decoded packet's field 0 is the first
    /// application field. Arbitrary bytes are tolerated inside fields
    /// (converted lossily to UTF-8). Type-specific validation is deferred
    /// to the dispatch layer's typed accessors.
    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let mut tokens = raw.split(|&b| b == SEPARATOR);

        let tag_token = tokens.next().ok_or(ProtocolError::Empty)?;
        let tag_str = String::from_utf8_lossy(tag_token);
        let tag: u8 = tag_str
            .parse()
            .map_err(|_| ProtocolError::BadTypeTag(tag_str.into_owned()))?;
        let kind = MessageType::try_from(tag)?;

        let fields = tokens
            .map(|t| String::from_utf8_lossy(t).into_owned())
            .collect();

        Ok(Self { kind, fields })
    }
}
