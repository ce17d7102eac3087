//! Strongly-typed view of the wire protocol
//!
//! [`Message`] is the tagged-union form of a decoded [`Packet`]: one variant
//! per message kind, with named typed fields, matched exhaustively by the
//! client dispatch layer. The positional wire layout lives entirely in
//! `from_packet`/`to_packet`, so the rest of the codebase never touches raw
//! field indices.
//!
//! Two field conventions exist on the wire. `Init`, `New` and `Del` carry
//! the subject id (if any) in the leading field. `Name`, `ParticleParams`
//! and `Move` carry the originating peer's id in the *trailing* field,
//! stamped by the server before relaying.

use crate::packet::{MessageType, Packet, ProtocolError};

/// Screen edge a player crosses when entering, which decides the sign
/// convention of the horizontal spawn offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntrySide {
    Left = 0,
    Right = 1,
}

impl TryFrom<u8> for EntrySide {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EntrySide::Left),
            1 => Ok(EntrySide::Right),
            _ => Err(()),
        }
    }
}

/// One protocol message with strongly-typed named fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Handshake reply: adopt local identity and screen geometry.
    Init {
        name: String,
        color_begin: u32,
        color_end: u32,
        width: u32,
        height: u32,
    },
    /// A peer joined. Spawn position is derived from the entry side, the
    /// horizontal offset and the vertical fraction of the window height.
    New {
        id: u32,
        side: EntrySide,
        offset: f32,
        spawn_y: f32,
        name: String,
        color_begin: u32,
        color_end: u32,
    },
    /// A peer left.
    Del { id: u32 },
    /// A peer renamed. Trailing-id convention.
    Name { name: String, id: u32 },
    /// A peer changed colors. Trailing-id convention.
    ParticleParams {
        color_begin: u32,
        color_end: u32,
        id: u32,
    },
    /// Screen geometry changed.
    Screen { width: u32, height: u32 },
    /// Relative position delta, added to the target's current position.
    /// Trailing-id convention.
    Move { dx: f32, dy: f32, id: u32 },
}

impl Message {
    /// Interprets a decoded packet's positional fields.
    ///
    /// Any missing or unparsable field is a hard [`ProtocolError`].
    pub fn from_packet(packet: &Packet) -> Result<Self, ProtocolError> {
        match packet.kind() {
            MessageType::Init => Ok(Message::Init {
                name: packet.field(0)?,
                color_begin: packet.field(1)?,
                color_end: packet.field(2)?,
                width: packet.field(3)?,
                height: packet.field(4)?,
            }),
            MessageType::New => {
                let side_raw: u8 = packet.field(1)?;
                let side =
                    EntrySide::try_from(side_raw).map_err(|_| ProtocolError::FieldParse {
                        index: 1,
                        value: side_raw.to_string(),
                    })?;

                Ok(Message::New {
                    id: packet.field(0)?,
                    side,
                    offset: packet.field(2)?,
                    spawn_y: packet.field(3)?,
                    name: packet.field(4)?,
                    color_begin: packet.field(5)?,
                    color_end: packet.field(6)?,
                })
            }
            MessageType::Del => Ok(Message::Del {
                id: packet.field(0)?,
            }),
            MessageType::Name => Ok(Message::Name {
                name: packet.field(0)?,
                id: packet.field(packet.last())?,
            }),
            MessageType::ParticleParams => Ok(Message::ParticleParams {
                color_begin: packet.field(0)?,
                color_end: packet.field(1)?,
                id: packet.field(packet.last())?,
            }),
            MessageType::Screen => Ok(Message::Screen {
                width: packet.field(0)?,
                height: packet.field(1)?,
            }),
            MessageType::Move => Ok(Message::Move {
                dx: packet.field(0)?,
                dy: packet.field(1)?,
                id: packet.field(packet.last())?,
            }),
        }
    }

    /// Serializes back into the positional wire layout.
    ///
    /// Fails if a string field would violate the codec's construction
    /// rules (embedded separator, size bound).
    pub fn to_packet(&self) -> Result<Packet, ProtocolError> {
        match self {
            Message::Init {
                name,
                color_begin,
                color_end,
                width,
                height,
            } => Packet::new(MessageType::Init)
                .with(name)?
                .with(color_begin)?
                .with(color_end)?
                .with(width)?
                .with(height),
            Message::New {
                id,
                side,
                offset,
                spawn_y,
                name,
                color_begin,
                color_end,
            } => Packet::new(MessageType::New)
                .with(id)?
                .with(*side as u8)?
                .with(offset)?
                .with(spawn_y)?
                .with(name)?
                .with(color_begin)?
                .with(color_end),
            Message::Del { id } => Packet::new(MessageType::Del).with(id),
            Message::Name { name, id } => {
                Packet::new(MessageType::Name).with(name)?.with(id)
            }
            Message::ParticleParams {
                color_begin,
                color_end,
                id,
            } => Packet::new(MessageType::ParticleParams)
                .with(color_begin)?
                .with(color_end)?
                .with(id),
            Message::Screen { width, height } => {
                Packet::new(MessageType::Screen).with(width)?.with(height)
            }
            Message::Move { dx, dy, id } => Packet::new(MessageType::Move)
                .with(dx)?
                .with(dy)?
                .with(id),
        }
    }
}
