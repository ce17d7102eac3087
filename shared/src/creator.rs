//! Client-side packet construction
//!
//! Outbound packets built by a client omit the originating peer id: the
//! server stamps the sender's id as a trailing field before relaying, which
//! is where the trailing-id convention of [`crate::Message`] comes from.

use crate::packet::{MessageType, Packet, ProtocolError};
use crate::ClientParams;

/// Handshake: announce name, particle colors and screen size.
pub fn init(params: &ClientParams, width: u32, height: u32) -> Result<Packet, ProtocolError> {
    Packet::new(MessageType::Init)
        .with(&params.name)?
        .with(params.color_begin)?
        .with(params.color_end)?
        .with(width)?
        .with(height)
}

/// Relative movement of the local player's emitter.
pub fn mov(dx: f32, dy: f32) -> Result<Packet, ProtocolError> {
    Packet::new(MessageType::Move).with(dx)?.with(dy)
}

/// Rename the local player.
pub fn name(name: &str) -> Result<Packet, ProtocolError> {
    Packet::new(MessageType::Name).with(name)
}

/// New particle color pair for the local player.
pub fn particle_params(color_begin: u32, color_end: u32) -> Result<Packet, ProtocolError> {
    Packet::new(MessageType::ParticleParams)
        .with(color_begin)?
        .with(color_end)
}

/// Report the local screen geometry.
pub fn screen(width: u32, height: u32) -> Result<Packet, ProtocolError> {
    Packet::new(MessageType::Screen).with(width)?.with(height)
}
