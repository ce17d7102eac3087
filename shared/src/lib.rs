pub mod creator;
pub mod message;
pub mod packet;

pub use message::{EntrySide, Message};
pub use packet::{MessageType, Packet, ProtocolError};

/// One encoded packet must fit one transport receive buffer.
pub const PACKET_SIZE: usize = 1024;

/// Reserved field separator. Control-range byte that never appears inside a
/// valid field payload; the codec rejects fields containing it.
pub const SEPARATOR: u8 = 0x7F;

/// Sentinel peer id meaning "the local client's own player". The server never
/// assigns it to a remote peer.
pub const MYSELF: u32 = 0;

/// Per-peer display state replicated across clients.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientParams {
    pub name: String,
    pub color_begin: u32,
    pub color_end: u32,
}
