//! Relay handler: the game-facing server behavior
//!
//! The transport loop is policy-free; this handler implements the actual
//! synchronization protocol on top of it. The server never simulates the
//! game: it records each client's replicated display state, answers the
//! handshake, and relays updates to everyone else with the sender's id
//! stamped as a trailing field (clients send updates about themselves
//! without an id; the server is the authority on who said what).

use crate::client_manager::{Client, ClientManager};
use crate::network::{Handler, Outbox};
use log::{debug, warn};
use shared::{EntrySide, Message, MessageType, Packet};

/// Spawn placement announced for a peer that joined by connecting rather
/// than by crossing a screen edge: centered vertically at the left edge.
const JOIN_SIDE: EntrySide = EntrySide::Left;
const JOIN_OFFSET: f32 = 0.0;
const JOIN_SPAWN_Y: f32 = 0.5;

#[derive(Debug, Default)]
pub struct RelayHandler;

impl RelayHandler {
    pub fn new() -> Self {
        Self
    }

    /// `New` announcement describing `client` to other peers.
    fn announcement(client: &Client) -> Message {
        Message::New {
            id: client.id,
            side: JOIN_SIDE,
            offset: JOIN_OFFSET,
            spawn_y: JOIN_SPAWN_Y,
            name: client.params.name.clone(),
            color_begin: client.params.color_begin,
            color_end: client.params.color_end,
        }
    }

    /// Handshake: adopt the client's announced state, echo it back as the
    /// authoritative identity, then introduce everyone to everyone.
    fn handle_init(&mut self, packet: &Packet, id: u32, clients: &mut ClientManager, out: &mut Outbox) {
        let message = match Message::from_packet(packet) {
            Ok(m) => m,
            Err(e) => {
                warn!("Client {} sent a bad INIT: {}", id, e);
                return;
            }
        };

        let Message::Init {
            name,
            color_begin,
            color_end,
            width,
            height,
        } = message
        else {
            return;
        };

        if let Some(client) = clients.get_mut(id) {
            client.params.name = name;
            client.params.color_begin = color_begin;
            client.params.color_end = color_end;
            client.screen_width = width;
            client.screen_height = height;
        }

        let Some(client) = clients.get(id) else { return };

        debug!("Client {} is now \"{}\"", id, client.params.name);

        // authoritative echo back to the newcomer
        let echo = Message::Init {
            name: client.params.name.clone(),
            color_begin: client.params.color_begin,
            color_end: client.params.color_end,
            width: client.screen_width,
            height: client.screen_height,
        };
        if let Ok(p) = echo.to_packet() {
            out.send(id, p);
        }

        // announce the newcomer to the others
        if let Ok(p) = Self::announcement(client).to_packet() {
            out.broadcast_except(id, p);
        }

        // replay every existing peer to the newcomer
        for other in clients.iter().filter(|c| c.id != id) {
            if let Ok(p) = Self::announcement(other).to_packet() {
                out.send(id, p);
            }
        }
    }

    /// Stamps the sender's id onto the raw packet and relays it to the
    /// other peers, keeping the wire layout the clients expect.
    fn stamp_and_relay(&mut self, packet: Packet, id: u32, out: &mut Outbox) {
        let mut stamped = packet;
        if let Err(e) = stamped.push(id) {
            warn!("Cannot stamp packet from client {}: {}", id, e);
            return;
        }
        out.broadcast_except(id, stamped);
    }
}

impl Handler for RelayHandler {
    fn on_connect(&mut self, id: u32, _clients: &mut ClientManager, _out: &mut Outbox) {
        // nothing to announce until the client introduces itself with INIT
        debug!("Client {} awaiting handshake", id);
    }

    fn on_packet(&mut self, packet: Packet, id: u32, clients: &mut ClientManager, out: &mut Outbox) {
        match packet.kind() {
            MessageType::Init => self.handle_init(&packet, id, clients, out),

            MessageType::Name => {
                if let Ok(name) = packet.field::<String>(0) {
                    if let Some(client) = clients.get_mut(id) {
                        client.params.name = name;
                    }
                }
                self.stamp_and_relay(packet, id, out);
            }

            MessageType::ParticleParams => {
                if let (Ok(begin), Ok(end)) = (packet.field(0), packet.field(1)) {
                    if let Some(client) = clients.get_mut(id) {
                        client.params.color_begin = begin;
                        client.params.color_end = end;
                    }
                }
                self.stamp_and_relay(packet, id, out);
            }

            MessageType::Move => self.stamp_and_relay(packet, id, out),

            MessageType::Screen => {
                if let (Ok(width), Ok(height)) = (packet.field(0), packet.field(1)) {
                    if let Some(client) = clients.get_mut(id) {
                        client.screen_width = width;
                        client.screen_height = height;
                    }
                    // echo the adopted geometry back as authoritative
                    if let Ok(p) = (Message::Screen { width, height }).to_packet() {
                        out.send(id, p);
                    }
                }
            }

            MessageType::New | MessageType::Del => {
                // server-to-client kinds; a client has no business sending them
                warn!("Client {} sent unexpected {:?}", id, packet.kind());
            }
        }
    }

    fn on_disconnect(&mut self, client: &Client, _clients: &mut ClientManager, out: &mut Outbox) {
        if let Ok(p) = (Message::Del { id: client.id }).to_packet() {
            out.broadcast(p);
        }
    }
}
