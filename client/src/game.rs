//! Replicated game scene state and protocol dispatch
//!
//! The scene owns the local copies of every player and the tracked screen
//! geometry. Once per simulation tick it drains the connection's event
//! queue and dispatches each decoded message, exhaustively, to mutate the
//! replicated state. The renderer (out of scope here) reads this state.

use crate::connection::{Connection, Event};
use log::{info, warn};
use shared::{ClientParams, EntrySide, Message, Packet, ProtocolError, MYSELF};
use std::collections::HashMap;

/// One replicated player: a named, colored particle emitter position.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: u32,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub color_begin: u32,
    pub color_end: u32,
}

impl Player {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            x: 0.0,
            y: 0.0,
            color_begin: 0,
            color_end: 0,
        }
    }
}

/// The scene's replicated world.
///
/// The local player is pre-created under the [`MYSELF`] sentinel id; a
/// `New` message carrying that id rebinds it.
#[derive(Debug)]
pub struct GameScene {
    players: HashMap<u32, Player>,
    screen_width: u32,
    screen_height: u32,
}

impl GameScene {
    pub fn new(name: &str, screen_width: u32, screen_height: u32) -> Self {
        let mut players = HashMap::new();
        players.insert(MYSELF, Player::new(MYSELF, name));

        Self {
            players,
            screen_width,
            screen_height,
        }
    }

    pub fn player(&self, id: u32) -> Option<&Player> {
        self.players.get(&id)
    }

    /// The local player. Always present.
    pub fn me(&self) -> &Player {
        &self.players[&MYSELF]
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn screen(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    /// Local identity in the form the handshake packet wants.
    pub fn local_params(&self) -> ClientParams {
        let me = self.me();
        ClientParams {
            name: me.name.clone(),
            color_begin: me.color_begin,
            color_end: me.color_end,
        }
    }

    /// Drains the connection's event queue, once per tick.
    pub fn drain_events(&mut self, conn: &mut Connection) {
        while let Some(event) = conn.poll_event() {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connect => {
                info!("Connected to the server");
            }
            Event::Packet(packet) => match Message::from_packet(&packet) {
                Ok(message) => self.apply(message),
                Err(e) => warn!("Dropping undecodable {:?} packet: {}", packet.kind(), e),
            },
            Event::Disconnect => {
                info!("Lost connection to the server");
            }
        }
    }

    /// Applies one decoded message to the replicated state.
    ///
    /// Updates addressed to an unknown player are dropped silently: a
    /// stale update can legitimately race a `Del` that already removed
    /// its target.
    pub fn apply(&mut self, message: Message) {
        match message {
            Message::Init {
                name,
                color_begin,
                color_end,
                width,
                height,
            } => {
                let me = self.players.entry(MYSELF).or_insert_with(|| Player::new(MYSELF, ""));
                me.name = name;
                me.color_begin = color_begin;
                me.color_end = color_end;
                self.screen_width = width;
                self.screen_height = height;
            }

            Message::New {
                id,
                side,
                offset,
                spawn_y,
                name,
                color_begin,
                color_end,
            } => {
                let mut player = Player::new(id, &name);

                // entry side decides the sign convention of the offset
                player.x = match side {
                    EntrySide::Left => self.screen_width as f32 + offset,
                    EntrySide::Right => 0.0 - offset,
                };
                player.y = spawn_y * self.screen_height as f32;
                player.color_begin = color_begin;
                player.color_end = color_end;

                // id 0 rebinds the local player
                self.players.insert(id, player);
            }

            Message::Del { id } => {
                // the local player's lifecycle is owned locally; the server
                // never assigns the sentinel id to a remote peer
                if id == MYSELF {
                    warn!("Ignoring Del for the local player");
                    return;
                }
                self.players.remove(&id);
            }

            Message::Name { name, id } => {
                if let Some(player) = self.players.get_mut(&id) {
                    player.name = name;
                }
            }

            Message::ParticleParams {
                color_begin,
                color_end,
                id,
            } => {
                if let Some(player) = self.players.get_mut(&id) {
                    player.color_begin = color_begin;
                    player.color_end = color_end;
                }
            }

            Message::Screen { width, height } => {
                self.screen_width = width;
                self.screen_height = height;
            }

            // relative delta, unlike the absolute placement of New
            Message::Move { dx, dy, id } => {
                if let Some(player) = self.players.get_mut(&id) {
                    player.x += dx;
                    player.y += dy;
                }
            }
        }
    }

    /// Picks a fresh random color pair for the local player and returns
    /// the packet announcing it.
    pub fn randomize_colors(&mut self) -> Result<Packet, ProtocolError> {
        let color_begin = random_color();
        let color_end = random_color();

        if let Some(me) = self.players.get_mut(&MYSELF) {
            me.color_begin = color_begin;
            me.color_end = color_end;
        }

        shared::creator::particle_params(color_begin, color_end)
    }
}

/// Random opaque RGBA color.
fn random_color() -> u32 {
    let r = rand::random::<u8>() as u32;
    let g = rand::random::<u8>() as u32;
    let b = rand::random::<u8>() as u32;
    (r << 24) | (g << 16) | (b << 8) | 0xFF
}
