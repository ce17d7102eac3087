//! Client connection management for the relay server
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Socket ownership and per-client lifecycle (accept through disconnect)
//! - Identity assignment (unique, monotonic, never the self-sentinel)
//! - Application state attached to each connection (name, colors, screen)
//! - Removal while the multiplex loop is iterating over the roster
//!
//! All access happens on the server's loop thread; the manager needs no
//! internal locking.

use log::info;
use shared::ClientParams;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// A connected remote peer.
///
/// The server owns the socket for the peer's whole lifetime. `params` and
/// the screen geometry are opaque to the transport loop; only the relay
/// handler reads or writes them.
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the manager at accept time
    pub id: u32,
    /// The live connection
    pub stream: TcpStream,
    /// Remote address, for logging
    pub addr: SocketAddr,
    /// Replicated display state (name, particle colors)
    pub params: ClientParams,
    /// Last reported screen width
    pub screen_width: u32,
    /// Last reported screen height
    pub screen_height: u32,
}

impl Client {
    pub fn new(id: u32, stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            id,
            stream,
            addr,
            params: ClientParams::default(),
            screen_width: 0,
            screen_height: 0,
        }
    }
}

/// Roster of live clients, keyed by identity.
///
/// Ids start at 1 because `0` is reserved as the self-sentinel on the
/// client side, and are never reused within a process lifetime. The
/// counter belongs to the manager instance, so independent servers do not
/// share an identity sequence.
#[derive(Debug, Default)]
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_id: u32,
}

impl ClientManager {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers a freshly accepted connection and assigns its id.
    pub fn add(&mut self, stream: TcpStream, addr: SocketAddr) -> u32 {
        let id = self.next_id;
        self.next_id += 1;

        info!("Client {} connected from {}", id, addr);
        self.clients.insert(id, Client::new(id, stream, addr));

        id
    }

    /// Removes a client, returning it so the caller can finish cleanup.
    pub fn remove(&mut self, id: u32) -> Option<Client> {
        let removed = self.clients.remove(&id);
        if let Some(client) = &removed {
            info!("Client {} removed ({})", client.id, client.addr);
        }
        removed
    }

    pub fn get(&self, id: u32) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    /// Snapshot of the live ids.
    ///
    /// The multiplex loop iterates this snapshot so that clients can be
    /// removed mid-iteration without invalidating the traversal.
    pub fn ids(&self) -> Vec<u32> {
        self.clients.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Drops every client. Sockets close as they are freed.
    pub fn clear(&mut self) {
        self.clients.clear();
    }
}
