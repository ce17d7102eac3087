//! # Relay Server Library
//!
//! Server side of the text-protocol multiplayer particle game: a
//! single-threaded multiplexed TCP loop that accepts clients, decodes
//! inbound packets and hands them to a pluggable [`network::Handler`],
//! plus the [`relay::RelayHandler`] that implements the actual
//! synchronization protocol.
//!
//! ## Architecture
//!
//! ### Thread-confined multiplex loop
//! The loop thread owns the listener, every client socket and the client
//! roster. No locks exist anywhere in the server; the only cross-thread
//! interaction is the stop signal. Handlers run inline on the loop
//! thread, so a blocking handler stalls all I/O; handlers must hand off
//! long work themselves.
//!
//! ### Failure policy
//! A failed receive on one socket drops that client and nothing else; a
//! malformed packet drops the message and keeps the client. Only the
//! stop signal (or a fatal runtime/listener setup error) ends the loop,
//! which then disconnects every client and clears the roster.
//!
//! ## Module Organization
//!
//! - [`client_manager`]: socket ownership, id assignment, iteration-safe
//!   removal.
//! - [`network`]: the accept/receive loop, the [`network::Handler`]
//!   event-sink trait and the [`network::Outbox`] send queue.
//! - [`relay`]: handshake echo, join announcements, stamped relays and
//!   exit broadcasts.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::relay::RelayHandler;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(RelayHandler::new());
//!
//!     // Binds the port and launches the loop on its own thread.
//!     server.start(9000)?;
//!     assert!(server.is_running());
//!
//!     // ... run until told to quit ...
//!
//!     // Disconnects every client and joins the loop thread.
//!     server.stop()?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod network;
pub mod relay;
