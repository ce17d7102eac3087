//! # Game Client Library
//!
//! Client side of the text-protocol multiplayer particle game. The
//! library covers the two concerns a frontend needs: a socket wrapper
//! that turns the wire into a pollable event queue, and the replicated
//! scene state those events mutate.
//!
//! ## Architecture
//!
//! ### Connection thread
//! [`connection::Connection`] confines the socket to its own thread and
//! forwards everything it decodes as [`connection::Event`]s over a
//! channel. The owner drains the queue once per tick with
//! [`connection::Connection::poll_event`]; the queue never blocks and
//! never invokes user code from the socket thread.
//!
//! ### Replicated scene
//! [`game::GameScene`] holds the local copy of every player and the
//! tracked screen geometry. It dispatches decoded messages exhaustively,
//! pre-creates the local player under the self sentinel id and rebinds
//! it when the server's spawn message arrives.
//!
//! ## Module Organization
//!
//! - [`connection`]: thread-confined socket, event queue, outbound
//!   packet channel.
//! - [`game`]: player roster, protocol dispatch, spawn placement math.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::connection::Connection;
//! use client::game::GameScene;
//! use shared::creator;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = Connection::new();
//!     conn.start("127.0.0.1", 9000)?;
//!
//!     let mut scene = GameScene::new("player", 800, 600);
//!     conn.send(creator::init(&scene.local_params(), 800, 600)?)?;
//!
//!     while conn.is_connected() {
//!         scene.drain_events(&mut conn);
//!         // ... simulate and render ...
//!     }
//!
//!     conn.stop();
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod game;
