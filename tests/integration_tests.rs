//! Integration tests for the relay server and client connection
//!
//! These tests run the real server loop and real client connections over
//! loopback sockets and verify the protocol end to end.

use client::connection::{Connection, Event};
use client::game::GameScene;
use server::network::Server;
use server::relay::RelayHandler;
use shared::{creator, ClientParams, Message, MYSELF};
use std::time::{Duration, Instant};

fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = poll() {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for event");
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Waits for the next decoded protocol message, skipping transport events.
fn next_message(conn: &mut Connection) -> Message {
    wait_for(|| match conn.poll_event() {
        Some(Event::Packet(packet)) => {
            Some(Message::from_packet(&packet).expect("undecodable relay packet"))
        }
        Some(_) => None,
        None => None,
    })
}

fn start_server() -> (Server<RelayHandler>, u16) {
    let mut server = Server::new(RelayHandler::new());
    server.start(0).expect("server failed to start");
    let port = server.local_addr().expect("no bound address").port();
    (server, port)
}

fn join(port: u16, params: &ClientParams) -> Connection {
    let mut conn = Connection::new();
    conn.start("127.0.0.1", port).expect("connect failed");
    assert_eq!(wait_for(|| conn.poll_event()), Event::Connect);
    conn.send(creator::init(params, 800, 600).unwrap())
        .expect("init send failed");
    conn
}

fn params(name: &str) -> ClientParams {
    ClientParams {
        name: name.to_string(),
        color_begin: 0xFF0000FF,
        color_end: 0x0000FFFF,
    }
}

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    /// The first joiner gets the authoritative echo of its own identity
    /// and nothing else.
    #[test]
    fn init_is_echoed_back_authoritatively() {
        let (mut server, port) = start_server();
        let mut alice = join(port, &params("Alice"));

        match next_message(&mut alice) {
            Message::Init {
                name,
                color_begin,
                color_end,
                width,
                height,
            } => {
                assert_eq!(name, "Alice");
                assert_eq!(color_begin, 0xFF0000FF);
                assert_eq!(color_end, 0x0000FFFF);
                assert_eq!((width, height), (800, 600));
            }
            other => panic!("expected Init echo, got {:?}", other),
        }

        assert!(alice.poll_event().is_none());

        alice.stop();
        server.stop().unwrap();
    }

    /// A second joiner is announced to the first, and has the first
    /// replayed back to it, under distinct server-assigned ids.
    #[test]
    fn join_is_announced_and_existing_peers_are_replayed() {
        let (mut server, port) = start_server();

        let mut alice = join(port, &params("Alice"));
        assert!(matches!(next_message(&mut alice), Message::Init { .. }));

        let mut bob = join(port, &params("Bob"));
        assert!(matches!(next_message(&mut bob), Message::Init { .. }));

        let bob_id = match next_message(&mut alice) {
            Message::New { id, name, .. } => {
                assert_eq!(name, "Bob");
                id
            }
            other => panic!("expected New announcement, got {:?}", other),
        };

        let alice_id = match next_message(&mut bob) {
            Message::New {
                id,
                name,
                color_begin,
                ..
            } => {
                assert_eq!(name, "Alice");
                assert_eq!(color_begin, 0xFF0000FF);
                id
            }
            other => panic!("expected New replay, got {:?}", other),
        };

        assert_ne!(alice_id, bob_id);
        assert_ne!(alice_id, MYSELF);
        assert_ne!(bob_id, MYSELF);

        alice.stop();
        bob.stop();
        server.stop().unwrap();
    }
}

/// RELAY TESTS
mod relay_tests {
    use super::*;

    /// A move from one client reaches the other with the sender's id
    /// stamped on, and never echoes back to the sender.
    #[test]
    fn moves_are_relayed_with_the_sender_id_stamped() {
        let (mut server, port) = start_server();

        let mut alice = join(port, &params("Alice"));
        assert!(matches!(next_message(&mut alice), Message::Init { .. }));
        let mut bob = join(port, &params("Bob"));
        assert!(matches!(next_message(&mut bob), Message::Init { .. }));
        assert!(matches!(next_message(&mut alice), Message::New { .. }));
        let alice_id = match next_message(&mut bob) {
            Message::New { id, .. } => id,
            other => panic!("expected New replay, got {:?}", other),
        };

        alice.send(creator::mov(3.5, -1.25).unwrap()).unwrap();

        match next_message(&mut bob) {
            Message::Move { dx, dy, id } => {
                assert_eq!(dx, 3.5);
                assert_eq!(dy, -1.25);
                assert_eq!(id, alice_id);
            }
            other => panic!("expected relayed Move, got {:?}", other),
        }

        // the sender must not hear its own move back
        std::thread::sleep(Duration::from_millis(100));
        assert!(alice.poll_event().is_none());

        alice.stop();
        bob.stop();
        server.stop().unwrap();
    }

    /// Name and particle-parameter updates travel the same stamped path.
    #[test]
    fn identity_updates_are_relayed() {
        let (mut server, port) = start_server();

        let mut alice = join(port, &params("Alice"));
        assert!(matches!(next_message(&mut alice), Message::Init { .. }));
        let mut bob = join(port, &params("Bob"));
        assert!(matches!(next_message(&mut bob), Message::Init { .. }));
        assert!(matches!(next_message(&mut alice), Message::New { .. }));
        let alice_id = match next_message(&mut bob) {
            Message::New { id, .. } => id,
            other => panic!("expected New replay, got {:?}", other),
        };

        alice.send(creator::name("Alicia").unwrap()).unwrap();
        match next_message(&mut bob) {
            Message::Name { name, id } => {
                assert_eq!(name, "Alicia");
                assert_eq!(id, alice_id);
            }
            other => panic!("expected relayed Name, got {:?}", other),
        }

        alice
            .send(creator::particle_params(0x11111111, 0x22222222).unwrap())
            .unwrap();
        match next_message(&mut bob) {
            Message::ParticleParams {
                color_begin,
                color_end,
                id,
            } => {
                assert_eq!(color_begin, 0x11111111);
                assert_eq!(color_end, 0x22222222);
                assert_eq!(id, alice_id);
            }
            other => panic!("expected relayed ParticleParams, got {:?}", other),
        }

        alice.stop();
        bob.stop();
        server.stop().unwrap();
    }

    /// The full client stack: a scene driven purely by drained events
    /// ends up with the peer placed by the spawn math.
    #[test]
    fn scene_replicates_a_peer_end_to_end() {
        let (mut server, port) = start_server();

        let mut alice = join(port, &params("Alice"));
        let mut scene = GameScene::new("Alice", 800, 600);

        let mut bob = join(port, &params("Bob"));
        assert!(matches!(next_message(&mut bob), Message::Init { .. }));

        wait_for(|| {
            scene.drain_events(&mut alice);
            (scene.player_count() == 2).then_some(())
        });

        let peer = scene
            .players()
            .find(|p| p.id != MYSELF)
            .expect("replicated peer");
        assert_eq!(peer.name, "Bob");

        alice.stop();
        bob.stop();
        server.stop().unwrap();
    }
}

/// LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// A departing client is broadcast as a Del to everyone remaining.
    #[test]
    fn disconnect_broadcasts_del() {
        let (mut server, port) = start_server();

        let mut alice = join(port, &params("Alice"));
        assert!(matches!(next_message(&mut alice), Message::Init { .. }));
        let mut bob = join(port, &params("Bob"));
        assert!(matches!(next_message(&mut bob), Message::Init { .. }));
        let bob_id = match next_message(&mut alice) {
            Message::New { id, .. } => id,
            other => panic!("expected New announcement, got {:?}", other),
        };
        assert!(matches!(next_message(&mut bob), Message::New { .. }));

        bob.stop();

        match next_message(&mut alice) {
            Message::Del { id } => assert_eq!(id, bob_id),
            other => panic!("expected Del broadcast, got {:?}", other),
        }

        alice.stop();
        server.stop().unwrap();
    }

    /// Stopping the server disconnects every client.
    #[test]
    fn server_stop_disconnects_clients() {
        let (mut server, port) = start_server();

        let mut alice = join(port, &params("Alice"));
        assert!(matches!(next_message(&mut alice), Message::Init { .. }));

        server.stop().unwrap();

        wait_for(|| match alice.poll_event() {
            Some(Event::Disconnect) => Some(()),
            _ => None,
        });
        wait_for(|| (!alice.is_connected()).then_some(()));

        alice.stop();
    }

    /// A malformed inbound packet is dropped without dropping the client.
    #[test]
    fn malformed_packet_keeps_the_session_alive() {
        use std::io::Write as _;

        let (mut server, port) = start_server();

        let mut alice = join(port, &params("Alice"));
        assert!(matches!(next_message(&mut alice), Message::Init { .. }));

        // garbage first, then a well-formed handshake on the same socket
        let mut raw = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        raw.write_all(b"\x00not-a-packet").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        raw.write_all(&creator::init(&params("Mallory"), 800, 600).unwrap().encode())
            .unwrap();

        // the announcement proves the garbage did not cost the session
        match next_message(&mut alice) {
            Message::New { name, .. } => assert_eq!(name, "Mallory"),
            other => panic!("expected New announcement, got {:?}", other),
        }

        alice.stop();
        server.stop().unwrap();
    }
}
