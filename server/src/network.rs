//! Server network layer: the multiplexed accept/receive loop
//!
//! The server owns a listening socket plus every connected client socket
//! and services all of them from one dedicated thread running a
//! current-thread tokio runtime. Thread safety comes from confinement:
//! all socket I/O and all roster mutation happen on the loop thread, so
//! there are no locks. The only cross-thread interaction is the stop
//! signal, delivered through a [`Notify`] checked at the top of every
//! iteration.
//!
//! Within one wake-up the listener is always examined before client
//! sockets (the select is biased), so at most one connection is accepted
//! per iteration and a freshly accepted socket is never read in the same
//! iteration that registered it.

use crate::client_manager::{Client, ClientManager};
use futures_util::future::select_all;
use log::{debug, error, info, warn};
use shared::{Packet, PACKET_SIZE};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// Server lifecycle and transport failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,
    #[error("server is not running")]
    NotRunning,
    #[error("failed to bind listener: {0}")]
    Bind(io::Error),
    #[error("failed to spawn server thread: {0}")]
    Spawn(io::Error),
    #[error("server loop panicked")]
    LoopPanicked,
}

/// Event sink driven by the loop thread.
///
/// Replaces the stored-closure callbacks of a classic socket server with
/// an explicit interface: the loop calls these inline, so implementations
/// must not block. Outbound traffic goes through the [`Outbox`], which the
/// loop flushes after each call; handlers never write to sockets directly.
pub trait Handler: Send + 'static {
    /// A connection was accepted and registered as `id`.
    fn on_connect(&mut self, _id: u32, _clients: &mut ClientManager, _out: &mut Outbox) {}

    /// One decoded packet arrived from `id`.
    fn on_packet(&mut self, packet: Packet, id: u32, clients: &mut ClientManager, out: &mut Outbox);

    /// The client was removed: its receive failed or a queued send to it
    /// could not be delivered. It is already out of the roster.
    fn on_disconnect(&mut self, _client: &Client, _clients: &mut ClientManager, _out: &mut Outbox) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    One(u32),
    AllExcept(u32),
    All,
}

/// Queued outbound packets, flushed by the loop after every handler call.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<(Target, Packet)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a packet for one client.
    pub fn send(&mut self, id: u32, packet: Packet) {
        self.queue.push((Target::One(id), packet));
    }

    /// Queues a packet for every client.
    pub fn broadcast(&mut self, packet: Packet) {
        self.queue.push((Target::All, packet));
    }

    /// Queues a packet for every client except `id`, typically the sender.
    pub fn broadcast_except(&mut self, id: u32, packet: Packet) {
        self.queue.push((Target::AllExcept(id), packet));
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn drain(&mut self) -> Vec<(Target, Packet)> {
        std::mem::take(&mut self.queue)
    }
}

/// The multiplexed relay server.
///
/// `start` launches the loop on its own thread and returns immediately;
/// `stop` signals it and joins. The handler moves into the loop thread for
/// the lifetime of a session and is reclaimed on `stop`, which is what
/// makes a later restart possible.
pub struct Server<H: Handler> {
    handler: Option<H>,
    thread: Option<thread::JoinHandle<H>>,
    shutdown: Option<Arc<Notify>>,
    local_addr: Option<SocketAddr>,
}

impl<H: Handler> Server<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Some(handler),
            thread: None,
            shutdown: None,
            local_addr: None,
        }
    }

    /// True from the moment the loop thread is launched until it exits,
    /// including the window before its first iteration.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// The address actually bound, once running. Port 0 requests an
    /// ephemeral port, so tests read the real one from here.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Binds `port` and launches the loop thread.
    ///
    /// Fails with [`ServerError::AlreadyRunning`] on a live server and
    /// with [`ServerError::Bind`] if the listener cannot be set up; a
    /// failed start leaves no partial state behind.
    pub fn start(&mut self, port: u16) -> Result<(), ServerError> {
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }
        self.reap();

        // Bind on the caller thread so failures surface synchronously,
        // before any state is touched.
        let listener = std::net::TcpListener::bind(("0.0.0.0", port)).map_err(ServerError::Bind)?;
        listener.set_nonblocking(true).map_err(ServerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ServerError::Bind)?;

        let handler = self.handler.take().ok_or(ServerError::LoopPanicked)?;

        let shutdown = Arc::new(Notify::new());
        let thread = {
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("server-loop".to_string())
                .spawn(move || run_loop(listener, handler, shutdown))
                .map_err(ServerError::Spawn)?
        };

        info!("Server listening on {}", local_addr);
        self.local_addr = Some(local_addr);
        self.shutdown = Some(shutdown);
        self.thread = Some(thread);
        Ok(())
    }

    /// Signals the loop to stop, joins it, and reclaims the handler.
    ///
    /// Every client is disconnected and destroyed by the exiting loop.
    /// Safe to call from any thread; once it returns, no further handler
    /// invocations occur. Fails with [`ServerError::NotRunning`] if the
    /// server was never started.
    pub fn stop(&mut self) -> Result<(), ServerError> {
        let thread = self.thread.take().ok_or(ServerError::NotRunning)?;

        if let Some(shutdown) = self.shutdown.take() {
            shutdown.notify_one();
        }
        self.local_addr = None;

        match thread.join() {
            Ok(handler) => {
                self.handler = Some(handler);
                Ok(())
            }
            Err(_) => Err(ServerError::LoopPanicked),
        }
    }

    /// Reclaims the handler from a loop that exited on its own (fatal
    /// multiplexer error), so the server can be started again.
    fn reap(&mut self) {
        if self.thread.as_ref().map_or(false, |t| t.is_finished()) {
            if let Some(thread) = self.thread.take() {
                if let Ok(handler) = thread.join() {
                    self.handler = Some(handler);
                }
            }
            self.shutdown = None;
            self.local_addr = None;
        }
    }
}

impl<H: Handler> Drop for Server<H> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Loop thread entry: builds the confined runtime and runs the loop until
/// it is told to stop. Always hands the handler back to the owner.
fn run_loop<H: Handler>(
    listener: std::net::TcpListener,
    handler: H,
    shutdown: Arc<Notify>,
) -> H {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build server runtime: {}", e);
            return handler;
        }
    };

    runtime.block_on(async move {
        let listener = match TcpListener::from_std(listener) {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to register listener with the multiplexer: {}", e);
                return handler;
            }
        };

        serve(listener, handler, shutdown).await
    })
}

enum Wake {
    Shutdown,
    Incoming(io::Result<(TcpStream, SocketAddr)>),
    Readable(u32),
}

/// The multiplex loop proper. Owns the roster for its whole lifetime.
async fn serve<H: Handler>(listener: TcpListener, mut handler: H, shutdown: Arc<Notify>) -> H {
    let mut clients = ClientManager::new();
    let mut outbox = Outbox::new();

    loop {
        let wake = tokio::select! {
            biased;
            _ = shutdown.notified() => Wake::Shutdown,
            incoming = listener.accept() => Wake::Incoming(incoming),
            id = next_readable(&clients) => Wake::Readable(id),
        };

        match wake {
            Wake::Shutdown => break,
            Wake::Incoming(Ok((stream, addr))) => {
                let id = clients.add(stream, addr);
                handler.on_connect(id, &mut clients, &mut outbox);
                flush(&mut handler, &mut clients, &mut outbox).await;
            }
            Wake::Incoming(Err(e)) => {
                // half-created connection is discarded; the loop goes on
                warn!("Failed to accept connection: {}", e);
            }
            Wake::Readable(id) => {
                receive_one(&mut handler, &mut clients, &mut outbox, id).await;
            }
        }
    }

    // Full stop: close every socket and clear the roster. No handler
    // callbacks fire past this point.
    info!("Server stopping, dropping {} client(s)", clients.len());
    clients.clear();
    drop(listener);

    handler
}

/// Resolves to the id of the next client whose socket reports readiness.
/// Pends forever while the roster is empty. Readiness errors are surfaced
/// by the subsequent read.
async fn next_readable(clients: &ClientManager) -> u32 {
    if clients.is_empty() {
        return std::future::pending().await;
    }

    let waits: Vec<_> = clients
        .iter()
        .map(|client| {
            Box::pin(async move {
                let _ = client.stream.readable().await;
                client.id
            })
        })
        .collect();

    let (id, _, _) = select_all(waits).await;
    id
}

/// One receive cycle for a ready client: read, decode, dispatch.
///
/// A dead socket removes the client and continues the loop; a malformed
/// packet is dropped while the client is kept.
async fn receive_one<H: Handler>(
    handler: &mut H,
    clients: &mut ClientManager,
    outbox: &mut Outbox,
    id: u32,
) {
    let mut buffer = [0u8; PACKET_SIZE];

    let outcome = match clients.get_mut(id) {
        Some(client) => client.stream.try_read(&mut buffer),
        None => return,
    };

    match outcome {
        Ok(0) => drop_client(handler, clients, outbox, id).await,
        Ok(n) => match Packet::decode(&buffer[..n]) {
            Ok(packet) => {
                handler.on_packet(packet, id, clients, outbox);
                flush(handler, clients, outbox).await;
            }
            Err(e) => {
                warn!("Dropping malformed packet from client {}: {}", id, e);
            }
        },
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
            // spurious readiness
        }
        Err(e) => {
            debug!("Client {} receive failed: {}", id, e);
            drop_client(handler, clients, outbox, id).await;
        }
    }
}

/// Removes a client and lets the handler react (e.g. announce the exit).
async fn drop_client<H: Handler>(
    handler: &mut H,
    clients: &mut ClientManager,
    outbox: &mut Outbox,
    id: u32,
) {
    if let Some(client) = clients.remove(id) {
        info!("Client {} disconnected", id);
        handler.on_disconnect(&client, clients, outbox);
        flush(handler, clients, outbox).await;
    }
}

/// Delivers everything the handler queued. A failed write is a disconnect
/// for that client, which may queue further sends; those cascade until the
/// outbox settles.
async fn flush<H: Handler>(handler: &mut H, clients: &mut ClientManager, outbox: &mut Outbox) {
    loop {
        let dead = deliver(clients, outbox).await;
        if dead.is_empty() {
            break;
        }
        for id in dead {
            if let Some(client) = clients.remove(id) {
                info!("Client {} disconnected (send failed)", id);
                handler.on_disconnect(&client, clients, outbox);
            }
        }
    }
}

async fn deliver(clients: &mut ClientManager, outbox: &mut Outbox) -> Vec<u32> {
    let mut dead = Vec::new();

    for (target, packet) in outbox.drain() {
        let data = packet.encode();

        let ids: Vec<u32> = match target {
            Target::One(id) => vec![id],
            Target::AllExcept(skip) => clients.ids().into_iter().filter(|&i| i != skip).collect(),
            Target::All => clients.ids(),
        };

        for id in ids {
            if dead.contains(&id) {
                continue;
            }
            if let Some(client) = clients.get_mut(id) {
                if let Err(e) = client.stream.write_all(&data).await {
                    error!("Failed to send to client {}: {}", id, e);
                    dead.push(id);
                }
            }
        }
    }

    dead
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MessageType;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Connected { id: u32, roster: usize },
        Packet { id: u32, kind: MessageType },
        Disconnected { id: u32, roster: usize },
    }

    struct Probe {
        events: mpsc::Sender<Seen>,
    }

    impl Handler for Probe {
        fn on_connect(&mut self, id: u32, clients: &mut ClientManager, _out: &mut Outbox) {
            let _ = self.events.send(Seen::Connected {
                id,
                roster: clients.len(),
            });
        }

        fn on_packet(
            &mut self,
            packet: Packet,
            id: u32,
            _clients: &mut ClientManager,
            _out: &mut Outbox,
        ) {
            let _ = self.events.send(Seen::Packet {
                id,
                kind: packet.kind(),
            });
        }

        fn on_disconnect(&mut self, client: &Client, clients: &mut ClientManager, _out: &mut Outbox) {
            let _ = self.events.send(Seen::Disconnected {
                id: client.id,
                roster: clients.len(),
            });
        }
    }

    fn probe_server() -> (Server<Probe>, mpsc::Receiver<Seen>) {
        let (tx, rx) = mpsc::channel();
        (Server::new(Probe { events: tx }), rx)
    }

    fn recv(rx: &mpsc::Receiver<Seen>) -> Seen {
        rx.recv_timeout(Duration::from_secs(2)).expect("no event")
    }

    #[test]
    fn double_start_fails_and_leaves_the_first_session_running() {
        let (mut server, _rx) = probe_server();

        server.start(0).unwrap();
        assert!(server.is_running());
        let addr = server.local_addr().unwrap();

        assert!(matches!(server.start(0), Err(ServerError::AlreadyRunning)));
        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(addr));

        server.stop().unwrap();
        assert!(!server.is_running());
    }

    #[test]
    fn stop_when_never_started_fails() {
        let (mut server, _rx) = probe_server();
        assert!(matches!(server.stop(), Err(ServerError::NotRunning)));
    }

    #[test]
    fn restart_after_stop() {
        let (mut server, _rx) = probe_server();
        server.start(0).unwrap();
        server.stop().unwrap();
        server.start(0).unwrap();
        assert!(server.is_running());
        server.stop().unwrap();
    }

    #[test]
    fn accept_assigns_a_non_sentinel_id() {
        let (mut server, rx) = probe_server();
        server.start(0).unwrap();
        let addr = server.local_addr().unwrap();

        let _conn = std::net::TcpStream::connect(("127.0.0.1", addr.port())).unwrap();

        match recv(&rx) {
            Seen::Connected { id, roster } => {
                assert_ne!(id, shared::MYSELF);
                assert_eq!(roster, 1);
            }
            other => panic!("expected Connected, got {:?}", other),
        }

        server.stop().unwrap();
    }

    #[test]
    fn disconnect_mid_loop_keeps_the_other_clients() {
        let (mut server, rx) = probe_server();
        server.start(0).unwrap();
        let addr = server.local_addr().unwrap();

        let _a = std::net::TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        let _b = std::net::TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        let c = std::net::TcpStream::connect(("127.0.0.1", addr.port())).unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            match recv(&rx) {
                Seen::Connected { id, .. } => ids.push(id),
                other => panic!("expected Connected, got {:?}", other),
            }
        }

        drop(c);

        match recv(&rx) {
            Seen::Disconnected { id, roster } => {
                assert_eq!(id, ids[2]);
                assert_eq!(roster, 2);
            }
            other => panic!("expected Disconnected, got {:?}", other),
        }

        // no further callbacks for the removed client
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        server.stop().unwrap();
    }

    #[test]
    fn malformed_packet_is_dropped_but_the_client_is_kept() {
        use std::io::Write;

        let (mut server, rx) = probe_server();
        server.start(0).unwrap();
        let addr = server.local_addr().unwrap();

        let mut conn = std::net::TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        match recv(&rx) {
            Seen::Connected { .. } => {}
            other => panic!("expected Connected, got {:?}", other),
        }

        conn.write_all(b"garbage").unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let valid = Packet::new(MessageType::Del).with(1u32).unwrap();
        conn.write_all(&valid.encode()).unwrap();

        match recv(&rx) {
            Seen::Packet { kind, .. } => assert_eq!(kind, MessageType::Del),
            other => panic!("expected Packet, got {:?}", other),
        }

        server.stop().unwrap();
    }

    #[test]
    fn no_handler_calls_after_stop_returns() {
        let (mut server, rx) = probe_server();
        server.start(0).unwrap();
        let addr = server.local_addr().unwrap();

        let _conn = std::net::TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        match recv(&rx) {
            Seen::Connected { .. } => {}
            other => panic!("expected Connected, got {:?}", other),
        }

        server.stop().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn outbox_targets() {
        let mut outbox = Outbox::new();
        let packet = Packet::new(MessageType::Del).with(1u32).unwrap();

        outbox.send(3, packet.clone());
        outbox.broadcast(packet.clone());
        outbox.broadcast_except(3, packet);
        assert!(!outbox.is_empty());

        let queued = outbox.drain();
        assert_eq!(queued[0].0, Target::One(3));
        assert_eq!(queued[1].0, Target::All);
        assert_eq!(queued[2].0, Target::AllExcept(3));
        assert!(outbox.is_empty());
    }
}
