//! Client connection with a pollable protocol event queue
//!
//! The socket lives on its own thread (a current-thread tokio runtime,
//! matching the server's confinement model). The thread produces
//! [`Event`]s into an unbounded channel; the owning scene drains them
//! once per simulation tick through [`Connection::poll_event`], which
//! takes `&mut self` so there is exactly one consumer. Outbound packets
//! travel the opposite way over a second channel.

use log::{debug, error, info, warn};
use shared::{Packet, ProtocolError, PACKET_SIZE};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

/// Protocol-level event produced by the connection thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Transport-level connect succeeded.
    Connect,
    /// One decoded packet arrived.
    Packet(Packet),
    /// Transport-level disconnect detected.
    Disconnect,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection is already active")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("failed to connect: {0}")]
    Connect(io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// A client-side connection to the relay server.
#[derive(Default)]
pub struct Connection {
    thread: Option<thread::JoinHandle<()>>,
    events: Option<UnboundedReceiver<Event>>,
    outbound: Option<UnboundedSender<Packet>>,
    shutdown: Option<Arc<Notify>>,
    connected: Arc<AtomicBool>,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connects to `host:port` and launches the connection thread.
    ///
    /// The TCP connect happens synchronously so a failure surfaces here
    /// rather than as a later event.
    pub fn start(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        if self.thread.as_ref().map_or(false, |t| !t.is_finished()) {
            return Err(ClientError::AlreadyConnected);
        }
        self.reset();

        let stream = std::net::TcpStream::connect((host, port)).map_err(ClientError::Connect)?;
        stream.set_nonblocking(true).map_err(ClientError::Connect)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        let connected = Arc::clone(&self.connected);
        connected.store(true, Ordering::SeqCst);

        let thread = {
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("connection".to_string())
                .spawn(move || run_connection(stream, event_tx, out_rx, shutdown, connected))
                .map_err(ClientError::Connect)?
        };

        info!("Connected to {}:{}", host, port);
        self.thread = Some(thread);
        self.events = Some(event_rx);
        self.outbound = Some(out_tx);
        self.shutdown = Some(shutdown);
        Ok(())
    }

    /// Queues a packet for transmission.
    pub fn send(&self, packet: Packet) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.outbound
            .as_ref()
            .and_then(|tx| tx.send(packet).ok())
            .ok_or(ClientError::NotConnected)
    }

    /// Non-blocking poll of the event queue. An empty queue is simply
    /// "nothing this tick".
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.as_mut().and_then(|rx| rx.try_recv().ok())
    }

    /// Disconnects and joins the connection thread. Safe to call at any
    /// time, including when never started.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.notify_one();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.thread = None;
        self.events = None;
        self.outbound = None;
        self.shutdown = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Step {
    Stop,
    Write(Packet),
    Read,
}

/// Connection thread entry: pump the socket until disconnect or stop.
fn run_connection(
    stream: std::net::TcpStream,
    events: UnboundedSender<Event>,
    mut outbound: UnboundedReceiver<Packet>,
    shutdown: Arc<Notify>,
    connected: Arc<AtomicBool>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build connection runtime: {}", e);
            connected.store(false, Ordering::SeqCst);
            let _ = events.send(Event::Disconnect);
            return;
        }
    };

    runtime.block_on(async move {
        let mut stream = match TcpStream::from_std(stream) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to register socket: {}", e);
                connected.store(false, Ordering::SeqCst);
                let _ = events.send(Event::Disconnect);
                return;
            }
        };

        let _ = events.send(Event::Connect);

        let mut buffer = [0u8; PACKET_SIZE];

        loop {
            let step = tokio::select! {
                biased;
                _ = shutdown.notified() => Step::Stop,
                queued = outbound.recv() => match queued {
                    Some(packet) => Step::Write(packet),
                    // the owning Connection was torn down
                    None => Step::Stop,
                },
                _ = stream.readable() => Step::Read,
            };

            match step {
                Step::Stop => break,
                Step::Write(packet) => {
                    if let Err(e) = stream.write_all(&packet.encode()).await {
                        error!("Send failed: {}", e);
                        let _ = events.send(Event::Disconnect);
                        break;
                    }
                }
                Step::Read => match stream.try_read(&mut buffer) {
                    Ok(0) => {
                        info!("Server closed the connection");
                        let _ = events.send(Event::Disconnect);
                        break;
                    }
                    Ok(n) => match Packet::decode(&buffer[..n]) {
                        Ok(packet) => {
                            let _ = events.send(Event::Packet(packet));
                        }
                        Err(e) => {
                            warn!("Dropping malformed packet: {}", e);
                        }
                    },
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        debug!("Receive failed: {}", e);
                        let _ = events.send(Event::Disconnect);
                        break;
                    }
                },
            }
        }

        connected.store(false, Ordering::SeqCst);
    });
}
