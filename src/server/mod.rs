//! Single-threaded readiness-polling server.
//!
//! One [`Server`] owns the listening socket, a fixed-capacity [`Registry`] of
//! watched endpoints, and the [`mio::Poll`] they are registered with. Each
//! turn waits for readiness, then dispatches ready endpoints in slot order:
//! the listener to accept-and-admit, every other slot to service-connection.
//!
//! Slot 0 always holds the listener. The remaining `num_conns` slots hold
//! admitted connections; a connection arriving when they are all taken is
//! sent [`REJECTION_MESSAGE`] and closed without being registered.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, Token, Waker};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::config::{Config, ConfigError};
use crate::http::headers::parse_headers;
use crate::http::{HeaderSection, MalformedRequest, RequestLine, parse_request_line};
use crate::listener::{self, ProvisionError};
use crate::registry::{Registry, RegistryError, Slot};

/// Bytes sent to a connection that arrives while every slot is taken.
pub const REJECTION_MESSAGE: &[u8] = b"number of connections exceed\n";

const LISTENER: Token = Token(0);
const WAKER: Token = Token(usize::MAX);
const LISTENER_SLOT: usize = 0;

// Reads spent discarding a rejected connection's pending input before close.
const REJECT_DRAIN_READS: usize = 4;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("readiness wait failed: {0}")]
    Poll(#[source] io::Error),
}

/// Counters describing what the server has done since it was bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Connections accepted and registered.
    pub admitted: u64,
    /// Connections accepted, sent the rejection message, and closed.
    pub rejected: u64,
    /// Registered connections removed after end-of-stream or a read error.
    pub closed: u64,
    /// Request lines parsed successfully.
    pub requests: u64,
    /// Buffers discarded as malformed or over the request-line limit.
    pub malformed: u64,
    /// `accept(2)` failures other than `WouldBlock`.
    pub accept_errors: u64,
    /// Reads that failed with an error other than `WouldBlock`.
    pub read_errors: u64,
}

/// Stops a running [`Server`] from another thread.
///
/// Setting the flag alone would only be seen after the current readiness
/// wait times out, so the handle also wakes the poll.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Asks the server to return from [`Server::run`] at the start of its next turn.
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake the poll for shutdown");
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
enum Endpoint {
    Listener(TcpListener),
    Peer(Peer),
}

impl Endpoint {
    fn token(&self) -> Token {
        match self {
            Self::Listener(_) => LISTENER,
            Self::Peer(peer) => peer.token,
        }
    }
}

// Registers the endpoint with the poll for the interest its slot records.
fn watch(poll: &Poll, entry: &mut Slot<Endpoint>) -> io::Result<()> {
    let interest = entry.interest;
    match &mut entry.handle {
        Endpoint::Listener(listener) => poll.registry().register(listener, LISTENER, interest),
        Endpoint::Peer(peer) => poll.registry().register(&mut peer.stream, peer.token, interest),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    AwaitingRequestLine,
    RequestLineSeen,
}

// What one read did to a connection's input buffer.
#[derive(Debug)]
enum Observation {
    Request(RequestLine, HeaderSection),
    Pending(usize),
    Overflow(usize),
    Malformed(MalformedRequest),
    Ignored(usize),
}

#[derive(Debug)]
struct Peer {
    token: Token,
    stream: TcpStream,
    addr: SocketAddr,
    input: BytesMut,
    state: PeerState,
}

impl Peer {
    fn new(token: Token, stream: TcpStream, addr: SocketAddr, capacity: usize) -> Self {
        Self {
            token,
            stream,
            addr,
            input: BytesMut::with_capacity(capacity),
            state: PeerState::AwaitingRequestLine,
        }
    }

    // Input is kept across reads only while it could still become a request line.
    fn observe_input(&mut self, max_request_line: usize) -> Observation {
        if self.state == PeerState::RequestLineSeen {
            let len = self.input.len();
            self.input.clear();
            return Observation::Ignored(len);
        }

        match parse_request_line(&self.input) {
            Ok(line) => {
                let headers = parse_headers(&self.input[line.wire_len()..]);
                self.input.clear();
                self.state = PeerState::RequestLineSeen;
                Observation::Request(line, headers)
            }
            Err(e) if e.is_incomplete() && self.input.len() <= max_request_line => {
                Observation::Pending(self.input.len())
            }
            Err(e) if e.is_incomplete() => {
                let len = self.input.len();
                self.input.clear();
                Observation::Overflow(len)
            }
            Err(e) => {
                self.input.clear();
                Observation::Malformed(e)
            }
        }
    }
}

/// The multiplexing engine.
///
/// # Examples
///
/// ```rust,no_run
/// use pollserve::config::Config;
/// use pollserve::server::Server;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut server = Server::bind(Config::default())?;
///     println!("Listening on {}", server.local_addr());
///     server.run()?;
///     Ok(())
/// }
/// ```
pub struct Server {
    poll: Poll,
    events: Events,
    registry: Registry<Endpoint>,
    config: Config,
    local_addr: SocketAddr,
    scratch: Vec<u8>,
    next_token: usize,
    shutdown: ShutdownHandle,
    stats: Stats,
    last_request: Option<RequestLine>,
}

impl Server {
    /// Validates `config`, provisions the listener and registers it in slot 0.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for unusable settings,
    /// [`ServerError::Provision`] if the socket cannot be bound or put into
    /// listening state, and [`ServerError::Io`] if the poll cannot be created.
    pub fn bind(config: Config) -> Result<Self, ServerError> {
        config.validate()?;

        // Slot 0 holds the listener; events also carry the waker.
        let slots = config
            .num_conns
            .checked_add(1)
            .ok_or(ConfigError::Invalid {
                field: "num_conns",
                reason: "too large",
            })?;
        let event_capacity = slots.checked_add(1).ok_or(ConfigError::Invalid {
            field: "num_conns",
            reason: "too large",
        })?;

        let listener = listener::provision(&config)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER)?;

        let mut registry = Registry::with_capacity(slots);
        let slot = registry.add(Endpoint::Listener(listener))?;
        if let Some(entry) = registry.get_mut(slot) {
            watch(&poll, entry)?;
        }

        Ok(Self {
            poll,
            events: Events::with_capacity(event_capacity),
            registry,
            scratch: vec![0; config.read_chunk_size],
            config,
            local_addr,
            next_token: LISTENER.0 + 1,
            shutdown: ShutdownHandle {
                requested: Arc::new(AtomicBool::new(false)),
                waker: Arc::new(waker),
            },
            stats: Stats::default(),
            last_request: None,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the configuration the server was bound with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of currently registered client connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len().saturating_sub(1)
    }

    /// Maximum number of simultaneously registered client connections.
    pub fn capacity(&self) -> usize {
        self.registry.capacity().saturating_sub(1)
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// The most recently parsed request line, across all connections.
    pub fn last_request(&self) -> Option<&RequestLine> {
        self.last_request.as_ref()
    }

    /// Returns a handle that stops [`run`](Self::run) from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Runs turns until shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Poll`] if the readiness wait itself fails.
    /// Per-connection failures are logged and never end the loop.
    pub fn run(&mut self) -> Result<(), ServerError> {
        info!(
            address = %self.local_addr,
            capacity = self.capacity(),
            "pollserve listening"
        );

        let timeout = self.config.poll_timeout();
        while !self.shutdown.is_shutdown() {
            self.poll_once(Some(timeout))?;
        }

        info!(open = self.connection_count(), "shutdown requested; stopping");
        Ok(())
    }

    /// Waits for readiness at most `timeout` (forever if `None`) and
    /// dispatches every ready endpoint once.
    ///
    /// Returns the number of endpoints dispatched; a timeout dispatches none.
    ///
    /// Readiness is snapshotted in slot order before anything is dispatched.
    /// Each snapshot entry is then looked up again by token, since closing a
    /// connection moves the last slot's entry into the freed slot; an entry
    /// closed earlier in the same turn is skipped.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize, ServerError> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => {
                error!(error = %e, "readiness wait failed");
                return Err(ServerError::Poll(e));
            }
        }

        if self.events.is_empty() {
            trace!("poll timed out with nothing ready");
            return Ok(0);
        }

        self.registry.clear_readiness();
        for event in self.events.iter() {
            if event.token() == WAKER {
                continue;
            }
            let Some(slot) = self.registry.position(|e| e.token() == event.token()) else {
                continue;
            };
            if let Some(entry) = self.registry.get_mut(slot) {
                entry.readiness.observe(event);
            }
        }

        let ready: Vec<Token> = self
            .registry
            .iter()
            .filter(|entry| entry.readiness.is_ready())
            .map(|entry| entry.handle.token())
            .collect();

        for &token in &ready {
            let Some(slot) = self.slot_of(token) else {
                trace!(?token, "endpoint closed earlier this turn");
                continue;
            };
            if slot == LISTENER_SLOT {
                self.accept_and_admit();
            } else {
                self.service(slot);
            }
        }

        Ok(ready.len())
    }

    fn slot_of(&self, token: Token) -> Option<usize> {
        self.registry.position(|endpoint| endpoint.token() == token)
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        if self.next_token == WAKER.0 {
            self.next_token = LISTENER.0 + 1;
        }
        token
    }

    // Drains the accept queue: readiness is edge-triggered.
    fn accept_and_admit(&mut self) {
        loop {
            let accepted = match self.registry.get(LISTENER_SLOT).map(|entry| &entry.handle) {
                Some(Endpoint::Listener(listener)) => listener.accept(),
                _ => {
                    error!("slot 0 does not hold the listener");
                    return;
                }
            };

            match accepted {
                Ok((stream, addr)) => self.admit(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.stats.accept_errors += 1;
                    warn!(error = %e, "failed to accept connection");
                    return;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.registry.is_full() {
            self.reject(stream, addr);
            return;
        }

        let token = self.next_token();
        let peer = Peer::new(token, stream, addr, self.config.read_chunk_size);
        let slot = match self.registry.add(Endpoint::Peer(peer)) {
            Ok(slot) => slot,
            Err(e) => {
                warn!(peer = %addr, error = %e, "connection dropped");
                return;
            }
        };

        let watched = match self.registry.get_mut(slot) {
            Some(entry) => watch(&self.poll, entry),
            None => return,
        };
        if let Err(e) = watched {
            warn!(peer = %addr, error = %e, "failed to watch connection; closing");
            if let Err(e) = self.registry.remove_at(slot) {
                warn!(slot, error = %e, "failed to unregister unwatched connection");
            }
            return;
        }

        self.stats.admitted += 1;
        info!(
            peer = %addr,
            slot,
            open = self.connection_count(),
            "connection admitted"
        );
    }

    // Closing a socket with unread input sends RST, which can discard the
    // message before the client reads it; so shut down writes and drain
    // whatever the client already sent.
    fn reject(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        self.stats.rejected += 1;
        warn!(
            peer = %addr,
            capacity = self.capacity(),
            "connection limit reached; rejecting"
        );
        if let Err(e) = stream.write_all(REJECTION_MESSAGE) {
            debug!(peer = %addr, error = %e, "failed to send rejection message");
        }
        if let Err(e) = stream.shutdown(Shutdown::Write) {
            debug!(peer = %addr, error = %e, "failed to shut down rejected connection");
        }
        for _ in 0..REJECT_DRAIN_READS {
            match stream.read(&mut self.scratch) {
                Ok(0) => break,
                Ok(n) => trace!(peer = %addr, bytes = n, "discarding input from rejected connection"),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }

    // Reads until the socket would block, handing each chunk to the parser.
    fn service(&mut self, slot: usize) {
        let max_request_line = self.config.max_request_line;
        loop {
            let Some(Endpoint::Peer(peer)) = self.registry.get_mut(slot).map(|entry| &mut entry.handle)
            else {
                warn!(slot, "serviced slot does not hold a connection");
                return;
            };
            let addr = peer.addr;

            match peer.stream.read(&mut self.scratch) {
                Ok(0) => {
                    debug!(peer = %addr, "connection closed by peer");
                    break;
                }
                Ok(n) => {
                    peer.input.extend_from_slice(&self.scratch[..n]);
                    let observation = peer.observe_input(max_request_line);
                    self.record(addr, observation);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.stats.read_errors += 1;
                    warn!(peer = %addr, error = %e, "read failed");
                    break;
                }
            }
        }

        self.close_connection(slot);
    }

    fn record(&mut self, peer: SocketAddr, observation: Observation) {
        match observation {
            Observation::Request(line, headers) => {
                self.stats.requests += 1;
                info!(
                    peer = %peer,
                    method = %line.method(),
                    target = line.target(),
                    version = %line.version(),
                    "request line parsed"
                );
                match headers {
                    HeaderSection::Complete(h) => {
                        debug!(peer = %peer, headers = h.len(), "header section parsed")
                    }
                    HeaderSection::Partial => {
                        debug!(peer = %peer, "header section not complete in this read")
                    }
                    HeaderSection::Invalid(e) => {
                        debug!(peer = %peer, error = %e, "header section invalid")
                    }
                }
                self.last_request = Some(line);
            }
            Observation::Pending(buffered) => {
                trace!(peer = %peer, buffered, "request line not terminated yet")
            }
            Observation::Overflow(buffered) => {
                self.stats.malformed += 1;
                warn!(
                    peer = %peer,
                    buffered,
                    limit = self.config.max_request_line,
                    "request line too long; discarding"
                );
            }
            Observation::Malformed(e) => {
                self.stats.malformed += 1;
                warn!(peer = %peer, error = %e, "malformed request line");
            }
            Observation::Ignored(bytes) => {
                trace!(peer = %peer, bytes, "discarding input after the request line")
            }
        }
    }

    fn close_connection(&mut self, slot: usize) {
        if slot == LISTENER_SLOT {
            error!("refusing to remove the listener slot");
            return;
        }

        match self.registry.remove_at(slot) {
            Ok(Endpoint::Peer(mut peer)) => {
                if let Err(e) = self.poll.registry().deregister(&mut peer.stream) {
                    debug!(peer = %peer.addr, error = %e, "failed to deregister connection");
                }
                self.stats.closed += 1;
                info!(
                    peer = %peer.addr,
                    open = self.connection_count(),
                    "connection closed"
                );
            }
            Ok(Endpoint::Listener(_)) => error!(slot, "listener found outside slot 0"),
            Err(e) => warn!(slot, error = %e, "close requested for an unoccupied slot"),
        }
    }
}
