//! Connection Acceptor
//!
//! Binds a listening port and serves each accepted connection on its own
//! thread with a handler made fresh for that connection.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──bind (≤ 10 tries, 5s apart)──▶ Bound ──listen(50)──▶ Listening
//!                                                                  │
//!                                   acceptor thread ──────────────▶ Accepting ◀─┐
//!                                                                  │            │
//!                                                   accept error ──▶ Healing ───┘
//!                                                   (close, rebind same port,
//!                                                    capped exponential backoff)
//! ```
//!
//! There is no stopped state: the acceptor runs until the process exits.

use crate::connection::{Connection, Endpoint};
use crate::error::{NetError, NetResult};
use crate::transport::{ByteStream, Listener, SystemTransport, Transport};
use crossbeam_channel::{Receiver, Sender};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Serves exactly one accepted connection
pub trait ConnectionHandler: Send + 'static {
    /// Run to completion; the connection is closed afterwards either way
    fn serve(&mut self, conn: &mut Connection) -> io::Result<()>;
}

/// Makes a fresh handler for every accepted connection
pub trait HandlerFactory: Send + Sync + 'static {
    type Handler: ConnectionHandler;

    fn create(&self) -> Self::Handler;
}

impl<F, H> HandlerFactory for F
where
    F: Fn() -> H + Send + Sync + 'static,
    H: ConnectionHandler,
{
    type Handler = H;

    fn create(&self) -> H {
        self()
    }
}

/// Writes back everything it reads
#[derive(Debug)]
pub struct EchoHandler {
    buffer_size: usize,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self { buffer_size: 4096 }
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHandler for EchoHandler {
    fn serve(&mut self, conn: &mut Connection) -> io::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let n = conn.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            conn.write_all(&buf[..n])?;
        }
    }
}

/// Acceptor configuration
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    /// Local address to bind; unspecified means every interface
    pub bind_address: Ipv4Addr,
    /// Attempts for the initial bind
    pub bind_attempts: u32,
    /// Pause between failed initial binds
    pub bind_retry_delay: Duration,
    /// Pending-connection queue depth
    pub backlog: i32,
    /// First pause before rebinding a failed listener
    pub heal_initial_backoff: Duration,
    /// Cap on the rebind pause
    pub heal_max_backoff: Duration,
    /// Buffered events before new ones are dropped
    pub event_capacity: usize,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            bind_address: Ipv4Addr::UNSPECIFIED,
            bind_attempts: 10,
            bind_retry_delay: Duration::from_secs(5),
            backlog: 50,
            heal_initial_backoff: Duration::from_millis(100),
            heal_max_backoff: Duration::from_secs(30),
            event_capacity: 256,
        }
    }
}

impl AcceptorConfig {
    /// Validate configuration
    pub fn validate(&self) -> NetResult<()> {
        if self.bind_attempts == 0 {
            return Err(NetError::InvalidConfig("bind_attempts must be at least 1".into()));
        }
        if self.backlog <= 0 {
            return Err(NetError::InvalidConfig("backlog must be positive".into()));
        }
        if self.heal_initial_backoff > self.heal_max_backoff {
            return Err(NetError::InvalidConfig(
                "heal_initial_backoff exceeds heal_max_backoff".into(),
            ));
        }
        Ok(())
    }
}

/// Acceptor lifecycle state.
///
/// `Created` and `Bound` are passed through inside
/// [`ConnectionAcceptor::start`]; a handle first observes `Listening` or later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    Created,
    Bound,
    Listening,
    Accepting,
    /// Replacing a listening socket after an accept failure
    Healing,
}

impl AcceptorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Bound,
            2 => Self::Listening,
            3 => Self::Accepting,
            _ => Self::Healing,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Bound => 1,
            Self::Listening => 2,
            Self::Accepting => 3,
            Self::Healing => 4,
        }
    }
}

/// Notifications from the acceptor thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptorEvent {
    Accepted { peer: SocketAddr },
    HandlerFinished { peer: SocketAddr },
    HandlerFailed { peer: SocketAddr, error: String },
    /// The listening socket was replaced after `attempts` rebinds
    Healed { addr: SocketAddrV4, attempts: u32 },
}

struct Shared {
    state: AtomicU8,
    accepted: AtomicU64,
    heals: AtomicU64,
    active: AtomicUsize,
    /// Pause before the next rebind, in nanoseconds
    backoff: AtomicU64,
}

impl Shared {
    fn new(initial_backoff: Duration) -> Self {
        Self {
            state: AtomicU8::new(AcceptorState::Created.as_u8()),
            accepted: AtomicU64::new(0),
            heals: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            backoff: AtomicU64::new(duration_nanos(initial_backoff)),
        }
    }

    fn set_state(&self, state: AcceptorState) {
        trace!("Acceptor state -> {:?}", state);
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn backoff(&self) -> Duration {
        Duration::from_nanos(self.backoff.load(Ordering::Relaxed))
    }

    fn set_backoff(&self, backoff: Duration) {
        self.backoff.store(duration_nanos(backoff), Ordering::Relaxed);
    }

    fn state(&self) -> AcceptorState {
        AcceptorState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Binds listening ports and dispatches connections
pub struct ConnectionAcceptor {
    config: AcceptorConfig,
    transport: Arc<dyn Transport>,
}

impl ConnectionAcceptor {
    /// Create with OS sockets
    pub fn new(config: AcceptorConfig) -> NetResult<Self> {
        Self::with_transport(config, Arc::new(SystemTransport::new()))
    }

    pub fn with_transport(config: AcceptorConfig, transport: Arc<dyn Transport>) -> NetResult<Self> {
        config.validate()?;
        Ok(Self { config, transport })
    }

    /// Bind `port`, start accepting on a background thread and return.
    ///
    /// Fails only if the initial bind phase, `listen` or the thread spawn
    /// fails. Port 0 picks an ephemeral port; see [`AcceptorHandle::local_addr`].
    pub fn start<F: HandlerFactory>(&self, port: u16, factory: F) -> NetResult<AcceptorHandle> {
        let shared = Arc::new(Shared::new(self.config.heal_initial_backoff));
        let requested = SocketAddrV4::new(self.config.bind_address, port);

        let listener = self.bind_with_retry(requested)?;
        shared.set_state(AcceptorState::Bound);

        listener.listen(self.config.backlog)?;
        let local_addr = listener.local_addr()?;
        shared.set_state(AcceptorState::Listening);
        info!("Listening on {} (backlog {})", local_addr, self.config.backlog);

        let (events_tx, events_rx) = crossbeam_channel::bounded(self.config.event_capacity);
        let accept_loop = AcceptLoop {
            addr: local_addr,
            transport: self.transport.clone(),
            config: self.config.clone(),
            factory: Arc::new(factory),
            shared: shared.clone(),
            events: events_tx,
        };

        let thread = thread::Builder::new()
            .name(format!("acceptor-{}", local_addr.port()))
            .spawn(move || accept_loop.run(listener))?;

        Ok(AcceptorHandle {
            local_addr,
            shared,
            events: events_rx,
            thread,
        })
    }

    fn bind_with_retry(&self, addr: SocketAddrV4) -> NetResult<Box<dyn Listener>> {
        let budget = self.config.bind_attempts;
        let mut attempt = 1;

        loop {
            match self.transport.bind(addr) {
                Ok(listener) => {
                    debug!("Bound {} (attempt {}/{})", addr, attempt, budget);
                    return Ok(listener);
                }
                Err(e) if attempt < budget => {
                    warn!(
                        "Bind to {} failed (attempt {}/{}): {}; retrying in {:?}",
                        addr, attempt, budget, e, self.config.bind_retry_delay
                    );
                    thread::sleep(self.config.bind_retry_delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!("Giving up on binding {} after {} attempts: {}", addr, attempt, e);
                    return Err(NetError::Bind {
                        addr: SocketAddr::V4(addr),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}

/// Owner's view of a running acceptor
pub struct AcceptorHandle {
    local_addr: SocketAddrV4,
    shared: Arc<Shared>,
    events: Receiver<AcceptorEvent>,
    thread: thread::JoinHandle<()>,
}

impl AcceptorHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub fn state(&self) -> AcceptorState {
        self.shared.state()
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> u64 {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    /// Times the listening socket was replaced
    pub fn heals(&self) -> u64 {
        self.shared.heals.load(Ordering::Relaxed)
    }

    /// Handlers currently running
    pub fn active_handlers(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Event stream from the acceptor thread
    pub fn events(&self) -> &Receiver<AcceptorEvent> {
        &self.events
    }

    /// Pause before the next rebind should the listener fail now
    pub fn heal_backoff(&self) -> Duration {
        self.shared.backoff()
    }

    /// Whether the acceptor thread is alive
    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }
}

struct AcceptLoop<F: HandlerFactory> {
    addr: SocketAddrV4,
    transport: Arc<dyn Transport>,
    config: AcceptorConfig,
    factory: Arc<F>,
    shared: Arc<Shared>,
    events: Sender<AcceptorEvent>,
}

impl<F: HandlerFactory> AcceptLoop<F> {
    fn run(self, mut listener: Box<dyn Listener>) {
        self.shared.set_state(AcceptorState::Accepting);
        debug!("Acceptor for {} started", self.addr);

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    self.shared.set_backoff(self.config.heal_initial_backoff);
                    self.dispatch(stream, peer);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Accept on {} failed: {}", self.addr, e);
                    // The port must be free before the replacement binds it
                    drop(listener);
                    listener = self.heal();
                }
            }
        }
    }

    fn dispatch(&self, stream: Box<dyn ByteStream>, peer: SocketAddr) {
        self.shared.accepted.fetch_add(1, Ordering::Relaxed);
        self.shared.active.fetch_add(1, Ordering::Relaxed);
        publish(&self.events, AcceptorEvent::Accepted { peer });

        let handler = self.factory.create();
        let conn = Connection::new(stream, Endpoint::new(peer.ip().to_string(), peer.port()), false);
        let shared = self.shared.clone();
        let events = self.events.clone();

        let spawned = thread::Builder::new()
            .name(format!("conn-{}", peer))
            .spawn(move || serve_connection(handler, conn, peer, &shared, &events));

        // On failure the closure, and the connection with it, is dropped
        if let Err(e) = spawned {
            self.spawn_failed(peer, e);
        }
    }

    fn spawn_failed(&self, peer: SocketAddr, err: io::Error) {
        error!("Cannot spawn handler thread for {}: {}", peer, err);
        self.shared.active.fetch_sub(1, Ordering::Relaxed);
        publish(
            &self.events,
            AcceptorEvent::HandlerFailed {
                peer,
                error: format!("cannot spawn handler thread: {}", err),
            },
        );
    }

    /// Bind a replacement listener, backing off between failed rebinds.
    fn heal(&self) -> Box<dyn Listener> {
        self.shared.set_state(AcceptorState::Healing);

        let mut attempt = 1;
        loop {
            let backoff = self.shared.backoff();
            thread::sleep(backoff);
            self.shared
                .set_backoff(next_backoff(backoff, self.config.heal_max_backoff));

            match self.rebind() {
                Ok(listener) => {
                    self.shared.heals.fetch_add(1, Ordering::Relaxed);
                    self.shared.set_state(AcceptorState::Accepting);
                    info!("Listener on {} restored (attempt {})", self.addr, attempt);
                    publish(
                        &self.events,
                        AcceptorEvent::Healed {
                            addr: self.addr,
                            attempts: attempt,
                        },
                    );
                    return listener;
                }
                Err(e) => {
                    warn!(
                        "Rebinding {} failed (attempt {}): {}; next try in {:?}",
                        self.addr,
                        attempt,
                        e,
                        self.shared.backoff()
                    );
                    attempt += 1;
                }
            }
        }
    }

    fn rebind(&self) -> io::Result<Box<dyn Listener>> {
        let listener = self.transport.bind(self.addr)?;
        listener.listen(self.config.backlog)?;
        Ok(listener)
    }
}

/// Double `current`, never exceeding `max`
fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn serve_connection<H: ConnectionHandler>(
    mut handler: H,
    mut conn: Connection,
    peer: SocketAddr,
    shared: &Shared,
    events: &Sender<AcceptorEvent>,
) {
    debug!("Serving connection from {}", peer);

    let result = panic::catch_unwind(AssertUnwindSafe(|| handler.serve(&mut conn)));
    conn.close();
    shared.active.fetch_sub(1, Ordering::Relaxed);

    let event = match result {
        Ok(Ok(())) => {
            debug!("Connection from {} finished", peer);
            AcceptorEvent::HandlerFinished { peer }
        }
        Ok(Err(e)) => {
            warn!("Handler for {} failed: {}", peer, e);
            AcceptorEvent::HandlerFailed {
                peer,
                error: e.to_string(),
            }
        }
        Err(panic_info) => {
            let error = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            error!("Handler for {} panicked: {}", peer, error);
            AcceptorEvent::HandlerFailed { peer, error }
        }
    };

    publish(events, event);
}

fn publish(events: &Sender<AcceptorEvent>, event: AcceptorEvent) {
    if events.try_send(event).is_err() {
        trace!("Acceptor event dropped (queue full or no receiver)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyTransport;
    use std::net::{Shutdown, TcpStream};
    use std::time::Instant;

    fn test_config() -> AcceptorConfig {
        AcceptorConfig {
            bind_address: Ipv4Addr::LOCALHOST,
            bind_retry_delay: Duration::from_millis(10),
            heal_initial_backoff: Duration::from_millis(10),
            heal_max_backoff: Duration::from_millis(100),
            ..AcceptorConfig::default()
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn client(addr: SocketAddrV4) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
    }

    fn ping(stream: &mut TcpStream) -> [u8; 4] {
        stream.write_all(b"PING").unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_bind_retries_then_echoes() {
        let transport = FlakyTransport::new(2, 0);
        let acceptor = ConnectionAcceptor::with_transport(test_config(), Arc::new(transport.clone())).unwrap();

        let handle = acceptor.start(0, EchoHandler::new).unwrap();

        assert_eq!(transport.binds(), 3);
        assert!(matches!(
            handle.state(),
            AcceptorState::Listening | AcceptorState::Accepting
        ));
        let mut stream = client(handle.local_addr());
        assert_eq!(&ping(&mut stream), b"PING");
        assert!(wait_until(|| handle.state() == AcceptorState::Accepting));
        assert_eq!(handle.accepted(), 1);
    }

    #[test]
    fn test_bind_exhaustion_reported() {
        let transport = FlakyTransport::new(5, 0);
        let config = AcceptorConfig {
            bind_attempts: 3,
            ..test_config()
        };
        let acceptor = ConnectionAcceptor::with_transport(config, Arc::new(transport.clone())).unwrap();

        let err = acceptor.start(0, EchoHandler::new).err().unwrap();

        assert!(matches!(err, NetError::Bind { attempts: 3, .. }));
        assert_eq!(transport.binds(), 3);
    }

    #[test]
    fn test_concurrent_clients_get_own_handlers() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let factory = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            EchoHandler::new()
        };

        let acceptor = ConnectionAcceptor::with_transport(test_config(), Arc::new(SystemTransport)).unwrap();
        let handle = acceptor.start(0, factory).unwrap();

        // The first client holds its handler busy waiting for input
        let mut idle = client(handle.local_addr());
        assert!(wait_until(|| handle.active_handlers() == 1));

        let mut busy = client(handle.local_addr());
        assert_eq!(&ping(&mut busy), b"PING");
        assert_eq!(&ping(&mut idle), b"PING");

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(handle.active_handlers(), 2);

        drop(idle);
        drop(busy);
        assert!(wait_until(|| handle.active_handlers() == 0));
    }

    #[test]
    fn test_heals_after_accept_failure() {
        let transport = FlakyTransport::new(0, 1);
        let acceptor = ConnectionAcceptor::with_transport(test_config(), Arc::new(transport.clone())).unwrap();
        let handle = acceptor.start(0, EchoHandler::new).unwrap();

        assert!(wait_until(|| handle.heals() == 1));
        assert!(wait_until(|| handle.state() == AcceptorState::Accepting));
        assert_eq!(transport.binds(), 2);

        let mut stream = client(handle.local_addr());
        assert_eq!(&ping(&mut stream), b"PING");
        assert!(handle.is_running());

        let healed = handle
            .events()
            .try_iter()
            .any(|e| matches!(e, AcceptorEvent::Healed { attempts: 1, .. }));
        assert!(healed);
    }

    fn next_healed(handle: &AcceptorHandle) -> u32 {
        loop {
            match handle.events().recv_timeout(Duration::from_secs(5)).unwrap() {
                AcceptorEvent::Healed { attempts, .. } => return attempts,
                _ => continue,
            }
        }
    }

    #[test]
    fn test_heal_retries_failed_rebinds_with_capped_backoff() {
        let transport = FlakyTransport::new(0, 1).with_rebind_failures(3);
        let config = AcceptorConfig {
            heal_initial_backoff: Duration::from_millis(10),
            heal_max_backoff: Duration::from_millis(40),
            ..test_config()
        };
        let acceptor = ConnectionAcceptor::with_transport(config, Arc::new(transport.clone())).unwrap();

        let started = Instant::now();
        let handle = acceptor.start(0, EchoHandler::new).unwrap();

        // Pauses of 10, 20, 40 and (capped) 40 ms before the fourth rebind succeeds
        assert_eq!(next_healed(&handle), 4);
        assert!(started.elapsed() >= Duration::from_millis(110));
        assert_eq!(transport.binds(), 5);
        assert_eq!(handle.heals(), 1);
        assert_eq!(handle.heal_backoff(), Duration::from_millis(40));

        let mut stream = client(handle.local_addr());
        assert_eq!(&ping(&mut stream), b"PING");
        assert_eq!(handle.heal_backoff(), Duration::from_millis(10));
    }

    #[test]
    fn test_next_backoff_doubles_up_to_cap() {
        let cap = Duration::from_millis(50);
        assert_eq!(next_backoff(Duration::from_millis(10), cap), Duration::from_millis(20));
        assert_eq!(next_backoff(Duration::from_millis(20), cap), Duration::from_millis(40));
        assert_eq!(next_backoff(Duration::from_millis(40), cap), cap);
        assert_eq!(next_backoff(cap, cap), cap);
        assert_eq!(next_backoff(Duration::MAX, cap), cap);
    }

    #[test]
    fn test_spawn_failure_reported() {
        let (events_tx, events_rx) = crossbeam_channel::bounded(4);
        let shared = Arc::new(Shared::new(Duration::from_millis(10)));
        shared.active.store(1, Ordering::Relaxed);

        let accept_loop = AcceptLoop {
            addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7007),
            transport: Arc::new(SystemTransport),
            config: test_config(),
            factory: Arc::new(EchoHandler::new),
            shared: shared.clone(),
            events: events_tx,
        };

        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        accept_loop.spawn_failed(peer, io::Error::new(io::ErrorKind::OutOfMemory, "no threads left"));

        assert_eq!(shared.active.load(Ordering::Relaxed), 0);
        match events_rx.try_recv().unwrap() {
            AcceptorEvent::HandlerFailed { peer: failed, error } => {
                assert_eq!(failed, peer);
                assert!(error.contains("no threads left"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    struct FailingHandler;

    impl ConnectionHandler for FailingHandler {
        fn serve(&mut self, _conn: &mut Connection) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::InvalidData, "bad request"))
        }
    }

    struct PanickingHandler;

    impl ConnectionHandler for PanickingHandler {
        fn serve(&mut self, _conn: &mut Connection) -> io::Result<()> {
            panic!("handler exploded");
        }
    }

    fn next_failure(handle: &AcceptorHandle) -> String {
        loop {
            match handle.events().recv_timeout(Duration::from_secs(5)).unwrap() {
                AcceptorEvent::HandlerFailed { error, .. } => return error,
                _ => continue,
            }
        }
    }

    #[test]
    fn test_connection_closed_after_handler_error() {
        let acceptor = ConnectionAcceptor::with_transport(test_config(), Arc::new(SystemTransport)).unwrap();
        let handle = acceptor.start(0, || FailingHandler).unwrap();

        let mut stream = client(handle.local_addr());
        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);

        assert_eq!(next_failure(&handle), "bad request");
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let acceptor = ConnectionAcceptor::with_transport(test_config(), Arc::new(SystemTransport)).unwrap();
        let handle = acceptor.start(0, || PanickingHandler).unwrap();

        let mut first = client(handle.local_addr());
        let mut buf = [0u8; 1];
        assert_eq!(first.read(&mut buf).unwrap(), 0);
        assert_eq!(next_failure(&handle), "handler exploded");

        // Still accepting afterwards
        let _second = client(handle.local_addr());
        assert!(wait_until(|| handle.accepted() == 2));
        assert!(handle.is_running());
    }

    #[test]
    fn test_echo_until_client_closes() {
        let acceptor = ConnectionAcceptor::with_transport(test_config(), Arc::new(SystemTransport)).unwrap();
        let handle = acceptor.start(0, EchoHandler::new).unwrap();

        let mut stream = client(handle.local_addr());
        stream.write_all(b"hello world").unwrap();
        stream.shutdown(Shutdown::Write).unwrap();

        let mut echoed = Vec::new();
        stream.read_to_end(&mut echoed).unwrap();
        assert_eq!(echoed, b"hello world");

        let finished = (0..2).any(|_| {
            matches!(
                handle.events().recv_timeout(Duration::from_secs(5)),
                Ok(AcceptorEvent::HandlerFinished { .. })
            )
        });
        assert!(finished);
    }

    #[test]
    fn test_config_validation() {
        let config = AcceptorConfig {
            backlog: 0,
            ..AcceptorConfig::default()
        };
        assert!(ConnectionAcceptor::new(config).is_err());
        assert!(AcceptorConfig::default().validate().is_ok());
    }
}
