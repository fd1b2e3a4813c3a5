//! OS Socket Transport
//!
//! The narrow seam between this crate and the operating system's blocking
//! socket calls. Everything above it (retry policy, SOCKS handshakes, the
//! acceptor loop) only sees these traits, so tests can substitute a fake
//! transport that scripts failures and records calls.
//!
//! `SystemTransport` is the only real implementation, built on `socket2` so
//! that socket creation, `bind`, `listen(backlog)` and `connect` stay separate
//! steps as they are at the syscall level.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, SocketAddrV4, TcpStream};
use std::time::Duration;
use tracing::trace;

/// A connected, bidirectional byte stream
pub trait ByteStream: Read + Write + Send {
    /// Shut down both directions
    fn shutdown(&self) -> io::Result<()>;

    /// Bound blocking reads; `None` blocks forever
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl ByteStream for TcpStream {
    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// A freshly created, not yet connected socket descriptor.
///
/// Dropping it closes the descriptor.
pub trait RawSocket: Send {
    /// Connect to `addr`, blocking the caller
    fn connect(&mut self, addr: SocketAddrV4, timeout: Option<Duration>) -> io::Result<()>;

    /// Turn a connected socket into a byte stream
    fn into_stream(self: Box<Self>) -> Box<dyn ByteStream>;
}

/// A bound socket that accepts connections once listening.
///
/// Dropping it closes the descriptor.
pub trait Listener: Send {
    /// Address actually bound
    fn local_addr(&self) -> io::Result<SocketAddrV4>;

    /// Start listening with the given backlog
    fn listen(&self, backlog: i32) -> io::Result<()>;

    /// Block until a connection arrives
    fn accept(&self) -> io::Result<(Box<dyn ByteStream>, SocketAddr)>;
}

/// Factory for OS sockets
pub trait Transport: Send + Sync {
    /// Create a new stream socket descriptor
    fn create_socket(&self) -> io::Result<Box<dyn RawSocket>>;

    /// Create a socket bound to `addr` (not yet listening)
    fn bind(&self, addr: SocketAddrV4) -> io::Result<Box<dyn Listener>>;
}

/// Blocking TCP/IPv4 sockets from the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTransport;

impl SystemTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for SystemTransport {
    fn create_socket(&self) -> io::Result<Box<dyn RawSocket>> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        Ok(Box::new(SystemSocket(socket)))
    }

    fn bind(&self, addr: SocketAddrV4) -> io::Result<Box<dyn Listener>> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        // Rebinding the same port after a heal must not wait out TIME_WAIT
        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(SocketAddr::V4(addr)))?;
        trace!("Bound socket to {}", addr);
        Ok(Box::new(SystemListener(socket)))
    }
}

struct SystemSocket(Socket);

impl RawSocket for SystemSocket {
    fn connect(&mut self, addr: SocketAddrV4, timeout: Option<Duration>) -> io::Result<()> {
        let addr = SockAddr::from(SocketAddr::V4(addr));
        match timeout {
            Some(timeout) => self.0.connect_timeout(&addr, timeout),
            None => self.0.connect(&addr),
        }
    }

    fn into_stream(self: Box<Self>) -> Box<dyn ByteStream> {
        Box::new(TcpStream::from(self.0))
    }
}

struct SystemListener(Socket);

impl Listener for SystemListener {
    fn local_addr(&self) -> io::Result<SocketAddrV4> {
        self.0
            .local_addr()?
            .as_socket_ipv4()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "listener is not IPv4"))
    }

    fn listen(&self, backlog: i32) -> io::Result<()> {
        self.0.listen(backlog)
    }

    fn accept(&self) -> io::Result<(Box<dyn ByteStream>, SocketAddr)> {
        let (socket, addr) = self.0.accept()?;
        let peer = addr
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "peer is not an IP address"))?;
        Ok((Box::new(TcpStream::from(socket)), peer))
    }
}
