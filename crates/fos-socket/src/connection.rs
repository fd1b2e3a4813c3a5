//! Connections handed to protocol clients and handlers.

use crate::transport::ByteStream;
use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::trace;

/// Host/port pair; a `None` host means any local interface
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: Option<String>,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port,
        }
    }

    /// Any local interface on `port`
    pub fn any(port: u16) -> Self {
        Self { host: None, port }
    }

    pub fn is_any(&self) -> bool {
        self.host.is_none()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}:{}", host, self.port),
            None => write!(f, "*:{}", self.port),
        }
    }
}

/// An established byte connection.
///
/// Reads and writes go straight to the underlying socket. After [`close`]
/// the connection is dead for good: I/O fails with `NotConnected` and
/// further `close` calls do nothing.
///
/// [`close`]: Connection::close
pub struct Connection {
    stream: Option<Box<dyn ByteStream>>,
    peer: Endpoint,
    proxied: bool,
}

impl Connection {
    pub(crate) fn new(stream: Box<dyn ByteStream>, peer: Endpoint, proxied: bool) -> Self {
        Self {
            stream: Some(stream),
            peer,
            proxied,
        }
    }

    /// The remote end as requested by the caller
    pub fn peer(&self) -> &Endpoint {
        &self.peer
    }

    /// Whether traffic flows through the SOCKS proxy
    pub fn is_proxied(&self) -> bool {
        self.proxied
    }

    pub(crate) fn mark_proxied(&mut self, peer: Endpoint) {
        self.proxied = true;
        self.peer = peer;
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Bound blocking reads on the connection
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match &self.stream {
            Some(stream) => stream.set_read_timeout(timeout),
            None => Err(not_connected()),
        }
    }

    /// Close the connection. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // The peer may already have gone away
            let _ = stream.shutdown();
            trace!("Closed connection to {}", self.peer);
        }
    }

    fn stream_mut(&mut self) -> io::Result<&mut Box<dyn ByteStream>> {
        self.stream.as_mut().ok_or_else(not_connected)
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream_mut()?.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream_mut()?.flush()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("proxied", &self.proxied)
            .field("open", &self.is_open())
            .finish()
    }
}
