//! Connection Establisher
//!
//! Opens outbound TCP connections for protocol clients.
//!
//! # Flow
//!
//! ```text
//! connect(host, port)
//!   │
//!   ├─ security gate ── denied ──▶ Err(Denied)          (no socket created)
//!   │
//!   ├─ direct phase (≤ 3 attempts)
//!   │     transient error ──▶ retry
//!   │     unknown host    ──▶ proxy phase
//!   │     other error     ──▶ Err
//!   │
//!   └─ proxy phase (≤ 3 attempts, own budget) ──▶ SOCKS4 CONNECT ──▶ proxied
//! ```
//!
//! Retries run sequentially on the caller's thread. When a phase runs out of
//! attempts the last underlying error is returned unchanged.

use crate::config::ProxyConfig;
use crate::connection::{Connection, Endpoint};
use crate::error::{NetError, NetResult};
use crate::resolver::{AddressResolver, DnsResolver};
use crate::security::{AccessDecision, PermitAll, SecurityGate};
use crate::socks4::{self, SocksReply};
use crate::transport::{ByteStream, SystemTransport, Transport};
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Establisher configuration
#[derive(Debug, Clone)]
pub struct EstablisherConfig {
    /// Attempts to connect directly to the destination
    pub direct_attempts: u32,
    /// Attempts to reach the SOCKS proxy
    pub proxy_attempts: u32,
    /// Bound on each OS connect call; `None` uses the OS default
    pub connect_timeout: Option<Duration>,
    /// Bound on waiting for a SOCKS reply
    pub handshake_timeout: Option<Duration>,
}

impl Default for EstablisherConfig {
    fn default() -> Self {
        Self {
            direct_attempts: 3,
            proxy_attempts: 3,
            connect_timeout: None,
            handshake_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl EstablisherConfig {
    /// Validate configuration
    pub fn validate(&self) -> NetResult<()> {
        if self.direct_attempts == 0 {
            return Err(NetError::InvalidConfig("direct_attempts must be at least 1".into()));
        }
        if self.proxy_attempts == 0 {
            return Err(NetError::InvalidConfig("proxy_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Establisher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EstablisherStats {
    /// Connect calls issued to the transport
    pub attempts: u64,
    /// Connections established directly
    pub direct: u64,
    /// Connections established through the proxy
    pub proxied: u64,
    /// Attempts refused by the security gate
    pub denied: u64,
}

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicU64,
    direct: AtomicU64,
    proxied: AtomicU64,
    denied: AtomicU64,
}

/// Opens outbound connections, directly or through a SOCKS4 proxy
pub struct ConnectionEstablisher {
    config: EstablisherConfig,
    proxy: ProxyConfig,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn AddressResolver>,
    gate: Arc<dyn SecurityGate>,
    counters: Counters,
}

impl ConnectionEstablisher {
    /// Create an establisher that permits every destination
    pub fn new(
        proxy: ProxyConfig,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        Self {
            config: EstablisherConfig::default(),
            proxy,
            transport,
            resolver,
            gate: Arc::new(PermitAll),
            counters: Counters::default(),
        }
    }

    /// Create with OS sockets and DNS per the proxy settings
    pub fn system(proxy: ProxyConfig) -> NetResult<Self> {
        proxy.validate()?;
        let resolver = DnsResolver::from_proxy_config(&proxy)?;

        if let Some(url) = proxy.proxy_url() {
            info!("Connection establisher using SOCKS proxy {}", url);
        }

        Ok(Self::new(proxy, Arc::new(SystemTransport::new()), Arc::new(resolver)))
    }

    /// Replace the security gate
    pub fn with_gate(mut self, gate: Arc<dyn SecurityGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: EstablisherConfig) -> NetResult<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn proxy_config(&self) -> &ProxyConfig {
        &self.proxy
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> EstablisherStats {
        EstablisherStats {
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            direct: self.counters.direct.load(Ordering::Relaxed),
            proxied: self.counters.proxied.load(Ordering::Relaxed),
            denied: self.counters.denied.load(Ordering::Relaxed),
        }
    }

    /// Connect to `host:port`, retrying and falling back to the proxy.
    pub fn connect(&self, host: &str, port: u16) -> NetResult<Connection> {
        self.check_access(host, port)?;

        let mut resolved = None;
        let direct_error = match self.connect_direct(host, port, &mut resolved) {
            Ok(conn) => return Ok(conn),
            Err(e) if e.is_transient() || e.is_unknown_host() => e,
            Err(e) => return Err(e),
        };

        let Some(proxy) = self.proxy.proxy_addr() else {
            debug!("Direct connect to {}:{} failed, no proxy configured", host, port);
            return Err(direct_error);
        };

        info!(
            "Direct connect to {}:{} failed ({}), trying SOCKS proxy {}",
            host, port, direct_error, proxy
        );

        let mut stream = self.connect_proxy(proxy)?;

        // The proxy resolves names we could not (SOCKS4A)
        let request = match resolved {
            Some(addr) => socks4::encode_connect(&self.proxy.user_id, addr, port),
            None => socks4::encode_connect_by_name(&self.proxy.user_id, host, port),
        };
        let reply = self.handshake(&mut *stream, &request)?;

        debug!("SOCKS CONNECT to {}:{} granted ({})", host, port, reply.socket_addr());
        self.counters.proxied.fetch_add(1, Ordering::Relaxed);
        Ok(Connection::new(stream, Endpoint::new(host, port), true))
    }

    /// Connect once to an already resolved address.
    ///
    /// Only the security check precedes the connect; there are no retries and
    /// no proxy fallback.
    pub fn connect_resolved(&self, addr: Ipv4Addr, port: u16) -> NetResult<Connection> {
        let host = addr.to_string();
        self.check_access(&host, port)?;

        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        let mut socket = self.transport.create_socket()?;
        socket
            .connect(SocketAddrV4::new(addr, port), self.config.connect_timeout)
            .map_err(NetError::from_connect)?;

        self.counters.direct.fetch_add(1, Ordering::Relaxed);
        Ok(Connection::new(socket.into_stream(), Endpoint::new(host, port), false))
    }

    /// Ask the proxy to listen for a connection from `remote:remote_port`.
    ///
    /// Used for passive transfers behind a firewall: hand
    /// [`ProxyBinding::listen_addr`] to the remote peer, then call
    /// [`ProxyBinding::accept`].
    pub fn bind_via_proxy(&self, remote: Ipv4Addr, remote_port: u16) -> NetResult<ProxyBinding> {
        self.check_access(&remote.to_string(), remote_port)?;

        let proxy = self.proxy.proxy_addr().ok_or(NetError::ProxyNotConfigured)?;
        let mut stream = self.connect_proxy(proxy)?;

        let request = socks4::encode_bind(&self.proxy.user_id, remote, remote_port);
        let reply = self.handshake(&mut *stream, &request)?;
        let listen_addr = reply.resolve_against(*proxy.ip());

        info!("SOCKS proxy listening on {} for {}:{}", listen_addr, remote, remote_port);
        Ok(ProxyBinding {
            conn: Connection::new(stream, Endpoint::new(remote.to_string(), remote_port), false),
            listen_addr,
        })
    }

    fn check_access(&self, host: &str, port: u16) -> NetResult<()> {
        match self.gate.verify_access(host, port) {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny(principal) => {
                self.counters.denied.fetch_add(1, Ordering::Relaxed);
                self.gate.report_violation(&format!(
                    "connection to {}:{} denied for {}",
                    host, port, principal
                ));
                Err(NetError::Denied { principal })
            }
        }
    }

    fn connect_direct(
        &self,
        host: &str,
        port: u16,
        resolved: &mut Option<Ipv4Addr>,
    ) -> NetResult<Connection> {
        let budget = self.config.direct_attempts;
        let mut attempt = 1;

        loop {
            match self.try_direct(host, port, resolved) {
                Ok(conn) => {
                    self.counters.direct.fetch_add(1, Ordering::Relaxed);
                    debug!("Connected to {}:{} (attempt {}/{})", host, port, attempt, budget);
                    return Ok(conn);
                }
                Err(e) if e.is_transient() && attempt < budget => {
                    debug!(
                        "Connect to {}:{} attempt {}/{} failed: {}",
                        host, port, attempt, budget, e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_direct(
        &self,
        host: &str,
        port: u16,
        resolved: &mut Option<Ipv4Addr>,
    ) -> NetResult<Connection> {
        let mut socket = self.transport.create_socket()?;

        // An unknown host drops (closes) the fresh socket here
        let addr = self.resolver.resolve(host)?;
        *resolved = Some(addr);

        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        socket
            .connect(SocketAddrV4::new(addr, port), self.config.connect_timeout)
            .map_err(NetError::from_connect)?;

        Ok(Connection::new(socket.into_stream(), Endpoint::new(host, port), false))
    }

    fn connect_proxy(&self, proxy: SocketAddrV4) -> NetResult<Box<dyn ByteStream>> {
        let budget = self.config.proxy_attempts;
        let mut attempt = 1;

        loop {
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            let mut socket = self.transport.create_socket()?;

            match socket.connect(proxy, self.config.connect_timeout).map_err(NetError::from_connect) {
                Ok(()) => return Ok(socket.into_stream()),
                Err(e) if e.is_transient() && attempt < budget => {
                    debug!("Proxy connect attempt {}/{} failed: {}", attempt, budget, e);
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Cannot reach SOCKS proxy {}: {}", proxy, e);
                    return Err(e);
                }
            }
        }
    }

    fn handshake(&self, stream: &mut dyn ByteStream, request: &[u8]) -> NetResult<SocksReply> {
        stream.set_read_timeout(self.config.handshake_timeout)?;
        stream.write_all(request)?;
        stream.flush()?;

        let reply = socks4::read_reply(stream)?;
        stream.set_read_timeout(None)?;
        Ok(reply)
    }
}

/// A pending SOCKS4 BIND: the proxy is listening for the remote peer.
#[derive(Debug)]
pub struct ProxyBinding {
    conn: Connection,
    listen_addr: SocketAddrV4,
}

impl ProxyBinding {
    /// Where the remote peer must connect to
    pub fn listen_addr(&self) -> SocketAddrV4 {
        self.listen_addr
    }

    /// Block until the proxy reports the remote peer connected
    pub fn accept(mut self) -> NetResult<Connection> {
        let reply = socks4::accept_notification(&mut self.conn)?;
        self.conn
            .mark_proxied(Endpoint::new(reply.address.to_string(), reply.port));
        Ok(self.conn)
    }
}
