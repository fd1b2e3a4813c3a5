//! fOS Socket Layer
//!
//! Blocking TCP connection establishment and acceptance with optional
//! SOCKS4 proxy traversal.
//!
//! Architecture:
//! 1. Outbound attempt → security gate check (no socket on deny)
//! 2. Direct phase → bounded retries, unknown host short-circuits
//! 3. Proxy phase → SOCKS4/4A handshake over a fresh socket per attempt
//! 4. Inbound → bind with retry, thread per connection, self-healing listener

mod acceptor;
mod config;
mod connection;
mod error;
mod establisher;
mod resolver;
mod security;
mod transport;

pub mod socks4;

#[cfg(test)]
mod testing;

pub use acceptor::{
    AcceptorConfig, AcceptorEvent, AcceptorHandle, AcceptorState, ConnectionAcceptor,
    ConnectionHandler, EchoHandler, HandlerFactory,
};
pub use config::{ConfigError, ProxyConfig, ProxyEnv, DEFAULT_SOCKS_PORT, DEFAULT_USER_ID};
pub use connection::{Connection, Endpoint};
pub use error::{NetError, NetResult};
pub use establisher::{ConnectionEstablisher, EstablisherConfig, EstablisherStats, ProxyBinding};
pub use resolver::{AddressResolver, DnsResolver};
pub use security::{AccessDecision, HostFilter, PermitAll, SecurityGate};
pub use socks4::{Command, ReplyStatus, SocksReply, SocksRequest};
pub use transport::{ByteStream, Listener, RawSocket, SystemTransport, Transport};
