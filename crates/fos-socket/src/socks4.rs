//! SOCKS4 Client Protocol
//!
//! Frame encoding and reply decoding for SOCKS4 (and the SOCKS4A host-name
//! extension used when the client cannot resolve the destination itself).
//!
//! ```text
//! request: | VN=4 | CD | DSTPORT (2) | DSTIP (4) | USERID ... | 0x00 | [HOST ... | 0x00]
//! reply:   | VN=0 | CD | DSTPORT (2) | DSTIP (4) |
//! ```
//!
//! A BIND request receives two replies: the first carries the address the
//! proxy listens on, the second arrives once the remote peer has connected.

use crate::error::{NetError, NetResult};
use std::fmt;
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, trace};

/// SOCKS protocol version sent in requests
pub const SOCKS_VERSION: u8 = 4;

/// Length of every SOCKS4 reply frame
pub const REPLY_LEN: usize = 8;

/// SOCKS4 commands
const CMD_CONNECT: u8 = 1;
const CMD_BIND: u8 = 2;

/// SOCKS4 reply codes
const REPLY_GRANTED: u8 = 90;
const REPLY_REJECTED: u8 = 91;
const REPLY_NO_IDENTD: u8 = 92;
const REPLY_IDENTD_MISMATCH: u8 = 93;

/// Destination address signalling that a host name follows the user id
const SOCKS4A_MARKER: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 1);

/// SOCKS4 request command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Open an outbound connection on the client's behalf
    Connect,
    /// Listen on the proxy for a connection back from a remote peer
    Bind,
}

impl Command {
    fn code(self) -> u8 {
        match self {
            Command::Connect => CMD_CONNECT,
            Command::Bind => CMD_BIND,
        }
    }
}

/// A SOCKS4 request frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksRequest {
    pub command: Command,
    pub port: u16,
    pub address: Ipv4Addr,
    pub user_id: String,
    /// Destination name for SOCKS4A; `address` is the marker when set
    pub host: Option<String>,
}

impl SocksRequest {
    /// Serialize to wire format
    pub fn encode(&self) -> Vec<u8> {
        let host_len = self.host.as_ref().map_or(0, |h| h.len() + 1);
        let mut frame = Vec::with_capacity(9 + self.user_id.len() + host_len);

        frame.push(SOCKS_VERSION);
        frame.push(self.command.code());
        frame.extend_from_slice(&self.port.to_be_bytes());
        frame.extend_from_slice(&self.address.octets());
        frame.extend_from_slice(self.user_id.as_bytes());
        frame.push(0x00);

        if let Some(host) = &self.host {
            frame.extend_from_slice(host.as_bytes());
            frame.push(0x00);
        }

        frame
    }
}

/// Encode a CONNECT request for an already resolved destination.
pub fn encode_connect(user_id: &str, dest: Ipv4Addr, port: u16) -> Vec<u8> {
    SocksRequest {
        command: Command::Connect,
        port,
        address: dest,
        user_id: user_id.to_string(),
        host: None,
    }
    .encode()
}

/// Encode a SOCKS4A CONNECT request; the proxy resolves `host`.
pub fn encode_connect_by_name(user_id: &str, host: &str, port: u16) -> Vec<u8> {
    SocksRequest {
        command: Command::Connect,
        port,
        address: SOCKS4A_MARKER,
        user_id: user_id.to_string(),
        host: Some(host.to_string()),
    }
    .encode()
}

/// Encode a BIND request naming the remote peer that will connect in.
pub fn encode_bind(user_id: &str, remote: Ipv4Addr, remote_port: u16) -> Vec<u8> {
    SocksRequest {
        command: Command::Bind,
        port: remote_port,
        address: remote,
        user_id: user_id.to_string(),
        host: None,
    }
    .encode()
}

/// Status byte of a SOCKS4 reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Granted,
    Rejected,
    IdentdUnreachable,
    IdentdMismatch,
    Other(u8),
}

impl ReplyStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            REPLY_GRANTED => Self::Granted,
            REPLY_REJECTED => Self::Rejected,
            REPLY_NO_IDENTD => Self::IdentdUnreachable,
            REPLY_IDENTD_MISMATCH => Self::IdentdMismatch,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Granted => REPLY_GRANTED,
            Self::Rejected => REPLY_REJECTED,
            Self::IdentdUnreachable => REPLY_NO_IDENTD,
            Self::IdentdMismatch => REPLY_IDENTD_MISMATCH,
            Self::Other(code) => code,
        }
    }

    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "Request granted."),
            Self::Rejected => write!(f, "Call Failed."),
            Self::IdentdUnreachable => write!(f, "Failed to connect to identd on client."),
            Self::IdentdMismatch => write!(f, "Identd reported different user id."),
            Self::Other(code) => write!(f, "SOCKS Error {}", code),
        }
    }
}

/// A decoded SOCKS4 reply frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocksReply {
    pub version: u8,
    pub status: ReplyStatus,
    pub port: u16,
    pub address: Ipv4Addr,
}

impl SocksReply {
    /// Address and port carried by the reply
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }

    /// Address carried by the reply; `0.0.0.0` stands for the proxy itself.
    pub fn resolve_against(&self, proxy: Ipv4Addr) -> SocketAddrV4 {
        let address = if self.address.is_unspecified() {
            proxy
        } else {
            self.address
        };
        SocketAddrV4::new(address, self.port)
    }
}

/// Decode a reply frame, failing on any non-success status.
///
/// Proxies disagree on the version byte (0 or 4), so it is not checked.
pub fn decode_reply(bytes: &[u8]) -> NetResult<SocksReply> {
    if bytes.len() < REPLY_LEN {
        return Err(NetError::ConnectionTimedOut);
    }

    let reply = SocksReply {
        version: bytes[0],
        status: ReplyStatus::from_code(bytes[1]),
        port: u16::from_be_bytes([bytes[2], bytes[3]]),
        address: Ipv4Addr::new(bytes[4], bytes[5], bytes[6], bytes[7]),
    };

    if !reply.status.is_granted() {
        debug!("SOCKS request refused: {}", reply.status);
        return Err(NetError::Socks(reply.status));
    }

    trace!("SOCKS reply granted ({})", reply.socket_addr());
    Ok(reply)
}

/// Read and decode one reply frame from `reader`.
///
/// A stream that ends or times out before eight bytes arrive is reported as
/// `ConnectionTimedOut`.
pub fn read_reply<R: Read + ?Sized>(reader: &mut R) -> NetResult<SocksReply> {
    let mut buf = [0u8; REPLY_LEN];
    let mut filled = 0;

    while filled < REPLY_LEN {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                return Err(NetError::ConnectionTimedOut);
            }
            Err(e) => return Err(NetError::Io(e)),
        }
    }

    decode_reply(&buf[..filled])
}

/// Read the second BIND reply, sent once the remote peer connects in.
pub fn accept_notification<R: Read + ?Sized>(reader: &mut R) -> NetResult<SocksReply> {
    let reply = read_reply(reader)?;
    debug!("SOCKS BIND peer connected from {}", reply.socket_addr());
    Ok(reply)
}
