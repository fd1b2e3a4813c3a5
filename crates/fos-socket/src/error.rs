//! Error types for the socket layer.

use crate::config::ConfigError;
use crate::socks4::ReplyStatus;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Result alias used throughout the crate
pub type NetResult<T> = Result<T, NetError>;

/// Socket layer errors
#[derive(Debug, Error)]
pub enum NetError {
    #[error("Connection denied: security violation by {principal}")]
    Denied { principal: String },

    #[error("Transient protocol error: {0}")]
    TransientProtocol(#[source] io::Error),

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Socks(ReplyStatus),

    #[error("Connection timed out")]
    ConnectionTimedOut,

    #[error("No SOCKS proxy configured")]
    ProxyNotConfigured,

    #[error("Failed to bind {addr} after {attempts} attempts: {source}")]
    Bind {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NetError {
    /// Classify an I/O error raised while connecting.
    ///
    /// Interrupted calls, resets, aborts and `EPROTO` are protocol-level
    /// hiccups worth retrying; anything else is fatal for the attempt.
    pub fn from_connect(err: io::Error) -> Self {
        if is_transient(&err) {
            NetError::TransientProtocol(err)
        } else {
            NetError::Io(err)
        }
    }

    /// Whether this error is retried within a phase budget
    pub fn is_transient(&self) -> bool {
        matches!(self, NetError::TransientProtocol(_))
    }

    /// Whether this error sends the establisher to the proxy phase
    pub fn is_unknown_host(&self) -> bool {
        matches!(self, NetError::UnknownHost(_))
    }
}

fn is_transient(err: &io::Error) -> bool {
    is_protocol_error(err)
        || matches!(
            err.kind(),
            io::ErrorKind::Interrupted
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
        )
}

#[cfg(unix)]
fn is_protocol_error(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EPROTO)
}

#[cfg(not(unix))]
fn is_protocol_error(_err: &io::Error) -> bool {
    false
}
