//! Proxy Configuration
//!
//! The SOCKS proxy settings used by the connection establisher.
//!
//! A `ProxyConfig` is a plain value: build it once at startup and hand it to
//! the [`ConnectionEstablisher`](crate::ConnectionEstablisher). Reading the
//! environment is done by [`ProxyEnv`], which parses exactly once no matter
//! how many threads ask for the configuration at the same time.
//!
//! # Environment
//!
//! | Variable     | Meaning                              | Default  |
//! |--------------|--------------------------------------|----------|
//! | `SOCKS_HOST` | proxy host (IPv4 literal or name)    | unset    |
//! | `SOCKS_PORT` | proxy port                           | `1080`   |
//! | `SOCKS_NS`   | name server for host lookups (IPv4)  | unset    |
//! | `SOCKS_DN`   | default domain for host lookups      | unset    |
//! | `USER`       | SOCKS4 user id                       | `NOBODY` |

use crate::error::{NetError, NetResult};
use crate::resolver::{AddressResolver, DnsResolver};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Default SOCKS port
pub const DEFAULT_SOCKS_PORT: u16 = 1080;

/// User id sent when `USER` is not set
pub const DEFAULT_USER_ID: &str = "NOBODY";

/// SOCKS proxy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy address; `None` means connections are never proxied
    pub host: Option<Ipv4Addr>,
    /// Proxy port
    pub port: u16,
    /// Name server that host lookups are redirected to
    pub name_server: Option<Ipv4Addr>,
    /// Default domain appended to unqualified host names
    pub domain: Option<String>,
    /// User id carried in SOCKS4 requests
    pub user_id: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_SOCKS_PORT,
            name_server: None,
            domain: None,
            user_id: DEFAULT_USER_ID.to_string(),
        }
    }
}

impl ProxyConfig {
    /// Configuration without a proxy
    pub fn direct() -> Self {
        Self::default()
    }

    /// Configuration routing through a SOCKS4 proxy
    pub fn socks(host: Ipv4Addr, port: u16) -> Self {
        Self {
            host: Some(host),
            port,
            ..Self::default()
        }
    }

    /// Set the SOCKS4 user id
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Whether a proxy is configured
    pub fn is_configured(&self) -> bool {
        self.host.is_some()
    }

    /// Socket address of the proxy, if configured
    pub fn proxy_addr(&self) -> Option<SocketAddrV4> {
        self.host.map(|host| SocketAddrV4::new(host, self.port))
    }

    /// Proxy URL for display
    pub fn proxy_url(&self) -> Option<String> {
        self.proxy_addr().map(|addr| format!("socks4://{}", addr))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_some() && self.port == 0 {
            return Err(ConfigError::InvalidPort("0".to_string()));
        }
        if self.user_id.as_bytes().contains(&0) {
            return Err(ConfigError::InvalidUserId);
        }
        Ok(())
    }

    /// Parse the configuration from the process environment.
    ///
    /// Every call re-reads the environment; use [`ProxyEnv`] or
    /// [`ProxyConfig::global`] for the parse-once behaviour.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse the configuration from an arbitrary variable lookup.
    ///
    /// A `SOCKS_HOST` name is resolved through [`DnsResolver`], redirected to
    /// `SOCKS_NS` and `SOCKS_DN` when those are set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_lookup_resolving(lookup, |name_server, domain| {
            let resolver = match name_server {
                Some(ns) => DnsResolver::with_name_server(ns, domain)?,
                None => DnsResolver::from_system_conf()?,
            };
            Ok(Box::new(resolver))
        })
    }

    /// Like [`from_lookup`](Self::from_lookup), with the proxy host resolver
    /// built by `make_resolver` from the name server and domain settings.
    pub(crate) fn from_lookup_resolving<F, R>(lookup: F, make_resolver: R) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        R: FnOnce(Option<Ipv4Addr>, Option<&str>) -> NetResult<Box<dyn AddressResolver>>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let name_server = var("SOCKS_NS")
            .map(|ns| ns.parse::<Ipv4Addr>().map_err(|_| ConfigError::InvalidNameServer(ns)))
            .transpose()?;
        let domain = var("SOCKS_DN");

        let host = var("SOCKS_HOST")
            .map(|h| resolve_proxy_host(&h, || make_resolver(name_server, domain.as_deref())))
            .transpose()?;

        let port = match var("SOCKS_PORT") {
            Some(raw) => match raw.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => return Err(ConfigError::InvalidPort(raw)),
            },
            None => DEFAULT_SOCKS_PORT,
        };

        let config = Self {
            host,
            port,
            name_server,
            domain,
            user_id: var("USER").unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
        };
        config.validate()?;

        match config.proxy_addr() {
            Some(addr) => info!("SOCKS proxy configured: {} (user {})", addr, config.user_id),
            None => debug!("No SOCKS proxy configured"),
        }

        Ok(config)
    }

    /// The process-wide configuration, parsed from the environment on first use.
    pub fn global() -> Result<&'static ProxyConfig, ConfigError> {
        static GLOBAL: OnceLock<ProxyEnv> = OnceLock::new();
        GLOBAL.get_or_init(ProxyEnv::system).get()
    }
}

fn resolve_proxy_host<R>(host: &str, make_resolver: R) -> Result<Ipv4Addr, ConfigError>
where
    R: FnOnce() -> NetResult<Box<dyn AddressResolver>>,
{
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(addr);
    }

    let unresolvable = |e: NetError| {
        warn!("Cannot resolve SOCKS_HOST {}: {}", host, e);
        ConfigError::UnresolvableHost(host.to_string())
    };
    make_resolver().map_err(unresolvable)?.resolve(host).map_err(unresolvable)
}

/// Lazily parses the proxy configuration from an environment exactly once.
///
/// Concurrent first callers block until the single parse finishes; all of
/// them observe the same result afterwards, including a parse failure.
pub struct ProxyEnv {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
    cell: OnceLock<Result<ProxyConfig, ConfigError>>,
}

impl ProxyEnv {
    /// Create over a custom variable lookup
    pub fn new<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
            cell: OnceLock::new(),
        }
    }

    /// Create over the real process environment
    pub fn system() -> Self {
        Self::new(|key| std::env::var(key).ok())
    }

    /// Get the configuration, parsing on first use
    pub fn get(&self) -> Result<&ProxyConfig, ConfigError> {
        self.cell
            .get_or_init(|| {
                let parsed = ProxyConfig::from_lookup(|key| (self.lookup)(key));
                if let Err(e) = &parsed {
                    warn!("Rejecting proxy configuration: {}", e);
                }
                parsed
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Whether the environment has been parsed yet
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid SOCKS_PORT: {0:?}")]
    InvalidPort(String),

    #[error("Cannot resolve SOCKS_HOST: {0}")]
    UnresolvableHost(String),

    #[error("Invalid SOCKS_NS (expected IPv4 address): {0:?}")]
    InvalidNameServer(String),

    #[error("User id must not contain NUL bytes")]
    InvalidUserId,
}
