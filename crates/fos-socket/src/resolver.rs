//! Host Name Resolution
//!
//! Resolution is a collaborator of the establisher, not part of it. The
//! default [`DnsResolver`] wraps hickory's blocking resolver and can be
//! redirected to the name server and domain named in the proxy settings.

use crate::config::ProxyConfig;
use crate::error::{NetError, NetResult};
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::{Name, Resolver};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, info};

/// DNS port used when redirecting lookups to a configured name server
const DNS_PORT: u16 = 53;

/// Maps host names to IPv4 addresses
pub trait AddressResolver: Send + Sync {
    /// Resolve `host`; fails with [`NetError::UnknownHost`] if it has no address
    fn resolve(&self, host: &str) -> NetResult<Ipv4Addr>;
}

/// Blocking DNS resolver
pub struct DnsResolver {
    resolver: Resolver,
}

impl DnsResolver {
    /// Use the system's resolver configuration
    pub fn from_system_conf() -> NetResult<Self> {
        let resolver = Resolver::from_system_conf()?;
        info!("DNS resolver initialized from system configuration");
        Ok(Self { resolver })
    }

    /// Send every lookup to `name_server`, qualifying bare names with `domain`
    pub fn with_name_server(name_server: Ipv4Addr, domain: Option<&str>) -> NetResult<Self> {
        let domain = domain
            .map(|d| {
                Name::from_ascii(d)
                    .map_err(|e| NetError::InvalidConfig(format!("bad domain {:?}: {}", d, e)))
            })
            .transpose()?;

        let search = domain.iter().cloned().collect();
        let servers = NameServerConfigGroup::from_ips_clear(&[IpAddr::V4(name_server)], DNS_PORT, true);
        let config = ResolverConfig::from_parts(domain, search, servers);

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);

        let resolver = Resolver::new(config, opts)?;
        info!("DNS resolver redirected to name server {}", name_server);
        Ok(Self { resolver })
    }

    /// Pick the configuration implied by the proxy settings
    pub fn from_proxy_config(config: &ProxyConfig) -> NetResult<Self> {
        match config.name_server {
            Some(ns) => Self::with_name_server(ns, config.domain.as_deref()),
            None => Self::from_system_conf(),
        }
    }
}

impl AddressResolver for DnsResolver {
    fn resolve(&self, host: &str) -> NetResult<Ipv4Addr> {
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            return Ok(addr);
        }

        debug!("DNS lookup for: {}", host);
        let lookup = self.resolver.lookup_ip(host).map_err(|e| {
            debug!("DNS lookup for {} failed: {}", host, e);
            NetError::UnknownHost(host.to_string())
        })?;

        lookup
            .iter()
            .find_map(|ip| match ip {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(v6) => v6.to_ipv4_mapped(),
            })
            .ok_or_else(|| NetError::UnknownHost(host.to_string()))
    }
}
