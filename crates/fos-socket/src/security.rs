//! Connection Security Gate
//!
//! Every outbound attempt is authorized before a socket exists. A denied
//! attempt never reaches the transport, so nothing leaks to the network,
//! not even a DNS lookup.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    /// Denied; carries the principal that the attempt would violate
    Deny(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Authorizes connection attempts
pub trait SecurityGate: Send + Sync {
    /// Decide whether `host:port` may be contacted
    fn verify_access(&self, host: &str, port: u16) -> AccessDecision;

    /// Record a violation. Called once per denied attempt.
    fn report_violation(&self, message: &str) {
        warn!("Security violation: {}", message);
    }
}

/// Gate that allows everything
#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAll;

impl SecurityGate for PermitAll {
    fn verify_access(&self, _host: &str, _port: u16) -> AccessDecision {
        AccessDecision::Allow
    }
}

/// Gate denying a set of domains (and their subdomains) and ports.
pub struct HostFilter {
    domains: RwLock<HashSet<String>>,
    ports: RwLock<HashSet<u16>>,
    violations: AtomicU64,
}

impl HostFilter {
    pub fn new() -> Self {
        Self {
            domains: RwLock::new(HashSet::new()),
            ports: RwLock::new(HashSet::new()),
            violations: AtomicU64::new(0),
        }
    }

    /// Deny a domain and everything below it
    pub fn block_domain(&self, domain: &str) {
        let normalized = domain.trim_end_matches('.').to_lowercase();
        self.domains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalized);
    }

    /// Deny a destination port on every host
    pub fn block_port(&self, port: u16) {
        self.ports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port);
    }

    /// Number of violations reported so far
    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    fn blocked_domain(&self, host: &str) -> Option<String> {
        let host = host.trim_end_matches('.').to_lowercase();
        // A writer that panicked mid-update must not turn the filter off
        let domains = self.domains.read().unwrap_or_else(PoisonError::into_inner);

        // Walk "a.b.c" -> "b.c" -> "c"
        let mut candidate = host.as_str();
        loop {
            if domains.contains(candidate) {
                return Some(candidate.to_string());
            }
            match candidate.split_once('.') {
                Some((_, parent)) => candidate = parent,
                None => return None,
            }
        }
    }
}

impl Default for HostFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityGate for HostFilter {
    fn verify_access(&self, host: &str, port: u16) -> AccessDecision {
        if let Some(domain) = self.blocked_domain(host) {
            debug!("Host filter denies {} (rule {})", host, domain);
            return AccessDecision::Deny(format!("host-filter:{}", domain));
        }

        let port_blocked = self
            .ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&port);
        if port_blocked {
            debug!("Host filter denies port {} on {}", port, host);
            return AccessDecision::Deny(format!("host-filter:port/{}", port));
        }

        AccessDecision::Allow
    }

    fn report_violation(&self, message: &str) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        warn!("Security violation: {}", message);
    }
}
