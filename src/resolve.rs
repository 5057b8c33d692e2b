//! Hostname resolution boundary.
//!
//! The lifecycle state machine resolves the configured URL to an address on
//! every connect attempt, falling back to the configured IP literal when
//! resolution fails.  Resolution itself is an external service: the driver
//! only depends on [`HostResolver`].

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};

/// DNS lookup service consumed by the socket driver.
pub trait HostResolver: Send + Sync {
    /// Resolve `host` to an IPv4 address, or `None` when unresolvable.
    fn resolve(&self, host: &str) -> Option<Ipv4Addr>;
}

/// System resolver backed by `std::net::ToSocketAddrs`.
///
/// The lookup runs on the socket's own task and may block it for one
/// connect attempt; a failed lookup just means the IP literal is used.
#[derive(Debug, Default)]
pub struct DnsResolver;

impl HostResolver for DnsResolver {
    fn resolve(&self, host: &str) -> Option<Ipv4Addr> {
        let addrs = (host, 0u16).to_socket_addrs().ok()?;
        addrs.filter_map(|a| match a {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .next()
    }
}

/// Fixed name table, used by tests and demos.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Ipv4Addr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, ip: Ipv4Addr) -> Self {
        self.entries.insert(host.to_string(), ip);
        self
    }
}

impl HostResolver for StaticResolver {
    fn resolve(&self, host: &str) -> Option<Ipv4Addr> {
        self.entries.get(host).copied()
    }
}
