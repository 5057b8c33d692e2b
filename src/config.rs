//! Static, operator-declared socket configuration.
//!
//! A [`SocketConfig`] describes one named endpoint for the whole process
//! lifetime: role, transport, target, adapter-interface pair and the
//! behaviour flag set.  Everything that changes while the socket runs lives
//! in the task-scoped runtime state instead (see [`crate::driver`]).

use crate::error::SocketError;
use crate::link::{Interface, InterfacePair};
use crate::{MAX_CLIENTS, MAX_IP_LEN, MAX_NAME_LEN, MAX_URL_LEN};

/// Fallback target URL when none is configured.
pub const DEFAULT_URL: &str = "www.ivetell.com";

/// Fallback target IP literal when the URL cannot be resolved.
pub const DEFAULT_IP: &str = "84.40.115.3";

/// Whether the socket listens or dials out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// One listening handle plus 0..max_clients accepted connections.
    Server,
    /// A single outbound connection (connection set is 0 or 1).
    Client,
}

/// Transport protocol carried by the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// TCP byte stream.
    Stream,
    /// UDP datagrams (optionally broadcast).
    Datagram,
    /// Raw IP.  Declared for completeness; rejected at validation because
    /// the platform layer has no raw-socket support.
    Raw,
}

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// Behaviour flag set, all defaulting to off.
#[derive(Debug, Clone, Default)]
pub struct SocketFlags {
    /// Withhold outbound flow until the peer completes the identification
    /// handshake (or the gate timeout expires).
    pub forced_identification: bool,
    /// Open the send gate immediately on connect when no identification is
    /// required.
    pub auto_send_enable: bool,
    /// Zero the slot's send buffer when a connection lands in it.
    pub reset_send_buffer_on_connect: bool,
    /// Synthesise a `ping_count` line after 10 s of send-side idle.
    pub keepalive_ping: bool,
    /// Collapse CRLF / LFCR pairs in received data to a single CR.
    pub fix_line_endings: bool,
    /// Set `SO_BROADCAST` on datagram endpoints.
    pub permit_broadcast: bool,
    /// Cap reads by the receive buffer's free space (read backpressure).
    pub prevent_receive_overflow: bool,
    /// Accepted for configuration compatibility; all I/O in this
    /// implementation is already non-blocking.
    pub non_blocking_connect: bool,
    /// Deny connecting while the selected interface is Ethernet.
    pub deny_ethernet: bool,
    /// Deny connecting while the selected interface is the Wi-Fi station.
    pub deny_station: bool,
    /// Deny connecting while the selected interface is the access point.
    pub deny_access_point: bool,
}

/// Static description of one managed socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Unique name used for registry lookup (≤ [`MAX_NAME_LEN`] bytes).
    pub name: String,
    pub role: Role,
    pub transport: Transport,
    pub family: AddressFamily,
    /// Bound port (server / datagram) and target port (client).
    pub port: u16,
    /// Target hostname; empty means "use the IP literal directly".
    pub url: String,
    /// Target IP literal, used when the URL is empty or unresolvable.
    pub host_ip: String,
    /// Primary/backup adapter interfaces and the priority policy.
    pub interfaces: InterfacePair,
    pub flags: SocketFlags,
    /// Upper bound on simultaneous connections for server sockets.
    pub max_clients: usize,
    /// Capacity of each slot's send buffer in bytes.
    pub send_buffer_capacity: usize,
    /// Capacity of each slot's receive buffer in bytes.
    pub recv_buffer_capacity: usize,
}

impl SocketConfig {
    /// A client-role config with defaults for everything else.
    pub fn client(name: &str, transport: Transport, port: u16) -> Self {
        Self::new(name, Role::Client, transport, port)
    }

    /// A server-role config with defaults for everything else.
    pub fn server(name: &str, transport: Transport, port: u16) -> Self {
        Self::new(name, Role::Server, transport, port)
    }

    fn new(name: &str, role: Role, transport: Transport, port: u16) -> Self {
        Self {
            name: name.to_string(),
            role,
            transport,
            family: AddressFamily::V4,
            port,
            url: String::new(),
            host_ip: DEFAULT_IP.to_string(),
            interfaces: InterfacePair {
                primary: Interface::Station,
                backup: Interface::Station,
                prefer_backup: false,
            },
            flags: SocketFlags::default(),
            max_clients: MAX_CLIENTS,
            send_buffer_capacity: 4096,
            recv_buffer_capacity: 4096,
        }
    }

    /// Check the bounded-length fields and the role/transport combination.
    ///
    /// Called once at spawn; configuration errors never affect a running
    /// socket.
    pub fn validate(&self) -> Result<(), SocketError> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(SocketError::NameTooLong(self.name.clone()));
        }
        if self.url.len() >= MAX_URL_LEN {
            return Err(SocketError::UrlTooLong(self.url.clone()));
        }
        if self.host_ip.len() >= MAX_IP_LEN {
            return Err(SocketError::IpTooLong(self.host_ip.clone()));
        }
        if self.transport == Transport::Raw {
            return Err(SocketError::UnsupportedTransport(self.transport));
        }
        if self.role == Role::Server && self.transport == Transport::Datagram {
            return Err(SocketError::UnsupportedRole(self.role, self.transport));
        }
        Ok(())
    }
}
