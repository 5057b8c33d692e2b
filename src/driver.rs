//! Per-socket execution context: lifecycle state machine and admin handle.
//!
//! Each spawned socket runs one cooperative task that loops once per tick:
//!
//! ```text
//!  apply commands ─▶ select interface ─▶ execute disconnect request
//!        ─▶ connect-deny policy ─▶ pump / accept  (connected)
//!                                  create / bind / connect / listen  (not)
//!        ─▶ sleep one tick
//! ```
//!
//! The administrative surface talks to the task through a [`Command`]
//! channel owned by [`SocketHandle`]; commands are drained at the tick
//! boundary, never applied mid-operation.  Stopping is
//! [`SocketDriver::shutdown`], which consumes the driver and awaits the
//! task — a restart therefore cannot overlap the old context.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::config::{AddressFamily, Role, SocketConfig, Transport};
use crate::connection::{Connection, ConnectionSet, Endpoint, PingState};
use crate::error::SocketError;
use crate::events::{ConnectionLink, SocketEvents};
use crate::identify::GateState;
use crate::link::{select_interface, Interface, LinkOracle};
use crate::pump::{self, PumpContext, Verdict};
use crate::registry::SocketRegistry;
use crate::resolve::HostResolver;
use crate::{CONNECT_TIMEOUT, MAX_IP_LEN, MAX_URL_LEN, RECONNECT_DELAY, TICK_INTERVAL};

/// Listen backlog for server sockets.
const LISTEN_BACKLOG: u32 = 1;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Admin commands applied by the owning task at the next tick boundary.
#[derive(Debug, Clone)]
pub enum Command {
    /// Tear the active session down; reconnect follows automatically.
    Disconnect,
    /// Replace the target URL (empty clears it) and reconnect.
    SetUrl(String),
    /// Replace the target IP literal (empty clears it) and reconnect.
    SetHostIp(String),
    /// Suppress connection attempts (admin `stop`).
    Deny,
    /// Re-enable connection attempts (admin `start`).
    Allow,
    /// Exit the execution context.
    Shutdown,
}

/// Cloneable reference to a running socket.
///
/// Carries the command channel plus the diagnostics the registry's `list`
/// output and the tests read: tick counter, live connection count, connect
/// attempts, the bound local address and the last identification MAC.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    id: u64,
    name: Arc<str>,
    port: u16,
    cmd_tx: mpsc::UnboundedSender<Command>,
    ticks: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
    connect_attempts: Arc<AtomicUsize>,
    local_addr: Arc<Mutex<Option<SocketAddr>>>,
    last_identified_mac: Arc<Mutex<Option<[u8; 6]>>>,
}

impl SocketHandle {
    fn new(name: &str, port: u16, cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
            port,
            cmd_tx,
            ticks: Arc::new(AtomicUsize::new(0)),
            connections: Arc::new(AtomicUsize::new(0)),
            connect_attempts: Arc::new(AtomicUsize::new(0)),
            local_addr: Arc::new(Mutex::new(None)),
            last_identified_mac: Arc::new(Mutex::new(None)),
        }
    }

    /// Unique identity, used for registry removal.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Scheduling ticks completed by the task so far.
    pub fn loop_count(&self) -> usize {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Live connections in the socket's connection set.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Connect attempts made since spawn (client and datagram roles).
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Address the socket is actually bound to, once listening/bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Device MAC captured on the last `"man mac"` query.
    pub fn last_identified_mac(&self) -> Option<[u8; 6]> {
        *self.last_identified_mac.lock().unwrap()
    }

    /// Flag a disconnect request (admin `reset`).
    pub fn reset(&self) -> Result<(), SocketError> {
        self.send(Command::Disconnect)
    }

    /// Set connect-deny (admin `stop`).
    pub fn stop(&self) -> Result<(), SocketError> {
        self.send(Command::Deny)
    }

    /// Clear connect-deny (admin `start`).
    pub fn start(&self) -> Result<(), SocketError> {
        self.send(Command::Allow)
    }

    /// Replace the target URL; oversized values are rejected and the
    /// stored value is kept.
    pub fn set_url(&self, url: &str) -> Result<(), SocketError> {
        if url.len() >= MAX_URL_LEN {
            log::error!(
                "Socket {} set URL '{url}' failure (must fit {MAX_URL_LEN} bytes)",
                self.name
            );
            return Err(SocketError::UrlTooLong(url.to_string()));
        }
        self.send(Command::SetUrl(url.to_string()))
    }

    /// Replace the target IP literal; oversized values are rejected and
    /// the stored value is kept.
    pub fn set_host_ip(&self, ip: &str) -> Result<(), SocketError> {
        if ip.len() >= MAX_IP_LEN {
            log::error!(
                "Socket {} set IP address '{ip}' failure (must fit {MAX_IP_LEN} bytes)",
                self.name
            );
            return Err(SocketError::IpTooLong(ip.to_string()));
        }
        self.send(Command::SetHostIp(ip.to_string()))
    }

    fn send(&self, cmd: Command) -> Result<(), SocketError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| SocketError::NotRunning(self.name.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn stub(name: &str, port: u16) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self::new(name, port, tx)
    }
}

/// A spawned socket: handle plus the task it controls.
pub struct SocketDriver {
    handle: SocketHandle,
    task: JoinHandle<()>,
}

impl SocketDriver {
    /// Validate `config` and spawn the socket's execution context.
    ///
    /// The task registers itself in `registry` on its first iteration and
    /// unregisters on exit.
    pub fn spawn(
        config: SocketConfig,
        registry: Arc<SocketRegistry>,
        oracle: Arc<dyn LinkOracle>,
        events: Arc<dyn SocketEvents>,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<Self, SocketError> {
        config.validate()?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = SocketHandle::new(&config.name, config.port, cmd_tx);
        log::info!("Creating task socket_{}", config.name);

        let task = DriverTask {
            connections: ConnectionSet::new(
                config.max_clients,
                config.send_buffer_capacity,
                config.recv_buffer_capacity,
            ),
            url: config.url.clone(),
            host_ip: config.host_ip.clone(),
            cfg: config,
            registry,
            oracle,
            events,
            resolver,
            cmd_rx,
            handle: handle.clone(),
            active: true,
            connected: false,
            disconnect_request: false,
            connect_deny: false,
            next_attempt: None,
            runtime: SocketRuntime::new(),
            listener: None,
            candidate: None,
        };
        let task = tokio::spawn(task.run());
        Ok(Self { handle, task })
    }

    /// Cloneable admin handle for this socket.
    pub fn handle(&self) -> SocketHandle {
        self.handle.clone()
    }

    /// Stop the execution context and wait for it to fully exit.
    ///
    /// Consumes the driver: a new context for the same socket can only be
    /// spawned after this returns.
    pub async fn shutdown(self) {
        let _ = self.handle.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

/// Task-scoped runtime state, created at context start and dropped on exit.
#[derive(Debug)]
struct SocketRuntime {
    /// Currently selected adapter interface (`None` until the first
    /// selector pass).
    selected: Option<Interface>,
    /// Local IP of the selected adapter.
    local_ip: Ipv4Addr,
    /// Target host address looks like a broadcast address.
    broadcast: bool,
    /// Connect/send target (host IP + port).
    target: SocketAddr,
}

impl SocketRuntime {
    fn new() -> Self {
        Self {
            selected: None,
            local_ip: Ipv4Addr::UNSPECIFIED,
            broadcast: false,
            target: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        }
    }
}

struct DriverTask {
    cfg: SocketConfig,
    registry: Arc<SocketRegistry>,
    oracle: Arc<dyn LinkOracle>,
    events: Arc<dyn SocketEvents>,
    resolver: Arc<dyn HostResolver>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    handle: SocketHandle,

    /// Admin-updatable copies of the configured target.
    url: String,
    host_ip: String,

    active: bool,
    connected: bool,
    disconnect_request: bool,
    connect_deny: bool,
    /// Earliest instant for the next client connect attempt.
    next_attempt: Option<Instant>,

    runtime: SocketRuntime,
    listener: Option<TcpListener>,
    /// Created-but-not-yet-connected stream socket (two-phase setup).
    candidate: Option<TcpSocket>,
    connections: ConnectionSet,
}

impl DriverTask {
    async fn run(mut self) {
        log::info!("Socket {} task started", self.cfg.name);
        self.registry.register(self.handle.clone());

        while self.active {
            self.apply_commands();
            if !self.active {
                break;
            }
            self.tick().await;
            self.handle.ticks.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(TICK_INTERVAL).await;
        }

        self.teardown();
        self.registry.unregister(self.handle.id);
        log::info!("Socket {} task exited", self.cfg.name);
    }

    /// Drain the command channel at the tick boundary.
    fn apply_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                Command::Disconnect => self.disconnect_request = true,
                Command::SetUrl(url) => {
                    log::info!("Socket {} set URL '{url}'", self.cfg.name);
                    let clear = url.is_empty();
                    self.url = url;
                    if !clear {
                        // Reconnect so the change takes effect.
                        self.disconnect_request = true;
                    }
                }
                Command::SetHostIp(ip) => {
                    log::info!("Socket {} set IP address '{ip}'", self.cfg.name);
                    let clear = ip.is_empty();
                    self.host_ip = ip;
                    if !clear {
                        self.disconnect_request = true;
                    }
                }
                Command::Deny => self.connect_deny = true,
                Command::Allow => self.connect_deny = false,
                Command::Shutdown => self.active = false,
            }
        }
    }

    /// One full lifecycle iteration.
    async fn tick(&mut self) {
        let outcome = select_interface(
            &mut self.runtime.selected,
            &self.cfg.interfaces,
            self.oracle.as_ref(),
            &self.cfg.name,
        );
        if outcome.disconnect {
            self.disconnect_request = true;
        }

        if self.disconnect_request {
            self.disconnect_request = false;
            if self.connected && (!self.connections.is_empty() || self.listener.is_some()) {
                self.teardown();
            } else {
                log::debug!(
                    "Socket {}: skip disconnect request - nothing to tear down",
                    self.cfg.name
                );
            }
        }

        // Interface-class connect-deny policy.
        if !self.connect_deny {
            if let Some(selected) = self.runtime.selected {
                let deny = match selected {
                    Interface::Ethernet => self.cfg.flags.deny_ethernet,
                    Interface::Station => self.cfg.flags.deny_station,
                    Interface::AccessPoint => self.cfg.flags.deny_access_point,
                };
                if deny {
                    log::warn!(
                        "Socket {} connect deny on interface {selected}",
                        self.cfg.name
                    );
                    self.connect_deny = true;
                }
            }
        }

        if self.connect_deny {
            // Teardown executes on the next tick's disconnect step.
            self.disconnect_request = true;
        } else if self.connected {
            self.pump_connections();
            if self.cfg.role == Role::Server {
                self.poll_accept().await;
            }
        } else if outcome.usable {
            let due = self.next_attempt.map_or(true, |at| Instant::now() >= at);
            if due {
                self.try_connect().await;
            }
        }
        // No usable interface: idle this tick.
    }

    /// Run receive then send for every connection, removing fatalities.
    fn pump_connections(&mut self) {
        let mac = self
            .runtime
            .selected
            .map(|i| self.oracle.mac(i))
            .unwrap_or_default();
        let broadcast = self.runtime.broadcast.then_some(self.runtime.target);
        let ctx = PumpContext {
            name: &self.cfg.name,
            role: self.cfg.role,
            flags: &self.cfg.flags,
            events: self.events.as_ref(),
            mac,
            broadcast,
            last_identified_mac: &self.handle.last_identified_mac,
        };

        let mut index = 0;
        while index < self.connections.len() {
            let (conn, bufs) = self.connections.entry_mut(index);
            let verdict = match pump::receive(&ctx, conn, bufs, index) {
                Verdict::Close => Verdict::Close,
                Verdict::Keep => {
                    let (conn, bufs) = self.connections.entry_mut(index);
                    pump::send(&ctx, conn, bufs, index)
                }
            };
            match verdict {
                Verdict::Close => {
                    self.events.on_disconnect(index);
                    drop(self.connections.remove(index));
                    if self.cfg.role == Role::Client && self.connections.is_empty() {
                        self.connected = false;
                    }
                    self.handle
                        .connections
                        .store(self.connections.len(), Ordering::Relaxed);
                }
                Verdict::Keep => index += 1,
            }
        }
    }

    /// Zero-timeout readiness poll for new incoming connections.
    async fn poll_accept(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };
        match timeout(Duration::ZERO, listener.accept()).await {
            Err(_) => {} // nothing pending this tick
            Ok(Err(e)) => {
                log::error!("Socket {} unable to accept connection: {e}", self.cfg.name);
                self.teardown();
            }
            Ok(Ok((stream, peer))) => {
                log::info!("Socket {} accepted ip address: {peer}", self.cfg.name);
                if self.connections.is_full() {
                    log::error!(
                        "Connecting failure (max clients reached) client to socket {} {peer}",
                        self.cfg.name
                    );
                    drop(stream);
                    return;
                }
                self.admit(Connection {
                    endpoint: Endpoint::Tcp(stream),
                    peer: Some(peer),
                    gate: self.fresh_gate(),
                    ping: PingState::default(),
                    pending: Vec::new(),
                });
            }
        }
    }

    /// Create / bind / connect / listen, depending on role and transport.
    async fn try_connect(&mut self) {
        match (self.cfg.role, self.cfg.transport) {
            (Role::Server, Transport::Stream) => self.connect_server().await,
            (Role::Client, Transport::Stream) => self.connect_client().await,
            (Role::Client, Transport::Datagram) => self.connect_datagram().await,
            // Remaining combinations are rejected at validation.
            _ => {}
        }
    }

    async fn connect_server(&mut self) {
        if self.listener.is_none() && self.candidate.is_none() {
            log::warn!("Socket server {}: try create socket", self.cfg.name);
            match self.make_stream_socket() {
                Ok(sock) => self.candidate = Some(sock),
                Err(e) => log::error!("Unable to create socket {}: {e}", self.cfg.name),
            }
            return; // bind + listen on a later tick
        }

        self.prepare_ip_info();
        let Some(sock) = self.candidate.take() else {
            return;
        };
        let bind_addr = self.bind_addr(self.cfg.port);
        if let Err(e) = sock.bind(bind_addr) {
            log::error!("Socket {} unable to bind {bind_addr}: {e}", self.cfg.name);
            self.teardown();
            return;
        }
        log::info!("Socket {} bound to IF {bind_addr}", self.cfg.name);

        match sock.listen(LISTEN_BACKLOG) {
            Ok(listener) => {
                *self.handle.local_addr.lock().unwrap() = listener.local_addr().ok();
                self.listener = Some(listener);
                self.connected = true;
                self.disconnect_request = false;
                log::info!("Socket {} listening", self.cfg.name);
            }
            Err(e) => {
                log::error!("Error occurred during listen socket {}: {e}", self.cfg.name);
                self.teardown();
            }
        }
    }

    async fn connect_client(&mut self) {
        if self.connections.is_empty() && self.candidate.is_none() {
            log::warn!("Socket client {}[0]: try create socket", self.cfg.name);
            match self.make_stream_socket() {
                Ok(sock) => self.candidate = Some(sock),
                Err(e) => log::error!("Unable to create socket {}: {e}", self.cfg.name),
            }
            return; // connect on a later tick
        }

        self.prepare_ip_info();
        let Some(sock) = self.candidate.take() else {
            return;
        };
        // Ephemeral local port on the selected adapter; a fixed source port
        // would collide with the server when both ends share an address.
        let local = self.bind_addr(0);
        if let Err(e) = sock.bind(local) {
            log::error!("Socket {} unable to bind {local}: {e}", self.cfg.name);
            self.schedule_retry();
            return;
        }

        self.handle.connect_attempts.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Socket {} trying connect() to remote {}",
            self.cfg.name,
            self.runtime.target
        );
        match timeout(CONNECT_TIMEOUT, sock.connect(self.runtime.target)).await {
            Ok(Ok(stream)) => {
                log::info!("Socket {} connected, port {}", self.cfg.name, self.cfg.port);
                *self.handle.local_addr.lock().unwrap() = stream.local_addr().ok();
                self.admit(Connection {
                    endpoint: Endpoint::Tcp(stream),
                    peer: Some(self.runtime.target),
                    gate: self.fresh_gate(),
                    ping: PingState::default(),
                    pending: Vec::new(),
                });
                self.connected = true;
                self.disconnect_request = false;
                self.next_attempt = None;
            }
            Ok(Err(e)) => {
                log::error!("Socket {} unable to connect: {e}", self.cfg.name);
                self.schedule_retry();
            }
            Err(_) => {
                log::error!("Socket {} connect timed out", self.cfg.name);
                self.schedule_retry();
            }
        }
    }

    async fn connect_datagram(&mut self) {
        self.prepare_ip_info();
        self.handle.connect_attempts.fetch_add(1, Ordering::Relaxed);

        let bind_addr = self.bind_addr(self.cfg.port);
        let sock = match UdpSocket::bind(bind_addr).await {
            Ok(sock) => sock,
            Err(e) => {
                log::error!("Socket {} unable to bind {bind_addr}: {e}", self.cfg.name);
                self.schedule_retry();
                return;
            }
        };

        if self.cfg.flags.permit_broadcast {
            if let Err(e) = sock.set_broadcast(true) {
                log::error!(
                    "Socket {} failed to set sock option permit broadcast: {e}",
                    self.cfg.name
                );
            }
        }

        if self.runtime.broadcast {
            log::info!(
                "Socket {} connected only through bind (broadcast host address detected), port {}",
                self.cfg.name,
                self.cfg.port
            );
        } else if let Err(e) = sock.connect(self.runtime.target).await {
            log::error!("Socket {} unable to connect: {e}", self.cfg.name);
            self.schedule_retry();
            return;
        }

        *self.handle.local_addr.lock().unwrap() = sock.local_addr().ok();
        self.admit(Connection {
            endpoint: Endpoint::Udp(Arc::new(sock)),
            peer: None,
            gate: self.fresh_gate(),
            ping: PingState::default(),
            pending: Vec::new(),
        });
        self.connected = true;
        self.disconnect_request = false;
        self.next_attempt = None;
    }

    /// Admit a connection into the set and fire the connect hook.
    fn admit(&mut self, conn: Connection) {
        let peer = conn.peer;
        match self.connections.add(conn) {
            Ok(index) => {
                let bufs = self.connections.buffers(index).clone();
                if self.cfg.flags.reset_send_buffer_on_connect {
                    bufs.send.zero();
                }
                self.events.on_connect(&ConnectionLink {
                    index,
                    peer,
                    send_buffer: bufs.send,
                    recv_buffer: bufs.recv,
                });
                self.handle
                    .connections
                    .store(self.connections.len(), Ordering::Relaxed);
            }
            Err(rejected) => {
                // Guarded by is_full checks; kept as a safety net.
                log::error!(
                    "Connecting failure (max clients reached) client to socket {}",
                    self.cfg.name
                );
                drop(rejected);
            }
        }
    }

    fn fresh_gate(&self) -> GateState {
        GateState::new(
            self.cfg.flags.forced_identification,
            self.cfg.flags.auto_send_enable,
        )
    }

    fn schedule_retry(&mut self) {
        self.next_attempt = Some(Instant::now() + RECONNECT_DELAY);
    }

    /// Refresh the runtime addressing state before a connect attempt.
    fn prepare_ip_info(&mut self) {
        let local = self.runtime.selected.and_then(|i| self.oracle.local_ip(i));
        self.runtime.local_ip = match local {
            Some(ip) => {
                log::info!("Socket {} adapter interface selected IP: {ip}", self.cfg.name);
                ip
            }
            None => {
                log::warn!(
                    "Socket {} default adapter interface selected IP: 0.0.0.0",
                    self.cfg.name
                );
                Ipv4Addr::UNSPECIFIED
            }
        };

        // Resolve the URL on every attempt; fall back to the IP literal.
        let resolved = if self.url.is_empty() {
            None
        } else {
            log::info!("Socket {} start resolve URL {}", self.cfg.name, self.url);
            match self.resolver.resolve(&self.url) {
                Some(ip) => {
                    log::info!(
                        "Socket {} resolved URL {} to ip address: {ip}",
                        self.cfg.name,
                        self.url
                    );
                    Some(ip)
                }
                None => {
                    log::error!(
                        "Socket {} fail resolve URL {} - use default IP: {}",
                        self.cfg.name,
                        self.url,
                        self.host_ip
                    );
                    None
                }
            }
        };
        let host_ip = resolved
            .or_else(|| self.host_ip.parse().ok())
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        self.runtime.broadcast = host_ip.octets().contains(&0xFF);
        self.runtime.target = SocketAddr::from((host_ip, self.cfg.port));
        log::info!("Socket {} bind/connect: {host_ip}", self.cfg.name);
    }

    /// Local bind address on the selected adapter for the given port.
    fn bind_addr(&self, port: u16) -> SocketAddr {
        match self.cfg.family {
            AddressFamily::V4 => SocketAddr::from((self.runtime.local_ip, port)),
            AddressFamily::V6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        }
    }

    fn make_stream_socket(&self) -> std::io::Result<TcpSocket> {
        let sock = match self.cfg.family {
            AddressFamily::V4 => TcpSocket::new_v4()?,
            AddressFamily::V6 => TcpSocket::new_v6()?,
        };
        sock.set_reuseaddr(true)?;
        log::info!("Created socket {}", self.cfg.name);
        Ok(sock)
    }

    /// Full teardown: every connection, then the listening handle.
    fn teardown(&mut self) {
        while !self.connections.is_empty() {
            log::warn!("Disconnecting connection 0 of socket {}", self.cfg.name);
            self.events.on_disconnect(0);
            drop(self.connections.remove(0));
        }
        if let Some(listener) = self.listener.take() {
            log::warn!("Disconnecting server socket {}", self.cfg.name);
            drop(listener);
        }
        self.candidate = None;
        self.connected = false;
        self.handle.connections.store(0, Ordering::Relaxed);
        *self.handle.local_addr.lock().unwrap() = None;
    }
}
