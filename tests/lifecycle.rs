//! Integration tests for the socket lifecycle.
//!
//! Each test spins up a managed socket against a real loopback peer (a plain
//! `tokio::net::TcpListener` or `TcpStream`) and observes the lifecycle
//! through the admin handle, the registry and the slot buffers.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};

use sockmux::{
    ConnectionLink, Interface, LinkOracle, NullEvents, SocketConfig, SocketDriver, SocketEvents,
    SocketRegistry, StaticResolver, Transport, RECONNECT_DELAY,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TEST_MAC: [u8; 6] = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01];

/// Oracle for the host loopback: one always-connected interface.
struct Loopback;

impl LinkOracle for Loopback {
    fn is_connected(&self, _interface: Interface) -> bool {
        true
    }

    fn local_ip(&self, _interface: Interface) -> Option<Ipv4Addr> {
        Some(Ipv4Addr::LOCALHOST)
    }

    fn mac(&self, _interface: Interface) -> [u8; 6] {
        TEST_MAC
    }
}

/// Event hook that records every connect link and disconnect.
#[derive(Default)]
struct Recorder {
    links: Mutex<Vec<ConnectionLink>>,
    disconnects: AtomicUsize,
}

impl Recorder {
    fn link(&self, index: usize) -> Option<ConnectionLink> {
        self.links.lock().unwrap().get(index).cloned()
    }
}

impl SocketEvents for Recorder {
    fn on_connect(&self, link: &ConnectionLink) {
        self.links.lock().unwrap().push(link.clone());
    }

    fn on_disconnect(&self, _index: usize) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }
}

fn spawn(
    cfg: SocketConfig,
    registry: &Arc<SocketRegistry>,
    events: Arc<dyn SocketEvents>,
) -> SocketDriver {
    SocketDriver::spawn(
        cfg,
        registry.clone(),
        Arc::new(Loopback),
        events,
        Arc::new(StaticResolver::new()),
    )
    .expect("spawn socket")
}

/// Poll `cond` until it holds or the deadline expires.
async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

/// A loopback port with nothing listening behind it.
async fn refused_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

// ---------------------------------------------------------------------------
// Test 1: client connects and moves bytes through the slot buffers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_connects_and_moves_bytes_both_ways() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let registry = Arc::new(SocketRegistry::new());
    let events = Arc::new(Recorder::default());
    let mut cfg = SocketConfig::client("cli", Transport::Stream, port);
    cfg.host_ip = "127.0.0.1".to_string();
    cfg.flags.auto_send_enable = true;
    let driver = spawn(cfg, &registry, events.clone());

    let (mut peer, _) = timeout(Duration::from_secs(3), listener.accept())
        .await
        .expect("accept deadline")
        .expect("accept");

    wait_until("connect hook", || events.link(0).is_some()).await;
    let link = events.link(0).unwrap();

    // Outbound: staged bytes reach the peer.
    assert_eq!(link.send_buffer.push(b"hello\r\n"), 7);
    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(3), peer.read(&mut buf))
        .await
        .expect("read deadline")
        .expect("peer read");
    assert_eq!(&buf[..n], b"hello\r\n");

    // Inbound: peer bytes land in the slot's receive buffer.
    peer.write_all(b"world").await.unwrap();
    wait_until("inbound bytes", || link.recv_buffer.size() == 5).await;
    assert_eq!(link.recv_buffer.pull(16), b"world");

    driver.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test 2: failed connects respect the reconnect holdoff
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_connect_waits_before_retrying() {
    let port = refused_port().await;

    let registry = Arc::new(SocketRegistry::new());
    let mut cfg = SocketConfig::client("retry", Transport::Stream, port);
    cfg.host_ip = "127.0.0.1".to_string();
    let driver = spawn(cfg, &registry, Arc::new(NullEvents));
    let handle = driver.handle();

    // Well inside the holdoff window only the initial attempt has run.
    sleep(Duration::from_millis(1200)).await;
    assert_eq!(handle.connect_attempts(), 1);
    assert_eq!(handle.connection_count(), 0);

    // After the holdoff a retry must have happened.
    sleep(RECONNECT_DELAY).await;
    assert!(
        handle.connect_attempts() >= 2,
        "no retry after the holdoff elapsed"
    );

    driver.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test 3: server stops admitting at max_clients
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_enforces_max_clients() {
    let registry = Arc::new(SocketRegistry::new());
    let mut cfg = SocketConfig::server("srv", Transport::Stream, 0);
    cfg.max_clients = 2;
    cfg.flags.auto_send_enable = true;
    let driver = spawn(cfg, &registry, Arc::new(NullEvents));
    let handle = driver.handle();

    wait_until("listener bound", || handle.local_addr().is_some()).await;
    let addr = handle.local_addr().unwrap();

    let _first = TcpStream::connect(addr).await.unwrap();
    let _second = TcpStream::connect(addr).await.unwrap();
    wait_until("two admitted clients", || handle.connection_count() == 2).await;

    // The third connection is accepted, rejected and closed.
    let mut third = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 8];
    let n = timeout(Duration::from_secs(3), third.read(&mut buf))
        .await
        .expect("read deadline")
        .expect("read on rejected connection");
    assert_eq!(n, 0, "rejected connection should be closed");
    assert_eq!(handle.connection_count(), 2);

    driver.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test 4: identification gate over a real connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identification_gate_withholds_data_until_version_query() {
    let registry = Arc::new(SocketRegistry::new());
    let events = Arc::new(Recorder::default());
    let mut cfg = SocketConfig::server("ident", Transport::Stream, 0);
    cfg.flags.forced_identification = true;
    let driver = spawn(cfg, &registry, events.clone());
    let handle = driver.handle();

    wait_until("listener bound", || handle.local_addr().is_some()).await;
    let mut peer = TcpStream::connect(handle.local_addr().unwrap())
        .await
        .unwrap();
    wait_until("connect hook", || events.link(0).is_some()).await;
    let link = events.link(0).unwrap();

    // Staged data is withheld while the gate is closed.
    link.send_buffer.push(b"early");
    let mut buf = [0u8; 256];
    let held = timeout(Duration::from_millis(300), peer.read(&mut buf)).await;
    assert!(held.is_err(), "data leaked through a closed gate");

    // MAC query: one reply, gate still closed, MAC captured on the handle.
    peer.write_all(b"man mac").await.unwrap();
    let mut reply = String::new();
    while !reply.contains("Version:") {
        let n = timeout(Duration::from_secs(3), peer.read(&mut buf))
            .await
            .expect("reply deadline")
            .expect("reply read");
        assert!(n > 0);
        reply.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    assert!(reply.starts_with("DE:AD:BE:EF:00:01\rMAC:DE:AD:BE:EF:00:01\rVersion:"));
    wait_until("captured MAC", || handle.last_identified_mac().is_some()).await;
    assert_eq!(handle.last_identified_mac(), Some(TEST_MAC));

    // Version query opens the gate; the reply and the withheld bytes follow.
    peer.write_all(b"man ver").await.unwrap();
    let mut seen = String::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    while !seen.contains("early") {
        assert!(Instant::now() < deadline, "withheld data never arrived");
        let n = timeout(Duration::from_secs(3), peer.read(&mut buf))
            .await
            .expect("read deadline")
            .expect("read");
        assert!(n > 0);
        seen.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    assert!(seen.contains("Version:"));
    assert!(seen.ends_with("early"));

    driver.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test 5: admin deny/allow cycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_tears_down_and_start_reconnects() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Keep accepted streams alive so the managed side stays connected.
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            held.push(stream);
        }
    });

    let registry = Arc::new(SocketRegistry::new());
    let mut cfg = SocketConfig::client("ctl", Transport::Stream, port);
    cfg.host_ip = "127.0.0.1".to_string();
    cfg.flags.auto_send_enable = true;
    let driver = spawn(cfg, &registry, Arc::new(NullEvents));
    let handle = driver.handle();

    wait_until("initial connect", || handle.connection_count() == 1).await;

    handle.stop().expect("stop command");
    wait_until("teardown on deny", || handle.connection_count() == 0).await;

    // Denied sockets must not reconnect on their own.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.connection_count(), 0);

    handle.start().expect("start command");
    wait_until("reconnect after allow", || handle.connection_count() == 1).await;

    driver.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test 6: registry mirrors running execution contexts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registry_tracks_task_lifetime() {
    let port = refused_port().await;

    let registry = Arc::new(SocketRegistry::new());
    let mut cfg = SocketConfig::client("reg", Transport::Stream, port);
    cfg.host_ip = "127.0.0.1".to_string();
    let driver = spawn(cfg, &registry, Arc::new(NullEvents));

    wait_until("registration", || registry.find_handle("reg").is_some()).await;
    assert_eq!(registry.len(), 1);

    let handle = registry.find_handle("reg").unwrap();
    let before = handle.loop_count();
    wait_until("tick progress", || handle.loop_count() > before).await;

    // Shutdown waits for the task, so the registry entry must be gone.
    driver.shutdown().await;
    assert!(registry.is_empty());
}
