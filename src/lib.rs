//! Named-socket connection manager.
//!
//! `sockmux` runs each configured socket as its own cooperative task that
//! owns the full connection lifecycle: adapter interface selection with
//! primary/backup failover, create/bind/connect/listen, a non-blocking
//! per-tick I/O pump with flow control, an optional identification
//! handshake gate, and automatic reconnect.  A process-wide registry maps
//! socket names to live handles for the administrative surface.
//!
//! ## Architecture
//!
//! ```text
//!             ┌───────────────┐  register/unregister  ┌──────────────┐
//!   admin ───▶│ SocketRegistry │◀─────────────────────│  DriverTask   │
//!             └───────┬───────┘                       │  (one/socket) │
//!                     │ find_handle                   │   tick loop   │
//!             ┌───────▼───────┐   Command channel     │ select ▶ pump │
//!             │  SocketHandle  │──────────────────────▶│ connect ▶ ... │
//!             └───────────────┘                       └──────┬───────┘
//!                                                           │
//!                                          ConnectionSet + StreamBuffers
//! ```
//!
//! Applications integrate through the [`events::SocketEvents`] trait and
//! the per-slot [`stream::StreamBuffer`] pair: stage outbound bytes into a
//! slot's send buffer, drain inbound bytes from its receive buffer.

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod events;
pub mod identify;
pub mod link;
pub mod pump;
pub mod registry;
pub mod resolve;
pub mod stream;

use std::time::Duration;

pub use config::{Role, SocketConfig, SocketFlags, Transport};
pub use driver::{Command, SocketDriver, SocketHandle};
pub use error::SocketError;
pub use events::{ConnectionLink, NullEvents, SocketEvents};
pub use link::{Interface, InterfacePair, LinkOracle};
pub use registry::SocketRegistry;
pub use resolve::{DnsResolver, HostResolver, StaticResolver};

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Scheduling interval of the per-socket lifecycle loop.
pub const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Send-side idle time before a keepalive ping line is synthesised.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Holdoff between failed client connect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Closed-gate limit before identification is force-released.
pub const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a blocking connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Capacities
// ---------------------------------------------------------------------------

/// Default registry capacity.
pub const MAX_SOCKETS: usize = 10;

/// Default `max_clients` for server sockets.
pub const MAX_CLIENTS: usize = 4;

/// Largest single read per connection per tick.
pub const MAX_READ_CHUNK: usize = 1024;

/// Largest single send per connection per tick.
pub const MAX_SEND_CHUNK: usize = 16384;

/// Maximum socket name length in bytes (inclusive).
pub const MAX_NAME_LEN: usize = 8;

/// Maximum target URL length in bytes (exclusive).
pub const MAX_URL_LEN: usize = 32;

/// Maximum target IP literal length in bytes (exclusive).
pub const MAX_IP_LEN: usize = 16;
