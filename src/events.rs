//! Callback capability surface exposed to the surrounding driver layer.
//!
//! Instead of raw function pointers, the application implements
//! [`SocketEvents`] and injects it at socket spawn.  All hooks run inline on
//! the socket's own task, once per pump operation — they must not block.
//!
//! Data flows through the [`ConnectionLink`] handed to `on_connect`: the
//! application keeps the buffer handles and stages outbound bytes with
//! `send_buffer.push(..)` / drains inbound ones with `recv_buffer.pull(..)`.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::stream::StreamBuffer;

/// Capability handle for one live connection slot.
#[derive(Clone)]
pub struct ConnectionLink {
    /// Position in the connection set at connect time.
    pub index: usize,
    /// Peer address (accepted endpoints; `None` for outbound links until
    /// the datagram pump observes a sender).
    pub peer: Option<SocketAddr>,
    /// Staging buffer drained towards the network by the pump.
    pub send_buffer: Arc<StreamBuffer>,
    /// Staging buffer filled from the network by the pump.
    pub recv_buffer: Arc<StreamBuffer>,
}

/// Per-connection event hooks.
///
/// Every method has a no-op default, so implementors override only what
/// they need.
pub trait SocketEvents: Send + Sync {
    /// A connection landed in the set (accepted, connected or bound).
    fn on_connect(&self, _link: &ConnectionLink) {}

    /// Received bytes are about to be pushed to the receive buffer.
    ///
    /// Returns the number of leading bytes to keep; returning less than
    /// `data.len()` shrinks the payload (never grows it).
    fn on_receive(&self, _index: usize, data: &[u8]) -> usize {
        data.len()
    }

    /// A payload was fully written to the network.
    fn on_send(&self, _index: usize, _data: &[u8]) {}

    /// The connection left the set.
    fn on_disconnect(&self, _index: usize) {}

    /// A broadcast-mode datagram arrived from `peer`.
    fn on_receive_from(&self, _peer: SocketAddr) {}

    /// Select the destination for the next broadcast-mode datagram.
    ///
    /// `None` falls back to the socket's broadcast address.
    fn on_send_to(&self) -> Option<SocketAddr> {
        None
    }
}

/// Hook implementation that ignores every event.
#[derive(Debug, Default)]
pub struct NullEvents;

impl SocketEvents for NullEvents {}
