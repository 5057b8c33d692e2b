//! Live transport endpoints and the per-socket connection set.
//!
//! A [`ConnectionSet`] holds the active endpoints of one socket: at most one
//! for client role, up to `max_clients` accepted endpoints for server role.
//! Removal compacts the set, preserving order.
//!
//! Buffers are deliberately *not* owned by connections.  The set owns one
//! persistent [`BufferPair`] per slot position; the connection occupying
//! position `i` stages its data through slot `i`.  After a removal the
//! survivors shift down and pick up the lower slots' buffers — the slot
//! binding follows the position, not the endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpStream, UdpSocket};

use crate::identify::GateState;
use crate::stream::StreamBuffer;

/// Platform endpoint handle.
#[derive(Debug)]
pub enum Endpoint {
    Tcp(TcpStream),
    Udp(Arc<UdpSocket>),
}

/// Keepalive ping accumulator for one connection.
#[derive(Debug, Clone, Default)]
pub struct PingState {
    /// Consecutive send-side idle ticks.
    pub idle_ticks: u32,
    /// Pings emitted so far (included in the ping line).
    pub count: u64,
}

/// One live transport endpoint under a socket.
#[derive(Debug)]
pub struct Connection {
    pub endpoint: Endpoint,
    /// Peer address for accepted endpoints; datagram pumps update it from
    /// the last observed sender.
    pub peer: Option<SocketAddr>,
    pub gate: GateState,
    pub ping: PingState,
    /// Bytes pulled from the send buffer but not yet written; drained
    /// before new pulls, so the shared buffer never has to take bytes
    /// back.
    pub pending: Vec<u8>,
}

/// Send/receive staging buffers for one slot position.
#[derive(Debug, Clone)]
pub struct BufferPair {
    pub send: Arc<StreamBuffer>,
    pub recv: Arc<StreamBuffer>,
}

/// Ordered collection of a socket's active endpoints.
#[derive(Debug)]
pub struct ConnectionSet {
    conns: Vec<Connection>,
    slots: Vec<BufferPair>,
}

impl ConnectionSet {
    /// Create an empty set with `max_clients` persistent buffer slots.
    pub fn new(max_clients: usize, send_capacity: usize, recv_capacity: usize) -> Self {
        let slots = (0..max_clients)
            .map(|_| BufferPair {
                send: Arc::new(StreamBuffer::new(send_capacity)),
                recv: Arc::new(StreamBuffer::new(recv_capacity)),
            })
            .collect();
        Self {
            conns: Vec::with_capacity(max_clients),
            slots,
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// `true` when no further connection can be admitted.
    pub fn is_full(&self) -> bool {
        self.conns.len() >= self.slots.len()
    }

    /// Admit a connection at the next free position.
    ///
    /// Returns the assigned position, or `Err(conn)` when the set is full
    /// so the caller can close the rejected endpoint.
    pub fn add(&mut self, conn: Connection) -> Result<usize, Connection> {
        if self.is_full() {
            return Err(conn);
        }
        self.conns.push(conn);
        Ok(self.conns.len() - 1)
    }

    /// Remove the connection at `index`, compacting the remainder.
    pub fn remove(&mut self, index: usize) -> Connection {
        self.conns.remove(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Connection> {
        self.conns.get_mut(index)
    }

    /// Buffers bound to slot position `index`.
    pub fn buffers(&self, index: usize) -> &BufferPair {
        &self.slots[index]
    }

    /// Connection and slot buffers at `index`, borrowed disjointly for the
    /// pump.
    pub fn entry_mut(&mut self, index: usize) -> (&mut Connection, &BufferPair) {
        (&mut self.conns[index], &self.slots[index])
    }
}
