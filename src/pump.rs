//! Per-connection, per-tick receive and send operations.
//!
//! The pump never blocks: every socket call is a `try_*` operation and
//! "would block" simply means "retry next tick".  Any other error is
//! connection-fatal — the caller removes the connection and the rest of the
//! socket keeps running.
//!
//! Receive order for successfully read bytes:
//! 1. identification MAC capture (forced-identification sockets, regardless
//!    of gate state);
//! 2. gate classification and inline replies (see [`crate::identify`]);
//! 3. optional CRLF/LFCR → CR normalization;
//! 4. the `on_receive` hook, which may shrink the payload;
//! 5. push into the slot's receive buffer — a short push closes the
//!    connection.
//!
//! Send only runs once the gate has released the connection; otherwise the
//! tick is spent accounting the gate timeout.

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::config::{Role, SocketFlags};
use crate::connection::{BufferPair, Connection, Endpoint};
use crate::events::SocketEvents;
use crate::identify::{identification_reply, GateAction, QUERY_MAC};
use crate::{MAX_READ_CHUNK, MAX_SEND_CHUNK, PING_INTERVAL, TICK_INTERVAL};

/// Outcome of one pump operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Connection stays in the set.
    Keep,
    /// Connection-fatal condition; close and remove this connection.
    Close,
}

/// Socket-level context shared by both pump directions.
pub struct PumpContext<'a> {
    pub name: &'a str,
    pub role: Role,
    pub flags: &'a SocketFlags,
    pub events: &'a dyn SocketEvents,
    /// MAC of the selected adapter interface, for identification replies.
    pub mac: [u8; 6],
    /// `Some(addr)` on broadcast-mode datagram sockets: the fallback
    /// destination when `on_send_to` declines to pick one.
    pub broadcast: Option<SocketAddr>,
    /// Device MAC captured on the last `"man mac"` query.
    pub last_identified_mac: &'a Mutex<Option<[u8; 6]>>,
}

impl PumpContext<'_> {
    /// `"client"` for server-side accepted endpoints, so log lines name
    /// which end of the link failed.
    fn kind(&self) -> &'static str {
        match self.role {
            Role::Server => "client",
            Role::Client => "",
        }
    }
}

/// Collapse every CRLF or LFCR pair into a single CR terminator.
///
/// Unpaired terminators are left alone: `A\rB` stays `A\rB`.
pub fn normalize_line_endings(data: &mut Vec<u8>) {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        if i + 1 < data.len() {
            let next = data[i + 1];
            if (b == b'\r' && next == b'\n') || (b == b'\n' && next == b'\r') {
                out.push(b'\r');
                i += 2;
                continue;
            }
        }
        out.push(b);
        i += 1;
    }
    *data = out;
}

/// Non-blocking write of an inline payload (identification replies).
///
/// Replies are not staged through the send buffer — the gate exists to hold
/// that buffer back — so a would-block here is treated as a failed send.
fn write_inline(conn: &Connection, ctx: &PumpContext<'_>, data: &[u8]) -> io::Result<usize> {
    match &conn.endpoint {
        Endpoint::Tcp(stream) => stream.try_write(data),
        // Broadcast-mode endpoints address each datagram explicitly (the
        // last observed sender, or the broadcast address); connected
        // endpoints send on the socket directly.
        Endpoint::Udp(sock) => match conn.peer.or(ctx.broadcast) {
            Some(dest) => sock.try_send_to(data, dest),
            None => sock.try_send(data),
        },
    }
}

/// Send one identification reply; `false` means the connection must close.
fn send_identification(ctx: &PumpContext<'_>, conn: &Connection, index: usize) -> bool {
    let reply = identification_reply(&ctx.mac);
    match write_inline(conn, ctx, &reply) {
        Ok(n) if n == reply.len() => {
            log::info!(
                "Success send id to socket {}[{index}]: sent {n} bytes",
                ctx.name
            );
            true
        }
        Ok(n) => {
            log::error!(
                "Error during send id to socket {}[{index}]: sent {n}/{} bytes",
                ctx.name,
                reply.len()
            );
            false
        }
        Err(e) => {
            log::error!("Error during send id to socket {}[{index}]: {e}", ctx.name);
            false
        }
    }
}

/// Receive operation for one connection, one tick.
pub fn receive(
    ctx: &PumpContext<'_>,
    conn: &mut Connection,
    bufs: &BufferPair,
    index: usize,
) -> Verdict {
    let mut limit = MAX_READ_CHUNK;

    if ctx.flags.prevent_receive_overflow {
        let free = bufs.recv.free();
        if free == 0 {
            log::warn!(
                "Skip read from {} socket {}[{index}] because of full read buffer ({} bytes)",
                ctx.kind(),
                ctx.name,
                bufs.recv.size()
            );
            return Verdict::Keep;
        }
        if limit > free {
            limit = free;
        }
    }

    let mut data = vec![0u8; limit];
    let read = match &conn.endpoint {
        Endpoint::Tcp(stream) => stream.try_read(&mut data),
        Endpoint::Udp(sock) => {
            if ctx.broadcast.is_some() {
                match sock.try_recv_from(&mut data) {
                    Ok((n, from)) => {
                        log::debug!(
                            "Recv {} socket {}[{index}] from {from}",
                            ctx.kind(),
                            ctx.name
                        );
                        conn.peer = Some(from);
                        ctx.events.on_receive_from(from);
                        Ok(n)
                    }
                    Err(e) => Err(e),
                }
            } else {
                sock.try_recv(&mut data)
            }
        }
    };

    let n = match read {
        Ok(0) => {
            // Orderly shutdown by the peer.
            log_lost_peer(ctx, conn, index);
            return Verdict::Close;
        }
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Verdict::Keep,
        Err(e) => {
            log::error!(
                "Error during read from {} socket {}[{index}]: {e}",
                ctx.kind(),
                ctx.name
            );
            log_lost_peer(ctx, conn, index);
            return Verdict::Close;
        }
    };
    data.truncate(n);

    // MAC capture happens whether or not the gate is still waiting.
    if ctx.flags.forced_identification && data.starts_with(QUERY_MAC) {
        let mut last = ctx.last_identified_mac.lock().unwrap();
        *last = Some(ctx.mac);
        log::info!(
            "Last MAC on identification request {}",
            crate::identify::format_mac(&ctx.mac)
        );
    }

    if conn.gate.needs_identification {
        match conn.gate.classify(&data) {
            GateAction::Reply { open } => {
                if !send_identification(ctx, conn, index) {
                    return Verdict::Close;
                }
                if open {
                    log::info!("Socket {}[{index}] identification complete", ctx.name);
                }
            }
            GateAction::Ignore => {
                log::info!(
                    "Socket {}[{index}] identification skip {} bytes",
                    ctx.name,
                    data.len()
                );
            }
        }
    }

    if ctx.flags.fix_line_endings {
        normalize_line_endings(&mut data);
    }

    let adjusted = ctx.events.on_receive(index, &data);
    if adjusted != data.len() {
        log::info!(
            "OnReceive event {} socket {}[{index}]: returns {adjusted}/{} bytes",
            ctx.kind(),
            ctx.name,
            data.len()
        );
        data.truncate(adjusted);
    }

    let pushed = bufs.recv.push(&data);
    if pushed != data.len() {
        log::error!(
            "Error during read from {} socket {}[{index}]: push {pushed}/{} bytes",
            ctx.kind(),
            ctx.name,
            data.len()
        );
        return Verdict::Close;
    }
    log::debug!(
        "{} socket {}[{index}]: push {pushed} -> {} bytes buffered",
        ctx.kind(),
        ctx.name,
        bufs.recv.size()
    );
    Verdict::Keep
}

/// Send operation for one connection, one tick.
pub fn send(
    ctx: &PumpContext<'_>,
    conn: &mut Connection,
    bufs: &BufferPair,
    index: usize,
) -> Verdict {
    if !conn.gate.send_enable {
        if conn.gate.needs_identification {
            if conn.gate.tick_closed() {
                log::error!(
                    "Send enable on identification timeout socket {}[{index}]",
                    ctx.name
                );
                if ctx.flags.forced_identification && !send_identification(ctx, conn, index) {
                    return Verdict::Close;
                }
            }
        } else {
            conn.gate.open();
        }
        return Verdict::Keep;
    }

    // Unsent bytes from an earlier would-block come first; the shared
    // buffer may have been refilled by the application meanwhile.
    let mut payload = std::mem::take(&mut conn.pending);
    if payload.is_empty() {
        payload = bufs.send.pull(MAX_SEND_CHUNK);
    }
    let mut from_ping = false;

    if payload.is_empty() {
        if ctx.flags.keepalive_ping {
            conn.ping.idle_ticks += 1;
            let limit = (PING_INTERVAL.as_millis() / TICK_INTERVAL.as_millis()) as u32;
            if conn.ping.idle_ticks >= limit {
                conn.ping.idle_ticks = 0;
                conn.ping.count += 1;
                payload = format!("ping_count {} \r\n", conn.ping.count).into_bytes();
                from_ping = true;
            }
        }
    } else {
        conn.ping.idle_ticks = 0;
    }

    if payload.is_empty() {
        return Verdict::Keep;
    }

    let sent = match &conn.endpoint {
        Endpoint::Tcp(stream) => stream.try_write(&payload),
        Endpoint::Udp(sock) => {
            if let Some(fallback) = ctx.broadcast {
                let dest = ctx.events.on_send_to().unwrap_or(fallback);
                log::debug!("SendTo {} socket {}[{index}] -> {dest}", ctx.kind(), ctx.name);
                sock.try_send_to(&payload, dest)
            } else {
                sock.try_send(&payload)
            }
        }
    };

    match sent {
        Ok(n) if n == payload.len() => {
            ctx.events.on_send(index, &payload);
            Verdict::Keep
        }
        Ok(n) => {
            log::error!(
                "Error during send to {} socket {}[{index}]: sent {n}/{} bytes",
                ctx.kind(),
                ctx.name,
                payload.len()
            );
            Verdict::Close
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            // Retry the same bytes next tick; synthesised pings regenerate.
            if !from_ping {
                conn.pending = payload;
            }
            Verdict::Keep
        }
        Err(e) => {
            log::error!(
                "Error during send to {} socket {}[{index}]: {e}",
                ctx.kind(),
                ctx.name
            );
            Verdict::Close
        }
    }
}

fn log_lost_peer(ctx: &PumpContext<'_>, conn: &Connection, index: usize) {
    if let Some(peer) = conn.peer {
        log::warn!(
            "Lost connection to {peer} on {} socket {}[{index}]",
            ctx.kind(),
            ctx.name
        );
    }
}
