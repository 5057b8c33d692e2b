//! Identification gate: the inline startup handshake.
//!
//! When forced identification is configured, a fresh connection starts with
//! the send side *closed*: buffered application data is withheld until the
//! peer issues a recognised 7-byte query, or a 10 s timeout force-opens the
//! gate.  Two queries exist:
//!
//! - `"man mac"` — reply with the MAC/version line but keep the gate
//!   closed; the peer is expected to follow up with a version query.
//! - `"man ver"` — reply and open the gate.
//!
//! The reply wire format is fixed and must be reproduced byte-for-byte for
//! interoperability with existing peers:
//!
//! ```text
//! XX:XX:XX:XX:XX:XX\rMAC:XX:XX:XX:XX:XX:XX\rVersion:MAJ.MIN.BBBBB\r
//! ```
//!
//! where `BBBBB` is the build (patch) number zero-padded to five digits.
//!
//! This module owns only the gate state machine and the reply formatting;
//! the pump performs the actual socket writes (see [`crate::pump`]).

use crate::{IDENTIFY_TIMEOUT, TICK_INTERVAL};

/// MAC query prefix (gate stays closed after the reply).
pub const QUERY_MAC: &[u8] = b"man mac";

/// Version query prefix (gate opens after the reply).
pub const QUERY_VERSION: &[u8] = b"man ver";

/// What the pump should do with an inbound payload while the gate matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    /// Send an identification reply; `open` says whether the handshake is
    /// complete afterwards.
    Reply { open: bool },
    /// Not a recognised query; log and ignore.
    Ignore,
}

/// Per-connection gate state.
#[derive(Debug, Clone)]
pub struct GateState {
    /// Identification still outstanding.
    pub needs_identification: bool,
    /// Outbound data flow released.
    pub send_enable: bool,
    /// Ticks spent with the gate closed, for the force-open timeout.
    closed_ticks: u32,
}

impl GateState {
    /// Initial state for a fresh connection.
    ///
    /// With forced identification the gate starts closed; otherwise
    /// `auto_send` decides whether sending is released immediately.
    pub fn new(forced_identification: bool, auto_send: bool) -> Self {
        Self {
            needs_identification: forced_identification,
            send_enable: if forced_identification { false } else { auto_send },
            closed_ticks: 0,
        }
    }

    /// Classify an inbound payload while identification is outstanding.
    ///
    /// Opens the gate when the version query is seen.  Callers must only
    /// invoke this while [`Self::needs_identification`] is `true`.
    pub fn classify(&mut self, data: &[u8]) -> GateAction {
        if data.starts_with(QUERY_MAC) {
            // The version query is still expected; keep the gate closed.
            GateAction::Reply { open: false }
        } else if data.starts_with(QUERY_VERSION) {
            self.open();
            GateAction::Reply { open: true }
        } else {
            GateAction::Ignore
        }
    }

    /// Account one tick spent with the gate closed.
    ///
    /// Returns `true` when the timeout expired this tick: the caller opens
    /// the gate (and, with forced identification, sends one unsolicited
    /// reply first).
    pub fn tick_closed(&mut self) -> bool {
        self.closed_ticks += 1;
        let limit = (IDENTIFY_TIMEOUT.as_millis() / TICK_INTERVAL.as_millis()) as u32;
        if self.closed_ticks >= limit {
            self.open();
            return true;
        }
        false
    }

    /// Release outbound flow and mark identification complete.
    pub fn open(&mut self) {
        self.needs_identification = false;
        self.send_enable = true;
        self.closed_ticks = 0;
    }
}

/// `AA:BB:CC:DD:EE:FF` (upper-case hex, colon separated).
pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Build the identification reply payload for `mac`.
pub fn identification_reply(mac: &[u8; 6]) -> Vec<u8> {
    let mac = format_mac(mac);
    let major = env!("CARGO_PKG_VERSION_MAJOR");
    let minor = env!("CARGO_PKG_VERSION_MINOR");
    let build: u32 = env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0);
    format!("{mac}\rMAC:{mac}\rVersion:{major}.{minor}.{build:05}\r").into_bytes()
}
