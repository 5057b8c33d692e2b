//! Adapter interfaces, the connectivity oracle and the interface selector.
//!
//! A socket is configured with a primary and a backup [`Interface`] plus a
//! priority flag.  Once per tick the selector consults the [`LinkOracle`]
//! and decides which interface the socket should be using:
//!
//! - an invalid (unset) selection is forced to the primary and flags a
//!   disconnect so the next connect starts clean;
//! - switching *to* the preferred interface while the current one still
//!   works tears the session down first (disconnect flagged);
//! - failing over *away* from a dead interface does not flag a disconnect —
//!   there is nothing live left to tear down, and the broken session's own
//!   cleanup path handles the rest.

use std::net::Ipv4Addr;

/// One physical/logical network attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    /// Wi-Fi station link.
    Station,
    /// Wi-Fi soft access-point link.
    AccessPoint,
    /// Wired Ethernet link.
    Ethernet,
}

impl std::fmt::Display for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Station => "Wifi Station",
            Self::AccessPoint => "Wifi Soft-AP",
            Self::Ethernet => "EthernetLAN",
        };
        write!(f, "{name}")
    }
}

/// Primary/backup interface pair with priority policy.
#[derive(Debug, Clone, Copy)]
pub struct InterfacePair {
    pub primary: Interface,
    pub backup: Interface,
    /// When `true` the backup interface wins whenever both are usable.
    pub prefer_backup: bool,
}

/// Live connectivity oracle for the device's adapters.
///
/// Implemented by the surrounding driver layer (Wi-Fi/Ethernet link-status
/// providers); the socket core only ever queries it.
pub trait LinkOracle: Send + Sync {
    /// `true` while the interface has link/association.
    fn is_connected(&self, interface: Interface) -> bool;

    /// Local IP address assigned to the interface, if any.
    fn local_ip(&self, interface: Interface) -> Option<Ipv4Addr>;

    /// Hardware address of the interface (identification replies).
    fn mac(&self, interface: Interface) -> [u8; 6];
}

/// Result of one selector pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOutcome {
    /// A connected interface is currently selected.
    pub usable: bool,
    /// The active session must be torn down before reconnecting.
    pub disconnect: bool,
}

/// Run one selection pass, possibly switching `current`.
///
/// `current` is `None` until the first pass (and after runtime resets);
/// that state forces the primary and a disconnect request.
pub fn select_interface(
    current: &mut Option<Interface>,
    pair: &InterfacePair,
    oracle: &dyn LinkOracle,
    name: &str,
) -> SelectOutcome {
    let mut usable = false;
    let mut disconnect = false;

    match *current {
        None => {
            log::error!("Socket {name} no valid interface selected");
            *current = Some(pair.primary);
            disconnect = true;
        }
        Some(iface) if iface == pair.primary => {
            if oracle.is_connected(pair.primary) {
                usable = true;
                if pair.prefer_backup && oracle.is_connected(pair.backup) {
                    log::warn!("Socket {name} switch interface PRIMARY -> BACKUP");
                    *current = Some(pair.backup);
                    disconnect = true;
                }
            } else if oracle.is_connected(pair.backup) {
                log::warn!("Socket {name} failover PRIMARY -> BACKUP");
                *current = Some(pair.backup);
                usable = true;
            }
        }
        Some(iface) if iface == pair.backup => {
            if oracle.is_connected(pair.backup) {
                usable = true;
                if !pair.prefer_backup && oracle.is_connected(pair.primary) {
                    log::warn!("Socket {name} switch interface BACKUP -> PRIMARY");
                    *current = Some(pair.primary);
                    disconnect = true;
                }
            } else if oracle.is_connected(pair.primary) {
                log::warn!("Socket {name} failover BACKUP -> PRIMARY");
                *current = Some(pair.primary);
                usable = true;
            }
        }
        Some(other) => {
            // Selection left over from an earlier interface pair.
            log::error!("Socket {name} unexpected interface {other}");
        }
    }

    SelectOutcome { usable, disconnect }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Oracle {
        sta: AtomicBool,
        eth: AtomicBool,
    }

    impl Oracle {
        fn new(sta: bool, eth: bool) -> Self {
            Self {
                sta: AtomicBool::new(sta),
                eth: AtomicBool::new(eth),
            }
        }

        fn set(&self, iface: Interface, up: bool) {
            match iface {
                Interface::Station => self.sta.store(up, Ordering::Relaxed),
                Interface::Ethernet => self.eth.store(up, Ordering::Relaxed),
                Interface::AccessPoint => {}
            }
        }
    }

    impl LinkOracle for Oracle {
        fn is_connected(&self, interface: Interface) -> bool {
            match interface {
                Interface::Station => self.sta.load(Ordering::Relaxed),
                Interface::Ethernet => self.eth.load(Ordering::Relaxed),
                Interface::AccessPoint => false,
            }
        }

        fn local_ip(&self, _interface: Interface) -> Option<Ipv4Addr> {
            Some(Ipv4Addr::LOCALHOST)
        }

        fn mac(&self, _interface: Interface) -> [u8; 6] {
            [0; 6]
        }
    }

    fn pair(prefer_backup: bool) -> InterfacePair {
        InterfacePair {
            primary: Interface::Ethernet,
            backup: Interface::Station,
            prefer_backup,
        }
    }

    #[test]
    fn unset_selection_forces_primary_and_disconnect() {
        let oracle = Oracle::new(false, false);
        let mut current = None;
        let out = select_interface(&mut current, &pair(false), &oracle, "t");
        assert_eq!(current, Some(Interface::Ethernet));
        assert!(!out.usable);
        assert!(out.disconnect);
    }

    #[test]
    fn primary_connected_is_usable_without_switch() {
        let oracle = Oracle::new(false, true);
        let mut current = Some(Interface::Ethernet);
        let out = select_interface(&mut current, &pair(false), &oracle, "t");
        assert!(out.usable);
        assert!(!out.disconnect);
        assert_eq!(current, Some(Interface::Ethernet));
    }

    #[test]
    fn failover_to_backup_does_not_force_disconnect() {
        let oracle = Oracle::new(true, false); // eth down, sta up
        let mut current = Some(Interface::Ethernet);
        let out = select_interface(&mut current, &pair(false), &oracle, "t");
        assert!(out.usable);
        assert!(!out.disconnect);
        assert_eq!(current, Some(Interface::Station));
    }

    #[test]
    fn preference_switch_forces_disconnect() {
        // Running on backup, primary-priority policy, primary comes back.
        let oracle = Oracle::new(true, true);
        let mut current = Some(Interface::Station);
        let out = select_interface(&mut current, &pair(false), &oracle, "t");
        assert!(out.usable);
        assert!(out.disconnect);
        assert_eq!(current, Some(Interface::Ethernet));
    }

    #[test]
    fn backup_priority_switch_from_primary_forces_disconnect() {
        let oracle = Oracle::new(true, true);
        let mut current = Some(Interface::Ethernet);
        let out = select_interface(&mut current, &pair(true), &oracle, "t");
        assert!(out.usable);
        assert!(out.disconnect);
        assert_eq!(current, Some(Interface::Station));
    }

    #[test]
    fn never_usable_while_both_interfaces_down() {
        let oracle = Oracle::new(false, false);
        let mut current = Some(Interface::Ethernet);
        for _ in 0..3 {
            let out = select_interface(&mut current, &pair(false), &oracle, "t");
            assert!(!out.usable);
            assert!(!out.disconnect);
        }
    }

    #[test]
    fn selection_never_lands_on_disconnected_interface() {
        // Random-ish walk over connectivity states; whenever the selector
        // reports usable, the selected interface must really be connected.
        let oracle = Oracle::new(false, false);
        let p = pair(false);
        let mut current = None;
        let states = [
            (true, true),
            (true, false),
            (false, false),
            (false, true),
            (true, true),
            (false, false),
            (true, false),
        ];
        for (sta, eth) in states {
            oracle.set(Interface::Station, sta);
            oracle.set(Interface::Ethernet, eth);
            let out = select_interface(&mut current, &p, &oracle, "t");
            if out.usable {
                assert!(oracle.is_connected(current.unwrap()));
            }
        }
    }
}
