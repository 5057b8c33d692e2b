//! Process-wide socket registry.
//!
//! Maps socket names to live [`SocketHandle`]s for the administrative
//! surface.  Each socket's task registers itself when it starts and
//! unregisters when it exits, so the live list always mirrors the set of
//! running execution contexts.
//!
//! Lookup is a first-match linear scan and duplicate names are *not*
//! rejected — callers must not register two sockets under one name (the
//! second stays live and counts toward the total, but is unreachable by
//! name).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::driver::SocketHandle;
use crate::MAX_SOCKETS;

/// Registry of live sockets with a fixed capacity.
#[derive(Debug)]
pub struct SocketRegistry {
    entries: Mutex<Vec<SocketHandle>>,
    /// Monotonic count of every registration ever attempted, including
    /// those dropped for capacity.
    total_registered: AtomicUsize,
    capacity: usize,
}

impl Default for SocketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketRegistry {
    /// Registry with the default capacity of [`MAX_SOCKETS`].
    pub fn new() -> Self {
        Self::with_capacity(MAX_SOCKETS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(capacity)),
            total_registered: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Append a handle to the live list.
    ///
    /// Registration past capacity is silently dropped; the total counter
    /// still increments.
    pub fn register(&self, handle: SocketHandle) {
        self.total_registered.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().unwrap();
        if entries.len() < self.capacity {
            entries.push(handle);
        }
    }

    /// Remove a handle by identity, compacting and preserving order.
    pub fn unregister(&self, id: u64) {
        self.entries.lock().unwrap().retain(|h| h.id() != id);
    }

    /// Position of the first socket named `name`, if any.
    pub fn find_position(&self, name: &str) -> Option<usize> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .position(|h| h.name() == name)
    }

    /// Handle of the first socket named `name`, if any.
    pub fn find_handle(&self, name: &str) -> Option<SocketHandle> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|h| h.name() == name)
            .cloned()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Total registrations ever attempted.
    pub fn total_registered(&self) -> usize {
        self.total_registered.load(Ordering::Relaxed)
    }

    /// Log a diagnostic snapshot of every live entry.
    pub fn list(&self) {
        let entries = self.entries.lock().unwrap();
        log::info!(
            "Sockets in list {}. Sockets total {}.",
            entries.len(),
            self.total_registered.load(Ordering::Relaxed)
        );
        for (index, handle) in entries.iter().enumerate() {
            log::info!(
                "Socket[{index}] Name:{:16}|Port:{:5}|Loop:{:6}",
                handle.name(),
                handle.port(),
                handle.loop_count()
            );
        }
    }

    /// Snapshot of (name, port, loop counter) per live entry.
    pub fn snapshot(&self) -> Vec<(String, u16, usize)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|h| (h.name().to_string(), h.port(), h.loop_count()))
            .collect()
    }
}
