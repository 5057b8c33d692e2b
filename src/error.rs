//! Crate error type.
//!
//! Per-connection I/O failures are *not* represented here — the pump treats
//! them as connection-fatal and handles them in place (see [`crate::pump`]).
//! [`SocketError`] covers the failures that cross the API boundary:
//! configuration rejection, spawn-time validation and commands addressed to
//! a socket whose task has already exited.

use thiserror::Error;

use crate::config::{Role, Transport};
use crate::{MAX_IP_LEN, MAX_NAME_LEN, MAX_URL_LEN};

/// Errors surfaced by the public API.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Socket name longer than [`MAX_NAME_LEN`] bytes.
    #[error("socket name '{0}' exceeds {MAX_NAME_LEN} bytes")]
    NameTooLong(String),

    /// Target URL does not fit the bounded URL field.
    #[error("URL '{0}' must fit {MAX_URL_LEN} bytes")]
    UrlTooLong(String),

    /// Target IP literal does not fit the bounded IP field.
    #[error("IP address '{0}' must fit {MAX_IP_LEN} bytes")]
    IpTooLong(String),

    /// Transport the platform layer cannot express (e.g. `Raw`).
    #[error("unsupported transport {0:?}")]
    UnsupportedTransport(Transport),

    /// Role/transport combination with no defined lifecycle.
    #[error("unsupported role/transport combination {0:?}/{1:?}")]
    UnsupportedRole(Role, Transport),

    /// Command sent to a socket whose execution context has exited.
    #[error("socket '{0}' is not running")]
    NotRunning(String),

    /// Underlying I/O error from the OS.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
