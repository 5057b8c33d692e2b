//! Entry point for `sockmux`.
//!
//! Parses CLI arguments and spawns either a **server** or **client** managed
//! socket, then serves an interactive admin console on stdin.  All actual
//! lifecycle work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, the console loop).

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use sockmux::{
    DnsResolver, Interface, LinkOracle, NullEvents, SocketConfig, SocketDriver, SocketRegistry,
    Transport,
};

/// Named-socket connection manager.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run a listening socket accepting up to max-clients connections.
    Server {
        /// Socket name for the admin console.
        #[arg(short, long, default_value = "srv")]
        name: String,
        /// Port to listen on.
        #[arg(short, long, default_value_t = 9000)]
        port: u16,
        /// Require the identification handshake before sending.
        #[arg(long)]
        identify: bool,
    },
    /// Run an outbound socket with automatic reconnect.
    Client {
        /// Socket name for the admin console.
        #[arg(short, long, default_value = "cli")]
        name: String,
        /// Target host IP literal.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Target hostname; overrides --host when it resolves.
        #[arg(long, default_value = "")]
        url: String,
        /// Target port.
        #[arg(short, long, default_value_t = 9000)]
        port: u16,
        /// Send a keepalive ping line after 10 s of idle.
        #[arg(long)]
        ping: bool,
    },
}

/// Host-network oracle: a single always-connected interface bound to all
/// local addresses.
struct HostLink;

impl LinkOracle for HostLink {
    fn is_connected(&self, _interface: Interface) -> bool {
        true
    }

    fn local_ip(&self, _interface: Interface) -> Option<Ipv4Addr> {
        Some(Ipv4Addr::UNSPECIFIED)
    }

    fn mac(&self, _interface: Interface) -> [u8; 6] {
        [0x02, 0x00, 0x00, 0xA0, 0xB0, 0xC0]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let registry = Arc::new(SocketRegistry::new());

    let config = match cli.mode {
        Mode::Server {
            name,
            port,
            identify,
        } => {
            let mut cfg = SocketConfig::server(&name, Transport::Stream, port);
            cfg.flags.forced_identification = identify;
            cfg.flags.auto_send_enable = true;
            cfg.flags.fix_line_endings = true;
            cfg
        }
        Mode::Client {
            name,
            host,
            url,
            port,
            ping,
        } => {
            let mut cfg = SocketConfig::client(&name, Transport::Stream, port);
            cfg.host_ip = host;
            cfg.url = url;
            cfg.flags.auto_send_enable = true;
            cfg.flags.keepalive_ping = ping;
            cfg
        }
    };

    let driver = SocketDriver::spawn(
        config,
        registry.clone(),
        Arc::new(HostLink),
        Arc::new(NullEvents),
        Arc::new(DnsResolver),
    )?;

    console(&registry).await?;
    driver.shutdown().await;
    Ok(())
}

/// Interactive admin console; returns on `quit` or stdin EOF.
async fn console(registry: &SocketRegistry) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("commands: list | reset <name> | stop <name> | start <name> | url <name> <url> | ip <name> <ip> | quit");

    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else { continue };
        match (cmd, words.next(), words.next()) {
            ("list", _, _) => registry.list(),
            ("quit", _, _) => break,
            (action, Some(name), arg) => {
                let Some(handle) = registry.find_handle(name) else {
                    eprintln!("no socket named '{name}'");
                    continue;
                };
                let outcome = match (action, arg) {
                    ("reset", _) => handle.reset(),
                    ("stop", _) => handle.stop(),
                    ("start", _) => handle.start(),
                    ("url", Some(url)) => handle.set_url(url),
                    ("ip", Some(ip)) => handle.set_host_ip(ip),
                    _ => {
                        eprintln!("unknown command '{line}'");
                        continue;
                    }
                };
                if let Err(e) = outcome {
                    eprintln!("{e}");
                }
            }
            _ => eprintln!("unknown command '{line}'"),
        }
    }
    Ok(())
}
