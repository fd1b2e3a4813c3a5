//! fos-sockd: socket layer driver
//!
//! Runs an echo listener, a one-shot fetch through the proxy-aware
//! establisher, or dumps the proxy settings read from the environment.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fos_socket::{AcceptorConfig, ConnectionAcceptor, ConnectionEstablisher, EchoHandler, ProxyConfig};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Blocking TCP connect/accept with SOCKS4 traversal
#[derive(Parser)]
#[command(name = "fos-sockd", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept connections and echo back whatever they send
    Echo {
        /// Port to listen on (0 picks one)
        #[arg(short, long, default_value_t = 7007)]
        port: u16,
    },

    /// Connect once, optionally send text, print the reply
    Fetch {
        host: String,
        port: u16,

        /// Text to send after connecting
        #[arg(short, long)]
        send: Option<String>,

        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },

    /// Print the proxy settings derived from SOCKS_* and USER
    Config,
}

fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Echo { port } => echo(port),
        Command::Fetch {
            host,
            port,
            send,
            timeout,
        } => fetch(&host, port, send.as_deref(), Duration::from_secs(timeout)),
        Command::Config => config(),
    }
}

fn echo(port: u16) -> Result<()> {
    let acceptor = ConnectionAcceptor::new(AcceptorConfig::default())?;
    let handle = acceptor
        .start(port, EchoHandler::new)
        .with_context(|| format!("cannot listen on port {}", port))?;

    info!("Echo listener ready on {}", handle.local_addr());

    // Ends only once every sender, the acceptor thread included, is gone
    for event in handle.events().iter() {
        info!("{:?}", event);
    }

    anyhow::bail!("acceptor on {} stopped", handle.local_addr())
}

fn fetch(host: &str, port: u16, send: Option<&str>, timeout: Duration) -> Result<()> {
    let proxy = ProxyConfig::global()?.clone();
    let establisher = ConnectionEstablisher::system(proxy)?;
    let mut conn = establisher
        .connect(host, port)
        .with_context(|| format!("cannot connect to {}:{}", host, port))?;

    info!(
        "Connected to {} ({})",
        conn.peer(),
        if conn.is_proxied() { "proxied" } else { "direct" }
    );

    if let Some(text) = send {
        conn.write_all(text.as_bytes())?;
        conn.flush()?;
    }

    conn.set_read_timeout(Some(timeout))?;
    let mut reply = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match conn.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => reply.extend_from_slice(&buf[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => break,
            Err(e) => return Err(e.into()),
        }
    }

    io::stdout().write_all(&reply)?;
    conn.close();

    let stats = establisher.stats();
    info!(
        "Attempts: {}, direct: {}, proxied: {}",
        stats.attempts, stats.direct, stats.proxied
    );
    Ok(())
}

fn config() -> Result<()> {
    let proxy = ProxyConfig::from_env()?;
    println!("{}", serde_json::to_string_pretty(&proxy)?);
    Ok(())
}
