//! htun example — echo upstream and smoke client.
//!
//! * `echo-upstream` runs a TCP echo server to stand in for the backend.
//!
//! * `smoke` drives a live `htun-server`: opens a tunnel, sends a message,
//!   polls until the echo comes back, closes, and checks the identifier is
//!   rejected afterwards.
//!
//! Run with:
//!   cargo run -p htun-example -- echo-upstream --bind 127.0.0.1:7000
//!   cargo run -p htun-server  -- --upstream 127.0.0.1:7000
//!   cargo run -p htun-example -- smoke --server http://127.0.0.1:8080

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use clap::{Parser, Subcommand};
use http::{Method, StatusCode};
use tracing_subscriber::EnvFilter;

mod client;
mod echo;

use client::TunnelClient;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "htun-example", about = "htun smoke client and echo upstream")]
struct Config {
    // ---
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    // ---
    /// Run a TCP echo server for htun-server to connect tunnels to.
    EchoUpstream {
        #[arg(long, default_value = "127.0.0.1:7000")]
        bind: SocketAddr,
    },

    /// Exercise open/send/poll/close against a live htun-server.
    Smoke {
        /// Base URL of the server.
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// Path prefix the server was started with.
        #[arg(long, default_value = "/tunnel")]
        prefix: String,

        /// Payload sent through the tunnel; the upstream must echo it.
        #[arg(long, default_value = "hello through the tunnel")]
        message: String,

        /// Maximum polls to wait for the echo.
        #[arg(long, default_value_t = 10)]
        polls: usize,
    },
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    let cfg = Config::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .without_time()
        .with_ansi(!no_color)
        .init();

    match cfg.cmd {
        Command::EchoUpstream { bind } => echo::run(bind).await,
        Command::Smoke {
            server,
            prefix,
            message,
            polls,
        } => smoke(&server, &prefix, message.into_bytes().into(), polls).await,
    }
}

// ---------------------------------------------------------------------------
// smoke
// ---------------------------------------------------------------------------

async fn smoke(server: &str, prefix: &str, message: Bytes, polls: usize) -> anyhow::Result<()> {
    // ---
    let client = TunnelClient::new(server, prefix);

    let id = client.open().await?;
    println!("  opened:   {id}");

    client.send(id, message.clone()).await?;
    println!("  sent:     {} bytes", message.len());

    let mut echoed = BytesMut::new();
    for n in 1..=polls {
        let chunk = client.poll(id).await?;
        println!("  poll {n:>2}:  {} bytes", chunk.len());
        echoed.extend_from_slice(&chunk);
        if echoed.len() >= message.len() {
            break;
        }
    }

    if echoed != message {
        anyhow::bail!(
            "echo mismatch after {polls} polls: sent {:?}, got {:?}",
            String::from_utf8_lossy(&message),
            String::from_utf8_lossy(&echoed),
        );
    }
    println!("  echoed:   {:?} ✓", String::from_utf8_lossy(&echoed));

    client.close(id).await?;
    println!("  closed:   {id}");

    let after = client
        .exchange(Method::GET, &format!("{id}/poll"), Bytes::new())
        .await?;
    if after.status != StatusCode::NOT_FOUND {
        anyhow::bail!("poll after close returned {}, expected 404", after.status);
    }
    println!("  poll after close: {} ✓", after.status);

    Ok(())
}
