//! htun server daemon.
//!
//! Carries byte-stream tunnels over plain HTTP requests: each tunnel opened
//! by a client gets its own TCP connection to the configured upstream.
//!
//! Usage:
//!   htun-server --upstream 127.0.0.1:7000
//!   htun-server --bind 0.0.0.0:8080 --upstream db.internal:5432

use std::sync::Arc;

// ---

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---

mod classify;
mod config;
mod pipeline;
mod registry;
mod response;
mod state;
mod sweeper;
mod switch;
mod tcp_bridge;

// ---

use config::Config;
use pipeline::run_accept_loop;
use sweeper::spawn_idle_sweeper;
use tcp_bridge::TcpBridge;

// Gateway re-exports: siblings import via super::Symbol
pub use classify::{classify, is_tunnel_path, TunnelRequest};
pub use registry::TunnelRegistry;
pub use state::{TunnelSlot, TunnelSlotPtr};
pub use switch::{MessageSwitch, SwitchReply};

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
        .with_ansi(!no_color)
        .init();

    let tunnel_cfg = cfg.tunnel_config();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %cfg.bind,
        upstream = %cfg.upstream,
        prefix = %tunnel_cfg.prefix,
        "htun-server starting",
    );

    let bridge = Arc::new(TcpBridge::new(cfg.upstream.clone()));
    let switch = Arc::new(MessageSwitch::new(bridge, tunnel_cfg.clone()));

    // Idle eviction runs independently of request traffic.
    let sweeper = spawn_idle_sweeper(
        switch.registry().clone(),
        tunnel_cfg.idle_timeout,
        tunnel_cfg.sweep_interval,
    );

    let listener = TcpListener::bind(cfg.bind).await?;
    info!("HTTP listening on {}", listener.local_addr()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let accept = tokio::spawn(run_accept_loop(listener, switch.clone(), shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    shutdown_tx.send_replace(true);
    accept.await?;
    sweeper.abort();

    tracing::debug!(ids = ?switch.registry().ids(), "closing remaining tunnels");
    let closed = switch.registry().close_all();
    info!(closed, "all tunnels closed");

    Ok(())
}
