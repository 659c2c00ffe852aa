//! CLI configuration for `htun-server`.
//!
//! Usage:
//!   htun-server --upstream 127.0.0.1:7000
//!   htun-server --bind 0.0.0.0:8080 --upstream db.internal:5432 --poll-timeout-ms 10000

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use htun_domain::{
    // ---
    TunnelConfig,
    DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_BODY_BYTES,
    DEFAULT_POLL_TIMEOUT,
    DEFAULT_PREFIX,
    DEFAULT_SWEEP_INTERVAL,
};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "htun-server", about = "Byte-stream tunnels over plain HTTP")]
pub struct Config {
    // ---
    /// TCP address the HTTP listener binds.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// TCP target every tunnel connects to when it is opened
    /// (host:port, resolved per tunnel).
    #[arg(long)]
    pub upstream: String,

    /// Path prefix under which the tunnel endpoints live.
    #[arg(long, default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    /// Largest request body accepted; bigger bodies get 413.
    /// Also caps the bytes returned by one poll.
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// How long a poll waits for backend data before returning empty.
    #[arg(long, default_value_t = DEFAULT_POLL_TIMEOUT.as_millis() as u64)]
    pub poll_timeout_ms: u64,

    /// Inactivity after which a tunnel is closed by the sweeper.
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    pub idle_timeout_secs: u64,

    /// How often the idle sweeper runs.
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL.as_millis() as u64)]
    pub sweep_interval_ms: u64,
}

// ---

impl Config {
    // ---
    /// The limits and timers handed to the switch, codec and sweeper.
    pub fn tunnel_config(&self) -> TunnelConfig {
        // ---
        TunnelConfig {
            max_body_bytes: self.max_body_bytes,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms.max(1)),
            prefix: String::new(),
        }
        .with_prefix(&self.prefix)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
