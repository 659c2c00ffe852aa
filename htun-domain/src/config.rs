use std::time::Duration;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Largest request body the frame codec aggregates. Also caps the bytes
/// returned by a single poll response.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024; // 16 KiB

/// How long a poll with nothing to deliver stays suspended.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(25);

/// Inactivity after which the sweeper closes a tunnel.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Period of the idle sweeper.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Path under which every tunnel request lives.
pub const DEFAULT_PREFIX: &str = "/tunnel";

// ---------------------------------------------------------------------------
// TunnelConfig
// ---------------------------------------------------------------------------

/// Limits and timers consumed by the switch, the codec and the sweeper.
///
/// Set once at startup; never changed while the server runs.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    // ---
    pub max_body_bytes: usize,
    pub poll_timeout: Duration,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,

    /// Path prefix without a trailing slash, e.g. `/tunnel`.
    pub prefix: String,
}

// ---

impl Default for TunnelConfig {
    fn default() -> Self {
        // ---
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            prefix: DEFAULT_PREFIX.into(),
        }
    }
}

// ---

impl TunnelConfig {
    // ---
    /// Short timers for tests: 50 ms polls, 200 ms idle eviction.
    pub fn fast() -> Self {
        // ---
        Self {
            poll_timeout: Duration::from_millis(50),
            idle_timeout: Duration::from_millis(200),
            sweep_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    // ---

    /// Normalise a user-supplied prefix: leading slash, no trailing slash.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        // ---
        let trimmed = prefix.trim_matches('/');
        self.prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn prefix_is_normalised() {
        // ---
        assert_eq!(TunnelConfig::default().with_prefix("tunnel/").prefix, "/tunnel");
        assert_eq!(TunnelConfig::default().with_prefix("/a/b/").prefix, "/a/b");
        assert_eq!(TunnelConfig::default().with_prefix("/").prefix, "");
    }
}
