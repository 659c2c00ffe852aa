use std::time::Duration;

// ---------------------------------------------------------------------------
// SimBridgeConfig
// ---------------------------------------------------------------------------

/// Configuration for the in-process backend bridge.
///
/// All fields default to a well-behaved backend: connects instantly,
/// accepts every write, tears down cleanly, produces nothing on its own.
#[derive(Debug, Clone, Default)]
pub struct SimBridgeConfig {
    // ---
    /// Every `connect` fails with a backend error.
    pub refuse_connect: bool,

    /// Delay before `connect` resolves. Zero = immediate.
    pub connect_delay: Duration,

    /// Number of writes accepted before every further write fails and the
    /// backend is marked gone. `None` = never fail.
    pub fail_write_after: Option<usize>,

    /// `close` reports a teardown failure (the handle still closes).
    pub fail_close: bool,

    /// Copy every inbound write straight back to the outbound side.
    pub echo: bool,
}

// ---

impl SimBridgeConfig {
    // ---
    /// Well-behaved backend. Useful as a baseline.
    pub fn perfect() -> Self {
        Self::default()
    }

    // ---

    /// Backend that echoes inbound bytes back to the client.
    pub fn echo() -> Self {
        // ---
        Self {
            echo: true,
            ..Default::default()
        }
    }

    // ---

    /// Backend that cannot be reached.
    pub fn refusing() -> Self {
        // ---
        Self {
            refuse_connect: true,
            ..Default::default()
        }
    }

    // ---

    /// Backend that breaks after accepting `n` writes.
    pub fn failing_writes_after(n: usize) -> Self {
        // ---
        Self {
            fail_write_after: Some(n),
            ..Default::default()
        }
    }
}
