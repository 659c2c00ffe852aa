use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

// ---

use super::error::TunnelError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Header carrying the tunnel identifier.
///
/// Set on the OPEN response; accepted on requests as an alternative to the
/// `{prefix}/{id}/{action}` path form.
pub const TUNNEL_ID_HEADER: &str = "x-tunnel-id";

// ---------------------------------------------------------------------------
// TunnelId
// ---------------------------------------------------------------------------

/// Opaque identity of one logical tunnel.
///
/// Generated by the server on open and echoed by the client on every
/// subsequent request. Backed by a v4 UUID, so an identifier is never handed
/// out twice while an earlier request referencing it could be in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelId(Uuid);

// ---

impl TunnelId {
    // ---
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

// ---

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---

impl FromStr for TunnelId {
    // ---
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| TunnelError::Malformed(format!("bad tunnel id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Lifecycle of a tunnel. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    // ---
    /// Accepting send, poll and close requests.
    Open,

    /// Teardown in progress; final data is being handed to a pending poll.
    Closing,

    /// Backend torn down, buffers released. Every new request sees NotFound.
    Closed,
}

// ---

impl Phase {
    pub fn is_open(self) -> bool {
        self == Phase::Open
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
    fn display_parses_back() {
        // ---
        let id = TunnelId::new_random();
        let parsed: TunnelId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn garbage_is_malformed() {
        // ---
        let err = "not-a-tunnel".parse::<TunnelId>().unwrap_err();
        assert!(matches!(err, TunnelError::Malformed(_)));
        assert!(err.to_string().contains("not-a-tunnel"));
    }

    #[test]
    fn fresh_ids_differ() {
        assert_ne!(TunnelId::new_random(), TunnelId::new_random());
    }
}
