use thiserror::Error;

// ---

use super::tunnel::TunnelId;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Coarse classification of a [`TunnelError`].
///
/// Drives both the HTTP status mapping and the propagation policy:
/// only [`ErrorKind::Backend`] affects the tunnel itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // ---
    /// Oversized or malformed HTTP; rejected before the switch.
    Transport,

    /// Request shape not understood, or a conflicting pending poll.
    Protocol,

    /// The tunnel identifier does not name a live tunnel.
    NotFound,

    /// The backend bridge failed; the tunnel is force-closed.
    Backend,
}

// ---------------------------------------------------------------------------
// TunnelError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TunnelError {
    // ---
    #[error("request body exceeds limit of {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("unrecognized tunnel request: {0}")]
    Unrecognized(String),

    #[error("poll already pending for tunnel {0}")]
    PollConflict(TunnelId),

    #[error("tunnel not found: {0}")]
    NotFound(TunnelId),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

impl TunnelError {
    // ---
    pub fn kind(&self) -> ErrorKind {
        // ---
        match self {
            TunnelError::BodyTooLarge { .. } | TunnelError::Malformed(_) => ErrorKind::Transport,
            TunnelError::Unrecognized(_) | TunnelError::PollConflict(_) => ErrorKind::Protocol,
            TunnelError::NotFound(_) => ErrorKind::NotFound,
            TunnelError::Backend(_) | TunnelError::Io(_) => ErrorKind::Backend,
        }
    }
}

// ---

pub type Result<T> = std::result::Result<T, TunnelError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
