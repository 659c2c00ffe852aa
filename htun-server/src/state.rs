//! [`TunnelState`] — per-tunnel buffers, pending poll and lifecycle, plus
//! the [`TunnelSlot`] that guards it.
//!
//! # Lock discipline
//!
//! Each tunnel has its own `std::sync::Mutex`. It is held only for short
//! synchronous sections (buffer moves, non-blocking bridge calls) and never
//! across an `.await`, so a suspended poll never blocks other requests for
//! the same tunnel. Bridge callbacks only touch a [`Notify`], never this
//! lock, so the bridge may fire them from inside a call made under it.
//!
//! # Buffers
//!
//! ```text
//!  client ── send ──► inbound ──► bridge.write          (drained on every send)
//!  client ◄── poll ── outbound ◄── bridge.read_available (FIFO, capped per poll)
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

// ---

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

// ---

use htun_domain::{BridgeHandlePtr, Phase, Result, TunnelError, TunnelId};

// ---------------------------------------------------------------------------
// PendingPoll
// ---------------------------------------------------------------------------

/// The one suspended poll a tunnel may have.
struct PendingPoll {
    // ---
    /// Distinguishes this poll from a later one after timeout or cancel.
    ticket: u64,

    wake: Arc<Notify>,
}

// ---------------------------------------------------------------------------
// TunnelState
// ---------------------------------------------------------------------------

pub struct TunnelState {
    // ---
    id: TunnelId,
    phase: Phase,

    /// Client bytes not yet handed to the bridge.
    inbound: BytesMut,

    /// Bridge bytes not yet returned to the client.
    outbound: BytesMut,

    pending: Option<PendingPoll>,
    next_ticket: u64,

    /// Bytes left for the poll that was pending when the tunnel closed.
    final_flush: Option<Bytes>,

    /// Set once the bridge reported failure or EOF; outbound is still drained first.
    backend_gone: Option<String>,

    last_activity: Instant,
    bridge: BridgeHandlePtr,
}

// ---

impl TunnelState {
    // ---
    pub fn new(id: TunnelId, bridge: BridgeHandlePtr) -> Self {
        // ---
        Self {
            id,
            phase: Phase::Open,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            pending: None,
            next_ticket: 0,
            final_flush: None,
            backend_gone: None,
            last_activity: Instant::now(),
            bridge,
        }
    }

    // ---

    pub fn id(&self) -> TunnelId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    // ---

    /// NotFound unless the tunnel is still open.
    pub fn ensure_open(&self) -> Result<()> {
        // ---
        if self.phase.is_open() {
            Ok(())
        } else {
            Err(TunnelError::NotFound(self.id))
        }
    }

    // ---

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn has_pending_poll(&self) -> bool {
        self.pending.is_some()
    }

    // ---

    /// Append client bytes and hand everything buffered to the bridge.
    pub fn deliver_inbound(&mut self, body: &[u8]) -> Result<()> {
        // ---
        if let Some(reason) = &self.backend_gone {
            return Err(TunnelError::Backend(reason.clone()));
        }

        self.inbound.extend_from_slice(body);
        let chunk = self.inbound.split().freeze();
        self.bridge.write(chunk)
    }

    // ---

    /// Take up to `max` bytes for the client.
    ///
    /// `Ok(None)` means nothing is available yet. Once the bridge is gone,
    /// bytes already pulled are still handed out before the failure shows.
    pub fn take_outbound(&mut self, max: usize) -> Result<Option<Bytes>> {
        // ---
        self.pull_from_bridge();

        if !self.outbound.is_empty() {
            let n = self.outbound.len().min(max.max(1));
            return Ok(Some(self.outbound.split_to(n).freeze()));
        }

        match &self.backend_gone {
            Some(reason) => Err(TunnelError::Backend(reason.clone())),
            None => Ok(None),
        }
    }

    // ---

    fn pull_from_bridge(&mut self) {
        // ---
        if self.backend_gone.is_some() {
            return;
        }
        match self.bridge.read_available() {
            Ok(data) => self.outbound.extend_from_slice(&data),
            Err(e) => {
                tracing::debug!(id = %self.id, "bridge reports backend gone: {e}");
                self.backend_gone = Some(e.to_string());
            }
        }
    }

    // ---

    /// Occupy the pending-poll slot and ask the bridge to wake `wake` when
    /// data shows up. Returns the ticket identifying this poll, or
    /// [`TunnelError::PollConflict`] if the slot is taken.
    pub fn arm_poll(&mut self, wake: Arc<Notify>) -> Result<u64> {
        // ---
        if self.pending.is_some() {
            return Err(TunnelError::PollConflict(self.id));
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let w = wake.clone();
        self.bridge.on_data_available(Box::new(move || w.notify_one()));
        self.pending = Some(PendingPoll { ticket, wake });
        Ok(ticket)
    }

    // ---

    /// Free the pending-poll slot if `ticket` still holds it.
    pub fn disarm_poll(&mut self, ticket: u64) -> bool {
        // ---
        match &self.pending {
            Some(p) if p.ticket == ticket => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    // ---

    /// Bytes reserved at close time for the poll that was pending then.
    pub fn take_final_flush(&mut self) -> Bytes {
        self.final_flush.take().unwrap_or_default()
    }

    // ---

    /// OPEN → CLOSING → CLOSED.
    ///
    /// A pending poll gets every remaining outbound byte and is woken. The
    /// bridge is torn down and both buffers are released. The returned
    /// error, if any, is the bridge's teardown failure; the tunnel is
    /// closed regardless. No-op when already closed.
    pub fn close(&mut self) -> Result<()> {
        // ---
        if self.phase == Phase::Closed {
            return Ok(());
        }
        self.phase = Phase::Closing;

        if let Some(pending) = self.pending.take() {
            self.pull_from_bridge();
            let remaining = std::mem::take(&mut self.outbound).freeze();
            self.final_flush = Some(remaining);
            pending.wake.notify_one();
        }

        let result = self.bridge.close();

        self.inbound = BytesMut::new();
        self.outbound = BytesMut::new();
        self.phase = Phase::Closed;

        result
    }
}

// ---------------------------------------------------------------------------
// TunnelSlot
// ---------------------------------------------------------------------------

/// Registry entry: an identifier plus the lock around its state.
pub struct TunnelSlot {
    // ---
    id: TunnelId,
    state: Mutex<TunnelState>,
}

/// Convenience type alias for a shared [`TunnelSlot`].
pub type TunnelSlotPtr = Arc<TunnelSlot>;

// ---

impl TunnelSlot {
    // ---
    pub fn new(id: TunnelId, bridge: BridgeHandlePtr) -> TunnelSlotPtr {
        // ---
        Arc::new(Self {
            id,
            state: Mutex::new(TunnelState::new(id, bridge)),
        })
    }

    // ---

    pub fn id(&self) -> TunnelId {
        self.id
    }

    // ---

    /// Take this tunnel's exclusion scope. Never hold the guard across `.await`.
    pub fn lock(&self) -> MutexGuard<'_, TunnelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
