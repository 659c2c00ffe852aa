use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// ---

use bytes::{Bytes, BytesMut};

// ---

use htun_domain::{
    // ---
    BridgeHandle,
    DataCallback,
    OutboundQueue,
    Result,
    TunnelError,
    TunnelId,
};

// ---

use super::SimBridgeConfig;

// ---------------------------------------------------------------------------
// SimShared
// ---------------------------------------------------------------------------

/// State shared between the switch-facing [`SimHandle`] and the test-facing
/// [`SimPeer`] of one tunnel.
pub(crate) struct SimShared {
    // ---
    id: TunnelId,
    config: SimBridgeConfig,

    /// Everything the switch delivered, in delivery order.
    inbound: Mutex<BytesMut>,

    /// Bytes the peer produced for the client.
    outbound: OutboundQueue,

    writes: AtomicUsize,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

// ---

impl SimShared {
    // ---
    pub(crate) fn new(id: TunnelId, config: SimBridgeConfig) -> Arc<Self> {
        // ---
        Arc::new(Self {
            id,
            config,
            inbound: Mutex::new(BytesMut::new()),
            outbound: OutboundQueue::new(),
            writes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        })
    }
}

// ---------------------------------------------------------------------------
// SimHandle
// ---------------------------------------------------------------------------

/// Switch-facing end of a simulated backend connection.
pub(crate) struct SimHandle {
    // ---
    shared: Arc<SimShared>,
}

// ---

impl SimHandle {
    pub(crate) fn new(shared: Arc<SimShared>) -> Self {
        Self { shared }
    }
}

// ---

impl BridgeHandle for SimHandle {
    // ---
    fn tunnel_id(&self) -> TunnelId {
        self.shared.id
    }

    fn write(&self, data: Bytes) -> Result<()> {
        // ---
        let s = &self.shared;
        if s.closed.load(Ordering::Acquire) {
            return Err(TunnelError::Backend("write on closed handle".into()));
        }

        if let Some(limit) = s.config.fail_write_after {
            if s.writes.load(Ordering::Acquire) >= limit {
                s.outbound.close("simulated write failure");
                return Err(TunnelError::Backend("simulated write failure".into()));
            }
        }

        s.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&data);
        s.writes.fetch_add(1, Ordering::AcqRel);

        if s.config.echo {
            s.outbound.push(&data);
        }

        tracing::trace!(id = %s.id, bytes = data.len(), "sim bridge: inbound write");
        Ok(())
    }

    fn read_available(&self) -> Result<Bytes> {
        self.shared.outbound.drain()
    }

    fn on_data_available(&self, callback: DataCallback) {
        self.shared.outbound.on_data_available(callback);
    }

    fn close(&self) -> Result<()> {
        // ---
        let s = &self.shared;
        s.close_calls.fetch_add(1, Ordering::AcqRel);
        s.closed.store(true, Ordering::Release);
        s.outbound.close("closed by switch");

        if s.config.fail_close {
            return Err(TunnelError::Backend("simulated teardown failure".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SimPeer
// ---------------------------------------------------------------------------

/// Test-facing end of a simulated backend connection.
///
/// Plays the application: observes what the client sent and produces bytes
/// for the client to poll.
#[derive(Clone)]
pub struct SimPeer {
    // ---
    shared: Arc<SimShared>,
}

// ---

impl SimPeer {
    // ---
    pub(crate) fn new(shared: Arc<SimShared>) -> Self {
        Self { shared }
    }

    // ---

    pub fn tunnel_id(&self) -> TunnelId {
        self.shared.id
    }

    // ---

    /// Snapshot of every byte delivered to the backend so far.
    pub fn received(&self) -> Bytes {
        // ---
        let inbound = self
            .shared
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Bytes::copy_from_slice(&inbound)
    }

    // ---

    /// Number of successful writes the switch made.
    pub fn write_count(&self) -> usize {
        self.shared.writes.load(Ordering::Acquire)
    }

    // ---

    /// Produce bytes for the client. Wakes a pending poll.
    pub fn produce(&self, data: &[u8]) {
        self.shared.outbound.push(data);
    }

    // ---

    /// Backend goes away on its own, like an upstream EOF.
    pub fn hang_up(&self) {
        self.shared.outbound.close("backend hung up");
    }

    // ---

    /// Whether the switch has torn this backend down.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    // ---

    /// How many times `close` was called on the handle.
    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;

    use htun_domain::{BridgeHandle, TunnelId};

    use super::{SimHandle, SimPeer, SimShared};
    use crate::SimBridgeConfig;

    fn pair(config: SimBridgeConfig) -> (SimHandle, SimPeer) {
        // ---
        let shared = SimShared::new(TunnelId::new_random(), config);
        (SimHandle::new(shared.clone()), SimPeer::new(shared))
    }

    // ---

    #[test]
    fn writes_reach_peer_in_order() {
        // ---
        let (handle, peer) = pair(SimBridgeConfig::perfect());
        handle.write(Bytes::from_static(b"ab")).unwrap();
        handle.write(Bytes::from_static(b"cd")).unwrap();
        assert_eq!(peer.received(), Bytes::from_static(b"abcd"));
        assert_eq!(peer.write_count(), 2);
    }

    #[test]
    fn echo_mirrors_writes() {
        // ---
        let (handle, _peer) = pair(SimBridgeConfig::echo());
        handle.write(Bytes::from_static(b"ping")).unwrap();
        assert_eq!(handle.read_available().unwrap(), Bytes::from_static(b"ping"));
    }

    #[test]
    fn produce_wakes_callback() {
        // ---
        let (handle, peer) = pair(SimBridgeConfig::perfect());
        let woke = Arc::new(AtomicBool::new(false));
        let w = woke.clone();
        handle.on_data_available(Box::new(move || w.store(true, Ordering::SeqCst)));

        peer.produce(b"xy");
        assert!(woke.load(Ordering::SeqCst));
        assert_eq!(handle.read_available().unwrap(), Bytes::from_static(b"xy"));
    }

    #[test]
    fn write_failure_marks_backend_gone() {
        // ---
        let (handle, peer) = pair(SimBridgeConfig::failing_writes_after(1));
        handle.write(Bytes::from_static(b"ok")).unwrap();
        assert!(handle.write(Bytes::from_static(b"boom")).is_err());
        assert!(handle.read_available().is_err());
        assert_eq!(peer.received(), Bytes::from_static(b"ok"));
    }

    #[test]
    fn close_is_observable_and_blocks_writes() {
        // ---
        let (handle, peer) = pair(SimBridgeConfig::perfect());
        handle.close().unwrap();
        assert!(peer.is_closed());
        assert_eq!(peer.close_calls(), 1);
        assert!(handle.write(Bytes::from_static(b"late")).is_err());
    }
}
