//! [`MessageSwitch`] — maps classified requests onto tunnel state.
//!
//! ```text
//!  TunnelRequest ──► dispatch ──┬─ Open  ──► registry.create ──► bridge.connect
//!                               ├─ Send  ──► inbound ──► bridge.write
//!                               ├─ Poll  ──► outbound, or suspend on Notify
//!                               └─ Close ──► flush pending poll, teardown, remove
//! ```
//!
//! Every backend failure force-closes the tunnel and removes it, so the
//! failing request sees 502 and every later one 404.

use std::sync::Arc;

// ---

use bytes::Bytes;
use tokio::sync::Notify;

// ---

use htun_domain::{
    // ---
    BackendBridgePtr,
    ErrorKind,
    Result,
    TunnelConfig,
    TunnelError,
    TunnelId,
};

// ---

use super::{TunnelRegistry, TunnelRequest, TunnelSlotPtr};

// ---------------------------------------------------------------------------
// SwitchReply
// ---------------------------------------------------------------------------

/// Successful outcome of one tunnel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchReply {
    // ---
    Opened(TunnelId),
    Sent,

    /// Poll result; empty when the poll timed out.
    Data(Bytes),

    Closed,
}

// ---------------------------------------------------------------------------
// PendingPollGuard
// ---------------------------------------------------------------------------

/// Frees the pending-poll slot if the poll future is dropped mid-wait
/// (client went away). The tunnel itself stays open.
struct PendingPollGuard {
    // ---
    slot: TunnelSlotPtr,
    ticket: u64,
    armed: bool,
}

impl PendingPollGuard {
    fn defuse(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingPollGuard {
    fn drop(&mut self) {
        // ---
        if self.armed && self.slot.lock().disarm_poll(self.ticket) {
            tracing::debug!(id = %self.slot.id(), "poll abandoned by client");
        }
    }
}

// ---------------------------------------------------------------------------
// MessageSwitch
// ---------------------------------------------------------------------------

pub struct MessageSwitch {
    // ---
    registry: Arc<TunnelRegistry>,
    bridge: BackendBridgePtr,
    cfg: TunnelConfig,
}

// ---

impl MessageSwitch {
    // ---
    pub fn new(bridge: BackendBridgePtr, cfg: TunnelConfig) -> Self {
        // ---
        Self {
            registry: Arc::new(TunnelRegistry::new()),
            bridge,
            cfg,
        }
    }

    // ---

    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.cfg
    }

    // ---

    pub async fn dispatch(&self, req: TunnelRequest) -> Result<SwitchReply> {
        // ---
        match req {
            TunnelRequest::Open => self.open().await,
            TunnelRequest::Send { id, body } => self.send(id, body),
            TunnelRequest::Poll { id } => self.poll(id).await,
            TunnelRequest::Close { id } => self.close(id),
            TunnelRequest::Unrecognized { reason } => Err(TunnelError::Unrecognized(reason)),
        }
    }

    // ---

    /// Create a tunnel and connect its backend.
    pub async fn open(&self) -> Result<SwitchReply> {
        // ---
        match self.registry.create(self.bridge.as_ref()).await {
            Ok(id) => {
                tracing::info!(%id, tunnels = self.registry.len(), "tunnel opened");
                Ok(SwitchReply::Opened(id))
            }
            Err(e) => {
                tracing::warn!("tunnel open failed: {e}");
                Err(e)
            }
        }
    }

    // ---

    /// Hand `body` to the tunnel's backend, after anything buffered before it.
    pub fn send(&self, id: TunnelId, body: Bytes) -> Result<SwitchReply> {
        // ---
        let slot = self.registry.get(id)?;

        let delivered = {
            let mut st = slot.lock();
            st.ensure_open()?;
            st.touch();
            st.deliver_inbound(&body)
        };

        match delivered {
            Ok(()) => {
                tracing::debug!(%id, bytes = body.len(), "send delivered");
                Ok(SwitchReply::Sent)
            }
            Err(e) => Err(self.fail_tunnel(&slot, e)),
        }
    }

    // ---

    /// Return buffered backend bytes, or wait up to the poll timeout for some.
    pub async fn poll(&self, id: TunnelId) -> Result<SwitchReply> {
        // ---
        let slot = self.registry.get(id)?;
        let max = self.cfg.max_body_bytes;
        let wake = Arc::new(Notify::new());

        let ticket = {
            let mut st = slot.lock();
            st.ensure_open()?;
            if st.has_pending_poll() {
                // Data arriving now belongs to the suspended poll.
                return Err(TunnelError::PollConflict(id));
            }
            st.touch();

            let available = st.take_outbound(max);
            match available {
                Ok(Some(data)) => {
                    tracing::debug!(%id, bytes = data.len(), "poll answered immediately");
                    return Ok(SwitchReply::Data(data));
                }
                Ok(None) => st.arm_poll(wake.clone())?,
                Err(e) => {
                    drop(st);
                    return Err(self.fail_tunnel(&slot, e));
                }
            }
        };

        let mut guard = PendingPollGuard {
            slot: slot.clone(),
            ticket,
            armed: true,
        };

        let woken = tokio::time::timeout(self.cfg.poll_timeout, wake.notified())
            .await
            .is_ok();
        guard.defuse();

        let taken = {
            let mut st = slot.lock();
            st.disarm_poll(ticket);

            if !st.phase().is_open() {
                // Closed while we waited: hand over what close reserved for us.
                let data = st.take_final_flush();
                tracing::debug!(%id, bytes = data.len(), "poll completed by close");
                return Ok(SwitchReply::Data(data));
            }

            st.touch();
            st.take_outbound(max)
        };

        match taken {
            Ok(data) => {
                let data = data.unwrap_or_default();
                tracing::debug!(%id, woken, bytes = data.len(), "poll completed");
                Ok(SwitchReply::Data(data))
            }
            Err(e) => Err(self.fail_tunnel(&slot, e)),
        }
    }

    // ---

    /// Close the tunnel and forget its identifier. A bridge teardown failure
    /// is logged; the close still succeeds.
    pub fn close(&self, id: TunnelId) -> Result<SwitchReply> {
        // ---
        let slot = self.registry.get(id)?;

        let teardown = {
            let mut st = slot.lock();
            st.ensure_open()?;
            st.close()
        };
        self.registry.remove(id);

        if let Err(e) = teardown {
            tracing::warn!(%id, "backend teardown failed: {e}");
        }
        tracing::info!(%id, tunnels = self.registry.len(), "tunnel closed");
        Ok(SwitchReply::Closed)
    }

    // ---

    /// Force-close after a backend error and hand the error back for the
    /// triggering request. Non-backend errors pass through untouched.
    fn fail_tunnel(&self, slot: &TunnelSlotPtr, err: TunnelError) -> TunnelError {
        // ---
        if err.kind() != ErrorKind::Backend {
            return err;
        }

        let id = slot.id();
        if let Err(e) = slot.lock().close() {
            tracing::debug!(%id, "teardown after backend failure: {e}");
        }
        self.registry.remove(id);

        tracing::warn!(%id, "tunnel closed on backend failure: {err}");
        err
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use bytes::{Bytes, BytesMut};

    use htun_bridge_sim::{SimBridge, SimBridgeConfig};
    use htun_domain::{TunnelConfig, TunnelError, TunnelId};

    use super::{MessageSwitch, SwitchReply};
    use crate::TunnelRequest;

    fn switch_with(config: SimBridgeConfig, cfg: TunnelConfig) -> (Arc<MessageSwitch>, Arc<SimBridge>) {
        // ---
        let bridge = Arc::new(SimBridge::new(config));
        let switch = Arc::new(MessageSwitch::new(bridge.clone(), cfg));
        (switch, bridge)
    }

    fn switch() -> (Arc<MessageSwitch>, Arc<SimBridge>) {
        switch_with(SimBridgeConfig::perfect(), TunnelConfig::fast())
    }

    async fn open(switch: &MessageSwitch) -> TunnelId {
        // ---
        match switch.open().await.unwrap() {
            SwitchReply::Opened(id) => id,
            other => panic!("expected Opened, got {other:?}"),
        }
    }

    fn data(reply: SwitchReply) -> Bytes {
        // ---
        match reply {
            SwitchReply::Data(b) => b,
            other => panic!("expected Data, got {other:?}"),
        }
    }

    // ---

    #[tokio::test]
    async fn end_to_end_scenario() {
        // ---
        let (switch, bridge) = switch();
        let id = open(&switch).await;
        let peer = bridge.peer(id).unwrap();

        assert_eq!(switch.send(id, Bytes::from_static(b"ab")).unwrap(), SwitchReply::Sent);
        assert_eq!(peer.received(), Bytes::from_static(b"ab"));

        // Nothing produced yet: empty at timeout.
        let start = Instant::now();
        assert!(data(switch.poll(id).await.unwrap()).is_empty());
        assert!(start.elapsed() >= Duration::from_millis(40));

        peer.produce(b"xy");
        assert_eq!(data(switch.poll(id).await.unwrap()), Bytes::from_static(b"xy"));

        assert_eq!(switch.close(id).unwrap(), SwitchReply::Closed);
        assert!(matches!(switch.poll(id).await, Err(TunnelError::NotFound(_))));
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn suspended_poll_completes_on_backend_data() {
        // ---
        let (switch, bridge) = switch_with(
            SimBridgeConfig::perfect(),
            TunnelConfig {
                poll_timeout: Duration::from_secs(5),
                ..TunnelConfig::fast()
            },
        );
        let id = open(&switch).await;
        let peer = bridge.peer(id).unwrap();

        let s = switch.clone();
        let poll = tokio::spawn(async move { s.poll(id).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let start = Instant::now();
        peer.produce(b"late");
        let got = data(poll.await.unwrap().unwrap());

        assert_eq!(got, Bytes::from_static(b"late"));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn sends_arrive_in_order() {
        // ---
        let (switch, bridge) = switch();
        let id = open(&switch).await;

        for chunk in [&b"one "[..], b"two ", b"three"] {
            switch.send(id, Bytes::copy_from_slice(chunk)).unwrap();
        }
        assert_eq!(
            bridge.peer(id).unwrap().received(),
            Bytes::from_static(b"one two three")
        );
    }

    #[tokio::test]
    async fn polls_return_backend_bytes_in_order_without_gaps() {
        // ---
        let (switch, bridge) = switch_with(
            SimBridgeConfig::perfect(),
            TunnelConfig {
                max_body_bytes: 7,
                ..TunnelConfig::fast()
            },
        );
        let id = open(&switch).await;
        let peer = bridge.peer(id).unwrap();

        let mut expected = BytesMut::new();
        for i in 0..20u8 {
            let chunk = [b'a' + i; 3];
            peer.produce(&chunk);
            expected.extend_from_slice(&chunk);
        }

        let mut got = BytesMut::new();
        while got.len() < expected.len() {
            let chunk = data(switch.poll(id).await.unwrap());
            assert!(chunk.len() <= 7);
            assert!(!chunk.is_empty(), "data was buffered; poll must not time out");
            got.extend_from_slice(&chunk);
        }
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn second_concurrent_poll_conflicts() {
        // ---
        let (switch, bridge) = switch_with(
            SimBridgeConfig::perfect(),
            TunnelConfig {
                poll_timeout: Duration::from_secs(5),
                ..TunnelConfig::fast()
            },
        );
        let id = open(&switch).await;

        let s = switch.clone();
        let first = tokio::spawn(async move { s.poll(id).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            switch.poll(id).await,
            Err(TunnelError::PollConflict(x)) if x == id
        ));

        // The first poll is untouched and still completes with data.
        bridge.peer(id).unwrap().produce(b"ok");
        assert_eq!(data(first.await.unwrap().unwrap()), Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn data_for_pending_poll_is_not_taken_by_second_poll() {
        // ---
        let (switch, bridge) = switch_with(
            SimBridgeConfig::perfect(),
            TunnelConfig {
                poll_timeout: Duration::from_secs(5),
                ..TunnelConfig::fast()
            },
        );
        let id = open(&switch).await;
        let peer = bridge.peer(id).unwrap();

        let s = switch.clone();
        let first = tokio::spawn(async move { s.poll(id).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The first poll is woken but has not run yet on this runtime.
        peer.produce(b"xy");
        assert!(matches!(
            switch.poll(id).await,
            Err(TunnelError::PollConflict(x)) if x == id
        ));

        let start = Instant::now();
        assert_eq!(data(first.await.unwrap().unwrap()), Bytes::from_static(b"xy"));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn close_completes_pending_poll() {
        // ---
        let (switch, _bridge) = switch_with(
            SimBridgeConfig::perfect(),
            TunnelConfig {
                poll_timeout: Duration::from_secs(5),
                ..TunnelConfig::fast()
            },
        );
        let id = open(&switch).await;

        let s = switch.clone();
        let poll = tokio::spawn(async move { s.poll(id).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let start = Instant::now();
        switch.close(id).unwrap();

        assert!(data(poll.await.unwrap().unwrap()).is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(switch.registry().is_empty());
    }

    #[tokio::test]
    async fn abandoned_poll_frees_slot() {
        // ---
        let (switch, _bridge) = switch_with(
            SimBridgeConfig::perfect(),
            TunnelConfig {
                poll_timeout: Duration::from_secs(5),
                ..TunnelConfig::fast()
            },
        );
        let id = open(&switch).await;

        let s = switch.clone();
        let poll = tokio::spawn(async move { s.poll(id).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        poll.abort();
        let _ = poll.await;

        let slot = switch.registry().get(id).unwrap();
        assert!(!slot.lock().has_pending_poll());
        assert!(slot.lock().phase().is_open());
    }

    #[tokio::test]
    async fn requests_after_close_are_not_found() {
        // ---
        let (switch, _bridge) = switch();
        let id = open(&switch).await;
        switch.close(id).unwrap();

        assert!(matches!(switch.send(id, Bytes::from_static(b"x")), Err(TunnelError::NotFound(_))));
        assert!(matches!(switch.poll(id).await, Err(TunnelError::NotFound(_))));
        assert!(matches!(switch.close(id), Err(TunnelError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        // ---
        let (switch, _bridge) = switch();
        let id = TunnelId::new_random();
        assert!(matches!(switch.close(id), Err(TunnelError::NotFound(_))));
    }

    #[tokio::test]
    async fn refused_connect_opens_nothing() {
        // ---
        let (switch, _bridge) = switch_with(SimBridgeConfig::refusing(), TunnelConfig::fast());
        assert!(matches!(switch.open().await, Err(TunnelError::Backend(_))));
        assert!(switch.registry().is_empty());
    }

    #[tokio::test]
    async fn write_failure_closes_tunnel() {
        // ---
        let (switch, bridge) = switch_with(SimBridgeConfig::failing_writes_after(1), TunnelConfig::fast());
        let id = open(&switch).await;

        switch.send(id, Bytes::from_static(b"a")).unwrap();
        assert!(matches!(
            switch.send(id, Bytes::from_static(b"b")),
            Err(TunnelError::Backend(_))
        ));
        assert!(matches!(switch.send(id, Bytes::from_static(b"c")), Err(TunnelError::NotFound(_))));
        assert!(bridge.peer(id).unwrap().is_closed());
    }

    #[tokio::test]
    async fn backend_hang_up_drains_then_fails() {
        // ---
        let (switch, bridge) = switch();
        let id = open(&switch).await;
        let peer = bridge.peer(id).unwrap();

        peer.produce(b"tail");
        peer.hang_up();

        assert_eq!(data(switch.poll(id).await.unwrap()), Bytes::from_static(b"tail"));
        assert!(matches!(switch.poll(id).await, Err(TunnelError::Backend(_))));
        assert!(matches!(switch.poll(id).await, Err(TunnelError::NotFound(_))));
        assert!(switch.registry().is_empty());
    }

    #[tokio::test]
    async fn teardown_failure_still_closes() {
        // ---
        let (switch, _bridge) = switch_with(
            SimBridgeConfig {
                fail_close: true,
                ..Default::default()
            },
            TunnelConfig::fast(),
        );
        let id = open(&switch).await;

        assert_eq!(switch.close(id).unwrap(), SwitchReply::Closed);
        assert!(switch.registry().get(id).is_err());
    }

    #[tokio::test]
    async fn unrecognized_mutates_nothing() {
        // ---
        let (switch, _bridge) = switch();
        let id = open(&switch).await;

        let r = switch
            .dispatch(TunnelRequest::Unrecognized {
                reason: "bogus".into(),
            })
            .await;
        assert!(matches!(r, Err(TunnelError::Unrecognized(_))));
        assert_eq!(switch.registry().len(), 1);
        assert!(switch.registry().get(id).unwrap().lock().phase().is_open());
    }
}
