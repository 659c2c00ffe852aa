use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use htun_domain::{BackendBridge, BridgeHandlePtr, Result, TunnelError, TunnelId};

use super::config::SimBridgeConfig;
use super::handle::{SimHandle, SimPeer, SimShared};

// ---------------------------------------------------------------------------
// SimBridge
// ---------------------------------------------------------------------------

/// In-process backend bridge. Does not use real sockets.
///
/// Every successful `connect` creates a [`SimPeer`] retrievable through
/// [`SimBridge::peer`], so a test can play the application side of any
/// tunnel the switch opened.
pub struct SimBridge {
    // ---
    config: SimBridgeConfig,
    peers: Mutex<HashMap<TunnelId, SimPeer>>,
    connects: AtomicUsize,
}

// ---

impl SimBridge {
    // ---
    pub fn new(config: SimBridgeConfig) -> Self {
        // ---
        Self {
            config,
            peers: Mutex::new(HashMap::new()),
            connects: AtomicUsize::new(0),
        }
    }

    // ---

    /// The application side of tunnel `id`, if `connect` succeeded for it.
    pub fn peer(&self, id: TunnelId) -> Option<SimPeer> {
        // ---
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    // ---

    /// Number of `connect` attempts, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }
}

// ---

#[async_trait]
impl BackendBridge for SimBridge {
    // ---
    async fn connect(&self, id: TunnelId) -> Result<BridgeHandlePtr> {
        // ---
        self.connects.fetch_add(1, Ordering::AcqRel);

        if !self.config.connect_delay.is_zero() {
            tokio::time::sleep(self.config.connect_delay).await;
        }

        if self.config.refuse_connect {
            tracing::debug!(%id, "sim bridge: refusing connect");
            return Err(TunnelError::Backend("simulated connect refusal".into()));
        }

        let shared = SimShared::new(id, self.config.clone());
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, SimPeer::new(shared.clone()));

        Ok(Box::new(SimHandle::new(shared)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::time::{Duration, Instant};

    use htun_domain::{BackendBridge, BridgeHandle, TunnelId};

    use super::SimBridge;
    use crate::SimBridgeConfig;

    #[tokio::test]
    async fn connect_registers_peer() {
        // ---
        let bridge = SimBridge::new(SimBridgeConfig::perfect());
        let id = TunnelId::new_random();
        let handle = bridge.connect(id).await.unwrap();

        assert_eq!(handle.tunnel_id(), id);
        assert_eq!(bridge.peer(id).unwrap().tunnel_id(), id);
        assert!(bridge.peer(TunnelId::new_random()).is_none());
    }

    #[tokio::test]
    async fn refusing_bridge_registers_nothing() {
        // ---
        let bridge = SimBridge::new(SimBridgeConfig::refusing());
        let id = TunnelId::new_random();
        assert!(bridge.connect(id).await.is_err());
        assert!(bridge.peer(id).is_none());
        assert_eq!(bridge.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn connect_delay_is_honoured() {
        // ---
        let bridge = SimBridge::new(SimBridgeConfig {
            connect_delay: Duration::from_millis(30),
            ..Default::default()
        });
        let start = Instant::now();
        bridge.connect(TunnelId::new_random()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
