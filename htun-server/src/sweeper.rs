use std::sync::Arc;
use std::time::Duration;

// ---

use tokio::task::JoinHandle;

// ---

use super::TunnelRegistry;

// ---------------------------------------------------------------------------
// Idle sweeper
// ---------------------------------------------------------------------------

/// Spawn the periodic task that closes tunnels idle for longer than
/// `idle_timeout`. Runs until the returned handle is aborted.
pub fn spawn_idle_sweeper(
    registry: Arc<TunnelRegistry>,
    idle_timeout: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = registry.sweep_idle(idle_timeout);
            if !evicted.is_empty() {
                tracing::info!(
                    evicted = evicted.len(),
                    remaining = registry.len(),
                    "idle sweep",
                );
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use htun_bridge_sim::{SimBridge, SimBridgeConfig};
    use htun_domain::{TunnelConfig, TunnelError};

    use super::spawn_idle_sweeper;
    use crate::{MessageSwitch, SwitchReply};

    #[tokio::test]
    async fn idle_tunnel_is_evicted_and_id_invalidated() {
        // ---
        let cfg = TunnelConfig::fast();
        let bridge = Arc::new(SimBridge::new(SimBridgeConfig::perfect()));
        let switch = MessageSwitch::new(bridge.clone(), cfg.clone());
        let sweeper = spawn_idle_sweeper(switch.registry().clone(), cfg.idle_timeout, cfg.sweep_interval);

        let SwitchReply::Opened(id) = switch.open().await.unwrap() else {
            panic!("open failed");
        };

        tokio::time::sleep(cfg.idle_timeout + cfg.sweep_interval * 5).await;

        assert!(matches!(
            switch.send(id, Bytes::from_static(b"late")),
            Err(TunnelError::NotFound(_))
        ));
        assert!(bridge.peer(id).unwrap().is_closed());
        sweeper.abort();
    }

    #[tokio::test]
    async fn active_tunnel_survives() {
        // ---
        let cfg = TunnelConfig::fast();
        let bridge = Arc::new(SimBridge::new(SimBridgeConfig::perfect()));
        let switch = MessageSwitch::new(bridge.clone(), cfg.clone());
        let sweeper = spawn_idle_sweeper(switch.registry().clone(), cfg.idle_timeout, cfg.sweep_interval);

        let SwitchReply::Opened(id) = switch.open().await.unwrap() else {
            panic!("open failed");
        };

        // Keep sending well inside the idle window for longer than the window.
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            switch.send(id, Bytes::from_static(b".")).unwrap();
        }

        assert!(switch.registry().get(id).is_ok());
        sweeper.abort();
    }
}
