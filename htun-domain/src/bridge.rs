use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::error::Result;
use super::tunnel::TunnelId;

// ---------------------------------------------------------------------------
// DataCallback
// ---------------------------------------------------------------------------

/// One-shot notification registered through
/// [`BridgeHandle::on_data_available`].
///
/// Must not block and must not call back into the handle; the switch only
/// uses it to wake a suspended poll.
pub type DataCallback = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// BridgeHandle
// ---------------------------------------------------------------------------

/// The application-side endpoint of one tunnel.
///
/// Every method returns immediately. The switch calls them while holding
/// the tunnel's lock, so implementations must never wait on I/O here; any
/// real work happens on tasks the bridge owns.
pub trait BridgeHandle: Send + Sync {
    // ---
    /// The tunnel this handle was connected for.
    fn tunnel_id(&self) -> TunnelId;

    /// Enqueue bytes received from the client, in order.
    fn write(&self, data: Bytes) -> Result<()>;

    /// Take every outbound byte currently buffered. Empty means "nothing yet".
    ///
    /// Returns [`crate::TunnelError::Backend`] once the backend has gone away
    /// and everything it produced has already been taken.
    fn read_available(&self) -> Result<Bytes>;

    /// Register a one-shot callback fired when outbound data or backend
    /// closure becomes observable through [`Self::read_available`].
    ///
    /// Fires immediately if that is already the case. A later registration
    /// replaces an earlier one that has not fired.
    fn on_data_available(&self, callback: DataCallback);

    /// Tear the backend down. Idempotent.
    fn close(&self) -> Result<()>;
}

// ---

/// Convenience type alias for a heap-allocated [`BridgeHandle`].
pub type BridgeHandlePtr = Box<dyn BridgeHandle>;

// ---------------------------------------------------------------------------
// BackendBridge
// ---------------------------------------------------------------------------

/// Factory for per-tunnel [`BridgeHandle`]s.
///
/// Implementations: `htun_server::TcpBridge` (one upstream TCP connection
/// per tunnel) and `htun_bridge_sim::SimBridge` (in-process, for tests).
#[async_trait]
pub trait BackendBridge: Send + Sync {
    // ---
    /// Connect the backend for a freshly allocated tunnel.
    async fn connect(&self, id: TunnelId) -> Result<BridgeHandlePtr>;
}

// ---

/// Shared pointer to a [`BackendBridge`].
pub type BackendBridgePtr = Arc<dyn BackendBridge>;
