//! [`TcpBridge`] — backend bridge that gives every tunnel its own TCP
//! connection to a fixed upstream.
//!
//! Two tasks per connection:
//!
//! ```text
//!  switch ── write ──► mpsc ──► write pump ──► upstream socket
//!  switch ◄── drain ── OutboundQueue ◄── read pump ◄── upstream socket
//! ```
//!
//! Neither pump is ever awaited by the switch. EOF or an I/O error on either
//! side closes the [`OutboundQueue`], which the switch sees as backend failure
//! once buffered bytes are drained.

use std::sync::{Arc, Mutex, PoisonError};

// ---

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

// ---

use htun_domain::{
    // ---
    BackendBridge,
    BridgeHandle,
    BridgeHandlePtr,
    DataCallback,
    OutboundQueue,
    Result,
    TunnelError,
    TunnelId,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Read buffer size of the upstream read pump.
const READ_CHUNK: usize = 16 * 1024; // 16 KiB

// ---------------------------------------------------------------------------
// TcpBridge
// ---------------------------------------------------------------------------

pub struct TcpBridge {
    // ---
    /// `host:port`, resolved on every connect.
    upstream: String,
}

// ---

impl TcpBridge {
    // ---
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
        }
    }
}

// ---

#[async_trait]
impl BackendBridge for TcpBridge {
    // ---
    async fn connect(&self, id: TunnelId) -> Result<BridgeHandlePtr> {
        // ---
        let tcp = TcpStream::connect(&self.upstream)
            .await
            .map_err(|e| TunnelError::Backend(format!("connect to {}: {e}", self.upstream)))?;
        tcp.set_nodelay(true)?;

        tracing::debug!(%id, upstream = %self.upstream, "upstream connected");

        let (rd, wr) = tcp.into_split();
        let outbound = Arc::new(OutboundQueue::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(write_pump(id, wr, rx, outbound.clone()));
        tokio::spawn(read_pump(id, rd, outbound.clone(), shutdown_rx));

        Ok(Box::new(TcpHandle {
            id,
            tx: Mutex::new(Some(tx)),
            outbound,
            shutdown_tx,
        }))
    }
}

// ---------------------------------------------------------------------------
// Pumps
// ---------------------------------------------------------------------------

async fn write_pump(
    id: TunnelId,
    mut wr: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    outbound: Arc<OutboundQueue>,
) {
    // ---
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = wr.write_all(&chunk).await {
            tracing::debug!(%id, "upstream write failed: {e}");
            outbound.close(format!("upstream write failed: {e}"));
            return;
        }
    }

    // Sender dropped: the switch closed the tunnel.
    let _ = wr.shutdown().await;
}

// ---

async fn read_pump(
    id: TunnelId,
    mut rd: OwnedReadHalf,
    outbound: Arc<OutboundQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    // ---
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            read = rd.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(%id, "upstream closed connection");
                    outbound.close("upstream closed connection");
                    break;
                }
                Ok(n) => outbound.push(&buf[..n]),
                Err(e) => {
                    tracing::debug!(%id, "upstream read failed: {e}");
                    outbound.close(format!("upstream read failed: {e}"));
                    break;
                }
            },

            _ = shutdown.changed() => break,
        }
    }
}

// ---------------------------------------------------------------------------
// TcpHandle
// ---------------------------------------------------------------------------

struct TcpHandle {
    // ---
    id: TunnelId,

    /// `None` once closed; dropping the sender ends the write pump.
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,

    outbound: Arc<OutboundQueue>,
    shutdown_tx: watch::Sender<bool>,
}

// ---

impl BridgeHandle for TcpHandle {
    // ---
    fn tunnel_id(&self) -> TunnelId {
        self.id
    }

    fn write(&self, data: Bytes) -> Result<()> {
        // ---
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            None => Err(TunnelError::Backend("write on closed upstream".into())),
            Some(tx) => tx
                .send(data)
                .map_err(|_| TunnelError::Backend("upstream writer gone".into())),
        }
    }

    fn read_available(&self) -> Result<Bytes> {
        self.outbound.drain()
    }

    fn on_data_available(&self, callback: DataCallback) {
        self.outbound.on_data_available(callback);
    }

    fn close(&self) -> Result<()> {
        // ---
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.shutdown_tx.send_replace(true);
        self.outbound.close("closed by switch");
        Ok(())
    }
}

// ---

impl Drop for TcpHandle {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
