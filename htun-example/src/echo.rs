//! Echo upstream — a TCP server that writes back whatever it reads.
//! Point `htun-server --upstream` at it for the smoke run.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{debug, info};

// ---

pub async fn run(bind: SocketAddr) -> anyhow::Result<()> {
    // ---
    let listener = TcpListener::bind(bind).await?;
    info!("echo upstream listening on {}", listener.local_addr()?);
    serve(listener).await
}

// ---

async fn serve(listener: TcpListener) -> anyhow::Result<()> {
    // ---
    loop {
        let (mut sock, peer) = listener.accept().await?;
        tokio::spawn(async move {
            let (mut r, mut w) = sock.split();
            match tokio::io::copy(&mut r, &mut w).await {
                Ok(n) => debug!(%peer, bytes = n, "echo connection done"),
                Err(e) => debug!(%peer, "echo connection failed: {e}"),
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
