//! HTTP front end — accept loop, body aggregation and request routing.
//!
//! Per connection:
//!
//! ```text
//!  TcpStream ──► hyper http1 ──► handle_request
//!                                  ├─ outside prefix ──► 404
//!                                  ├─ aggregate body (limit) ──► 413 / 400
//!                                  └─ classify ──► MessageSwitch::dispatch ──► response
//! ```
//!
//! Each connection runs on its own task, so a suspended poll only ties up
//! its own connection.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

// ---

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::Request;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

// ---

use htun_domain::{Result, TunnelError};

// ---

use super::response::{self, HttpResponse};
use super::{classify, is_tunnel_path, MessageSwitch};

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

/// Serve HTTP on `listener` until `shutdown` flips to `true`.
///
/// Connections already accepted keep running on their own tasks.
pub async fn run_accept_loop(
    listener: TcpListener,
    switch: Arc<MessageSwitch>,
    mut shutdown: watch::Receiver<bool>,
) {
    // ---
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((tcp, peer)) => serve_connection(tcp, peer, switch.clone()),
                Err(e) => tracing::warn!("accept failed: {e}"),
            },

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("accept loop stopping");
                    break;
                }
            }
        }
    }
}

// ---

fn serve_connection(tcp: TcpStream, peer: SocketAddr, switch: Arc<MessageSwitch>) {
    // ---
    tokio::spawn(async move {
        tracing::debug!(%peer, "connection accepted");

        let service = service_fn(move |req: Request<Incoming>| {
            let switch = switch.clone();
            async move { Ok::<_, Infallible>(handle_request(&switch, req).await) }
        });

        if let Err(e) = http1::Builder::new()
            .serve_connection(TokioIo::new(tcp), service)
            .await
        {
            tracing::debug!(%peer, "connection ended with error: {e}");
        }
    });
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

/// Route one HTTP request through the codec, classifier and switch.
pub async fn handle_request<B>(switch: &MessageSwitch, req: Request<B>) -> HttpResponse
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    // ---
    let prefix = switch.config().prefix.as_str();

    if !is_tunnel_path(req.uri().path(), prefix) {
        tracing::debug!(path = req.uri().path(), "request outside tunnel prefix");
        return response::outside_prefix();
    }

    let req = match aggregate(req, switch.config().max_body_bytes).await {
        Ok(req) => req,
        Err(e) => {
            tracing::debug!("request rejected by codec: {e}");
            return response::error(&e);
        }
    };

    let request = classify(&req, prefix);
    let kind = request.kind();

    match switch.dispatch(request).await {
        Ok(reply) => response::reply(reply),
        Err(e) => {
            tracing::debug!(kind, "tunnel request failed: {e}");
            response::error(&e)
        }
    }
}

// ---

/// Collect the request body into one buffer of at most `limit` bytes.
///
/// A declared `Content-Length` over the limit is refused without reading
/// the body; a chunked body is cut off as soon as it crosses the limit.
pub async fn aggregate<B>(req: Request<B>, limit: usize) -> Result<Request<Bytes>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    // ---
    if let Some(value) = req.headers().get(CONTENT_LENGTH) {
        let declared = value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| TunnelError::Malformed("invalid content-length".into()))?;

        if declared > limit as u64 {
            return Err(TunnelError::BodyTooLarge { limit });
        }
    }

    let (parts, body) = req.into_parts();
    let collected = Limited::new(body, limit).collect().await.map_err(|e| {
        if e.downcast_ref::<LengthLimitError>().is_some() {
            TunnelError::BodyTooLarge { limit }
        } else {
            TunnelError::Malformed(format!("body read failed: {e}"))
        }
    })?;

    Ok(Request::from_parts(parts, collected.to_bytes()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
