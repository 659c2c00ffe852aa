//! Request classifier — turns a decoded HTTP request into a [`TunnelRequest`].
//!
//! Recognised shapes (prefix `/tunnel` by default):
//!
//! ```text
//! POST {prefix}/open                     -> Open
//! POST {prefix}/{id}/send   (body > 0)   -> Send
//! GET  {prefix}/{id}/poll   (body = 0)   -> Poll
//! POST {prefix}/{id}/close               -> Close
//! ```
//!
//! The identifier may also travel in the `X-Tunnel-Id` header with the
//! action directly under the prefix (`POST {prefix}/send`). Everything else
//! under the prefix is [`TunnelRequest::Unrecognized`]. Classification never
//! looks at the registry; an identifier naming no tunnel is the switch's
//! concern.

use bytes::Bytes;
use http::{Method, Request};

use htun_domain::{TunnelId, TUNNEL_ID_HEADER};

// ---------------------------------------------------------------------------
// TunnelRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelRequest {
    // ---
    Open,
    Send { id: TunnelId, body: Bytes },
    Poll { id: TunnelId },
    Close { id: TunnelId },
    Unrecognized { reason: String },
}

// ---

impl TunnelRequest {
    // ---
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        // ---
        match self {
            TunnelRequest::Open => "open",
            TunnelRequest::Send { .. } => "send",
            TunnelRequest::Poll { .. } => "poll",
            TunnelRequest::Close { .. } => "close",
            TunnelRequest::Unrecognized { .. } => "unrecognized",
        }
    }
}

// ---

fn unrecognized(reason: impl Into<String>) -> TunnelRequest {
    TunnelRequest::Unrecognized {
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Prefix matching
// ---------------------------------------------------------------------------

/// The part of `path` after `prefix`, or `None` when `path` lies outside it.
///
/// `prefix` is normalised (`/tunnel`, or empty for the root).
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    // ---
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        // `/tunnelx` is not under `/tunnel`.
        None
    }
}

// ---

/// Whether `path` belongs to the tunnel endpoints at all.
pub fn is_tunnel_path(path: &str, prefix: &str) -> bool {
    strip_prefix(path, prefix).is_some()
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

/// Classify an aggregated request. Pure.
pub fn classify(req: &Request<Bytes>, prefix: &str) -> TunnelRequest {
    // ---
    let Some(rest) = strip_prefix(req.uri().path(), prefix) else {
        return unrecognized("path outside tunnel prefix");
    };

    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    let (path_id, action) = match segments.as_slice() {
        [action] => (None, *action),
        [id, action] => match id.parse::<TunnelId>() {
            Ok(id) => (Some(id), *action),
            Err(e) => return unrecognized(e.to_string()),
        },
        [] => return unrecognized("missing action"),
        _ => return unrecognized("too many path segments"),
    };

    let header_id = match req.headers().get(TUNNEL_ID_HEADER) {
        None => None,
        Some(value) => match value.to_str().ok().map(str::parse::<TunnelId>) {
            Some(Ok(id)) => Some(id),
            _ => return unrecognized(format!("malformed {TUNNEL_ID_HEADER} header")),
        },
    };

    let id = match (path_id, header_id) {
        (Some(p), Some(h)) if p != h => {
            return unrecognized("path and header tunnel ids disagree");
        }
        (Some(p), _) => Some(p),
        (None, h) => h,
    };

    let body = req.body();
    let method = req.method();

    match (action, id) {
        ("open", None) if *method == Method::POST => TunnelRequest::Open,
        ("open", Some(_)) => unrecognized("open must not carry a tunnel id"),

        ("send", Some(id)) if *method == Method::POST => {
            if body.is_empty() {
                unrecognized("send with empty body")
            } else {
                TunnelRequest::Send {
                    id,
                    body: body.clone(),
                }
            }
        }

        ("poll", Some(id)) if *method == Method::GET => {
            if body.is_empty() {
                TunnelRequest::Poll { id }
            } else {
                unrecognized("poll must not carry a body")
            }
        }

        ("close", Some(id)) if *method == Method::POST => TunnelRequest::Close { id },

        ("send" | "poll" | "close", None) => unrecognized(format!("{action} without tunnel id")),

        _ => unrecognized(format!("unsupported {method} {action}")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const PREFIX: &str = "/tunnel";

    fn req(method: Method, path: &str, body: &'static [u8]) -> Request<Bytes> {
        // ---
        Request::builder()
            .method(method)
            .uri(path)
            .body(Bytes::from_static(body))
            .unwrap()
    }

    fn is_unrecognized(r: &TunnelRequest) -> bool {
        matches!(r, TunnelRequest::Unrecognized { .. })
    }

    // ---

    #[test]
    fn open_send_poll_close() {
        // ---
        let id = TunnelId::new_random();

        assert_eq!(
            classify(&req(Method::POST, "/tunnel/open", b""), PREFIX),
            TunnelRequest::Open
        );
        assert_eq!(
            classify(&req(Method::POST, &format!("/tunnel/{id}/send"), b"ab"), PREFIX),
            TunnelRequest::Send {
                id,
                body: Bytes::from_static(b"ab")
            }
        );
        assert_eq!(
            classify(&req(Method::GET, &format!("/tunnel/{id}/poll"), b""), PREFIX),
            TunnelRequest::Poll { id }
        );
        assert_eq!(
            classify(&req(Method::POST, &format!("/tunnel/{id}/close"), b""), PREFIX),
            TunnelRequest::Close { id }
        );
    }

    #[test]
    fn header_form_carries_id() {
        // ---
        let id = TunnelId::new_random();
        let r = Request::builder()
            .method(Method::GET)
            .uri("/tunnel/poll")
            .header(TUNNEL_ID_HEADER, id.to_string())
            .body(Bytes::new())
            .unwrap();
        assert_eq!(classify(&r, PREFIX), TunnelRequest::Poll { id });
    }

    #[test]
    fn disagreeing_ids_rejected() {
        // ---
        let r = Request::builder()
            .method(Method::POST)
            .uri(format!("/tunnel/{}/close", TunnelId::new_random()))
            .header(TUNNEL_ID_HEADER, TunnelId::new_random().to_string())
            .body(Bytes::new())
            .unwrap();
        assert!(is_unrecognized(&classify(&r, PREFIX)));
    }

    #[test]
    fn wrong_shapes_are_unrecognized() {
        // ---
        let id = TunnelId::new_random();
        let cases = [
            req(Method::GET, "/tunnel/open", b""),
            req(Method::POST, &format!("/tunnel/{id}/send"), b""),
            req(Method::POST, &format!("/tunnel/{id}/poll"), b""),
            req(Method::GET, &format!("/tunnel/{id}/poll"), b"x"),
            req(Method::DELETE, &format!("/tunnel/{id}/close"), b""),
            req(Method::POST, "/tunnel/send", b"x"),
            req(Method::POST, "/tunnel/not-a-uuid/send", b"x"),
            req(Method::POST, &format!("/tunnel/{id}/send/extra"), b"x"),
            req(Method::POST, &format!("/tunnel/{id}/open"), b""),
            req(Method::POST, "/tunnel", b""),
            req(Method::POST, "/tunnel/bogus", b""),
        ];
        for r in &cases {
            assert!(
                is_unrecognized(&classify(r, PREFIX)),
                "{} {} should be unrecognized",
                r.method(),
                r.uri()
            );
        }
    }

    #[test]
    fn prefix_boundary() {
        // ---
        assert!(is_tunnel_path("/tunnel", PREFIX));
        assert!(is_tunnel_path("/tunnel/open", PREFIX));
        assert!(!is_tunnel_path("/tunnelx/open", PREFIX));
        assert!(!is_tunnel_path("/other", PREFIX));
        assert!(is_tunnel_path("/open", ""));
    }

    #[test]
    fn trailing_slash_tolerated() {
        assert_eq!(
            classify(&req(Method::POST, "/tunnel/open/", b""), PREFIX),
            TunnelRequest::Open
        );
    }
}
