//! HTTP response encoding for switch outcomes and errors.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Response, StatusCode};
use http_body_util::Full;

// ---

use htun_domain::{ErrorKind, TunnelError, TUNNEL_ID_HEADER};

// ---

use super::SwitchReply;

// ---

pub type HttpResponse = Response<Full<Bytes>>;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn build(status: StatusCode, content_type: &'static str, body: Bytes) -> HttpResponse {
    // ---
    let len = body.len();
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;

    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    resp
}

// ---

/// 200 response for a successful switch operation.
pub fn reply(outcome: SwitchReply) -> HttpResponse {
    // ---
    match outcome {
        SwitchReply::Opened(id) => {
            let text = id.to_string();
            let mut resp = build(StatusCode::OK, TEXT_PLAIN, Bytes::from(text.clone()));
            if let Ok(value) = HeaderValue::from_str(&text) {
                resp.headers_mut().insert(TUNNEL_ID_HEADER, value);
            }
            resp
        }
        SwitchReply::Sent | SwitchReply::Closed => build(StatusCode::OK, TEXT_PLAIN, Bytes::new()),
        SwitchReply::Data(data) => build(StatusCode::OK, OCTET_STREAM, data),
    }
}

// ---

pub fn status_for(err: &TunnelError) -> StatusCode {
    // ---
    match err {
        TunnelError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        TunnelError::PollConflict(_) => StatusCode::CONFLICT,
        _ => match err.kind() {
            ErrorKind::Transport | ErrorKind::Protocol => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Backend => StatusCode::BAD_GATEWAY,
        },
    }
}

// ---

/// Error response with a short plain-text reason.
pub fn error(err: &TunnelError) -> HttpResponse {
    // ---
    build(status_for(err), TEXT_PLAIN, Bytes::from(format!("{err}\n")))
}

/// Answer for paths outside the tunnel prefix.
pub fn outside_prefix() -> HttpResponse {
    build(StatusCode::NOT_FOUND, TEXT_PLAIN, Bytes::from_static(b"not found\n"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use htun_domain::TunnelId;

    #[test]
    fn statuses() {
        // ---
        let id = TunnelId::new_random();
        let cases = [
            (TunnelError::BodyTooLarge { limit: 1 }, StatusCode::PAYLOAD_TOO_LARGE),
            (TunnelError::Malformed("x".into()), StatusCode::BAD_REQUEST),
            (TunnelError::Unrecognized("x".into()), StatusCode::BAD_REQUEST),
            (TunnelError::PollConflict(id), StatusCode::CONFLICT),
            (TunnelError::NotFound(id), StatusCode::NOT_FOUND),
            (TunnelError::Backend("x".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{err}");
            assert_eq!(error(&err).status(), status);
        }
    }

    #[test]
    fn opened_carries_id_in_header_and_body() {
        // ---
        let id = TunnelId::new_random();
        let resp = reply(SwitchReply::Opened(id));

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(TUNNEL_ID_HEADER).unwrap().to_str().unwrap(),
            id.to_string()
        );
        assert_eq!(
            resp.headers().get(CONTENT_LENGTH).unwrap().to_str().unwrap(),
            id.to_string().len().to_string()
        );
    }

    #[test]
    fn data_is_octet_stream() {
        // ---
        let resp = reply(SwitchReply::Data(Bytes::from_static(b"xy")));
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), OCTET_STREAM);
        assert_eq!(resp.headers().get(CONTENT_LENGTH).unwrap(), "2");
    }
}
