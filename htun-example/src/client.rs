//! Minimal HTTP client for the tunnel endpoints.

use anyhow::{bail, Context};
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

// ---

use htun_domain::{TunnelId, TUNNEL_ID_HEADER};

// ---------------------------------------------------------------------------
// TunnelClient
// ---------------------------------------------------------------------------

pub struct TunnelClient {
    // ---
    http: Client<HttpConnector, Full<Bytes>>,

    /// e.g. `http://127.0.0.1:8080/tunnel`
    base: String,
}

/// Status and body of one exchange.
pub struct Exchange {
    pub status: StatusCode,
    pub tunnel_id: Option<String>,
    pub body: Bytes,
}

// ---

impl TunnelClient {
    // ---
    pub fn new(server: &str, prefix: &str) -> Self {
        // ---
        let http = Client::builder(TokioExecutor::new()).build_http();
        Self {
            http,
            base: endpoint_base(server, prefix),
        }
    }

    // ---

    pub async fn exchange(&self, method: Method, path: &str, body: Bytes) -> anyhow::Result<Exchange> {
        // ---
        let uri = format!("{}/{}", self.base, path);
        let req = Request::builder()
            .method(method)
            .uri(&uri)
            .body(Full::new(body))
            .with_context(|| format!("building request for {uri}"))?;

        let resp = self
            .http
            .request(req)
            .await
            .with_context(|| format!("request to {uri}"))?;

        let status = resp.status();
        let tunnel_id = resp
            .headers()
            .get(TUNNEL_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.into_body().collect().await?.to_bytes();

        Ok(Exchange {
            status,
            tunnel_id,
            body,
        })
    }

    // ---

    pub async fn open(&self) -> anyhow::Result<TunnelId> {
        // ---
        let ex = self.exchange(Method::POST, "open", Bytes::new()).await?;
        expect_ok("open", &ex)?;

        let text = std::str::from_utf8(&ex.body).context("tunnel id is not utf-8")?;
        let id: TunnelId = text.parse()?;
        if ex.tunnel_id.as_deref() != Some(text.trim()) {
            bail!("{TUNNEL_ID_HEADER} header does not match body id {id}");
        }
        Ok(id)
    }

    pub async fn send(&self, id: TunnelId, data: Bytes) -> anyhow::Result<()> {
        let ex = self.exchange(Method::POST, &format!("{id}/send"), data).await?;
        expect_ok("send", &ex)
    }

    pub async fn poll(&self, id: TunnelId) -> anyhow::Result<Bytes> {
        // ---
        let ex = self.exchange(Method::GET, &format!("{id}/poll"), Bytes::new()).await?;
        expect_ok("poll", &ex)?;
        Ok(ex.body)
    }

    pub async fn close(&self, id: TunnelId) -> anyhow::Result<()> {
        let ex = self.exchange(Method::POST, &format!("{id}/close"), Bytes::new()).await?;
        expect_ok("close", &ex)
    }
}

// ---

fn expect_ok(op: &str, ex: &Exchange) -> anyhow::Result<()> {
    // ---
    if ex.status != StatusCode::OK {
        bail!(
            "{op} returned {}: {}",
            ex.status,
            String::from_utf8_lossy(&ex.body).trim()
        );
    }
    Ok(())
}

/// Join server and prefix without doubled or missing slashes.
fn endpoint_base(server: &str, prefix: &str) -> String {
    // ---
    let server = server.trim_end_matches('/');
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        server.to_string()
    } else {
        format!("{server}/{prefix}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::endpoint_base;

    #[test]
    fn base_joins_cleanly() {
        // ---
        assert_eq!(endpoint_base("http://h:1/", "/tunnel/"), "http://h:1/tunnel");
        assert_eq!(endpoint_base("http://h:1", "tunnel"), "http://h:1/tunnel");
        assert_eq!(endpoint_base("http://h:1", "/"), "http://h:1");
    }
}
