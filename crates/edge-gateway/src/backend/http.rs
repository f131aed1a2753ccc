//! HTTP/1.1 upstream over plain TCP.

use async_trait::async_trait;
use ::http::{header, HeaderValue, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use super::{Upstream, UpstreamRequest, UpstreamResponse};
use crate::error::GatewayError;

/// Opens one connection per call.
#[derive(Debug)]
#[must_use]
pub struct HttpUpstream {
    connect_timeout: Duration,
}

impl HttpUpstream {
    pub const fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for HttpUpstream {
    fn default() -> Self {
        Self::new()
    }
}

/// Aborts the connection driver when the call is dropped, e.g. because the
/// client went away or the request timed out.
struct ConnectionGuard(JoinHandle<()>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn parse_host_port(uri: &Uri) -> Result<(String, u16), GatewayError> {
    match uri.scheme_str() {
        Some("http") => {}
        other => {
            return Err(GatewayError::Config(format!(
                "unsupported upstream scheme: {}",
                other.unwrap_or("none")
            )))
        }
    }

    let host = uri
        .host()
        .ok_or_else(|| GatewayError::Config(format!("upstream URL has no host: {uri}")))?
        .to_owned();

    Ok((host, uri.port_u16().unwrap_or(80)))
}

fn unavailable(stage: &str, e: impl std::fmt::Display) -> GatewayError {
    GatewayError::UpstreamUnavailable(format!("{stage}: {e}"))
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, req: UpstreamRequest) -> Result<UpstreamResponse, GatewayError> {
        let (host, port) = parse_host_port(&req.uri)?;
        let authority = req
            .uri
            .authority()
            .map_or_else(|| host.clone(), ToString::to_string);
        let path = req
            .uri
            .path_and_query()
            .map_or("/", ::http::uri::PathAndQuery::as_str);

        let mut builder = Request::builder().method(req.method).uri(path);
        if let Some(headers) = builder.headers_mut() {
            *headers = req.headers;
            let host_value = HeaderValue::from_str(&authority)
                .map_err(|e| GatewayError::Config(format!("invalid upstream authority: {e}")))?;
            headers.insert(header::HOST, host_value);
        }

        let request = builder
            .body(Full::new(req.body.unwrap_or_default()))
            .map_err(|e| {
                tracing::warn!(error = %e, "Upstream request could not be built");
                GatewayError::MalformedRequest("Invalid request".into())
            })?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| unavailable("connect", "timed out"))?
            .map_err(|e| unavailable("connect", e))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| unavailable("handshake", e))?;

        let _guard = ConnectionGuard(tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "Upstream connection closed with error");
            }
        }));

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| unavailable("send", e))?;

        let status = response.status();
        let headers = response.headers().clone();

        let body = response
            .collect()
            .await
            .map_err(|e| unavailable("read body", e))?
            .to_bytes();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
