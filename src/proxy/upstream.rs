//! Upstream forwarding.
//!
//! Sends a request to a single fixed upstream and streams the response
//! back. Transport failures are returned as [`ProxyError`]; the router
//! decides what the client sees.
//!
//! Requests asking for a protocol upgrade (WebSocket and the like) keep
//! their `Upgrade` header. When the upstream answers `101`, both upgraded
//! connections are joined and bytes are copied between them.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, UPGRADE};
use hyper::http::uri::{InvalidUri, PathAndQuery};
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response, StatusCode, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use thiserror::Error;

use super::ProxyBody;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Default bound on establishing the upstream TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Headers that apply to a single connection and must not be forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Failures while forwarding to an upstream.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid upstream uri '{target}': {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: InvalidUri,
    },

    #[error("upstream request failed: {0}")]
    Transport(#[source] BoxError),
}

/// Forwards one request to `target` (scheme and authority only).
///
/// Method, path, query, headers and body of the request are preserved.
#[async_trait]
pub trait Forwarder<B: Send + 'static>: Send + Sync {
    async fn forward(&self, req: Request<B>, target: &str)
        -> Result<Response<ProxyBody>, ProxyError>;
}

/// Forwarder built on the hyper-util pooled HTTP/1 client.
pub struct HyperForwarder<B = Incoming> {
    client: Client<HttpConnector, B>,
}

impl<B> HyperForwarder<B>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    pub fn new() -> Self {
        Self::with_connect_timeout(CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }
}

impl<B> Default for HyperForwarder<B>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<B> Forwarder<B> for HyperForwarder<B>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    async fn forward(
        &self,
        req: Request<B>,
        target: &str,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let (mut parts, body) = req.into_parts();
        let protocol = requested_upgrade(&parts.headers);

        parts.uri = upstream_uri(target, parts.uri.path_and_query())?;
        parts.version = Version::HTTP_11;
        remove_hop_by_hop_headers(&mut parts.headers);

        let mut req = Request::from_parts(parts, body);
        let downstream = protocol.map(|protocol| {
            set_upgrade(req.headers_mut(), protocol);
            hyper::upgrade::on(&mut req)
        });

        let mut response = self
            .client
            .request(req)
            .await
            .map_err(|e| ProxyError::Transport(Box::new(e)))?;

        let switching = response.status() == StatusCode::SWITCHING_PROTOCOLS;
        let accepted = response.headers().get(UPGRADE).cloned();
        if let (true, Some(downstream)) = (switching, downstream) {
            let upstream = hyper::upgrade::on(&mut response);
            tokio::spawn(tunnel(downstream, upstream));
        }

        let (mut parts, body) = response.into_parts();
        remove_hop_by_hop_headers(&mut parts.headers);
        if let (true, Some(protocol)) = (switching, accepted) {
            set_upgrade(&mut parts.headers, protocol);
        }
        Ok(Response::from_parts(parts, body.boxed_unsync()))
    }
}

/// Returns the `Upgrade` value when `Connection` lists `upgrade`.
fn requested_upgrade(headers: &HeaderMap) -> Option<HeaderValue> {
    let listed = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    if listed {
        headers.get(UPGRADE).cloned()
    } else {
        None
    }
}

fn set_upgrade(headers: &mut HeaderMap, protocol: HeaderValue) {
    headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(UPGRADE, protocol);
}

/// Copies bytes between the client and upstream once both have switched.
async fn tunnel(downstream: OnUpgrade, upstream: OnUpgrade) {
    let (downstream, upstream) = match tokio::try_join!(downstream, upstream) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::debug!(error = %e, "protocol upgrade failed");
            return;
        }
    };

    let mut downstream = TokioIo::new(downstream);
    let mut upstream = TokioIo::new(upstream);
    match tokio::io::copy_bidirectional(&mut downstream, &mut upstream).await {
        Ok((sent, received)) => {
            tracing::debug!(sent, received, "upgraded connection closed");
        }
        Err(e) => tracing::debug!(error = %e, "upgraded connection failed"),
    }
}

/// Joins the target base with the original path and query.
fn upstream_uri(target: &str, path_and_query: Option<&PathAndQuery>) -> Result<Uri, ProxyError> {
    let path = path_and_query.map(PathAndQuery::as_str).unwrap_or("/");
    format!("{}{}", target.trim_end_matches('/'), path)
        .parse()
        .map_err(|source| ProxyError::InvalidTarget {
            target: target.to_string(),
            source,
        })
}

/// Removes hop-by-hop headers, including any named by `Connection`.
pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    for name in listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Appends the client address to `X-Forwarded-For`.
///
/// Multiple prior headers are folded into one comma-separated value.
pub fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let name = HeaderName::from_static("x-forwarded-for");
    let prior: Vec<&str> = headers
        .get_all(&name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        client.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}
