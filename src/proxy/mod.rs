//! Subdomain routing and request forwarding.
//!
//! Takes the routing key from the Host header, checks the registry,
//! and forwards to the service's cluster-internal address.

mod error;
mod router;
mod target;
mod upstream;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use hyper::{Response, StatusCode};

pub use error::RouteError;
pub use router::{routing_host, routing_key, Router};
pub use target::{TargetResolver, TARGET_PORT};
pub use upstream::{append_forwarded_for, Forwarder, HyperForwarder, ProxyError};

/// Response body for both proxied and locally generated responses.
pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// Wraps a fully buffered chunk as a [`ProxyBody`].
pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Builds a short plain-text response.
pub fn text_response(status: StatusCode, body: &'static str) -> Response<ProxyBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    response
}
