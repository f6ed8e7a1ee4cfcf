//! Health endpoint for Kubernetes liveness and readiness checks.
//!
//! `/health` answers 200 "healthy" for any method, Host header or body.
//! It never touches the registry, so it reports only that the process
//! is accepting connections.

use hyper::{Request, Response, StatusCode};

use crate::proxy::{text_response, ProxyBody};

pub const HEALTH_PATH: &str = "/health";

/// Returns true if the request targets the health endpoint.
pub fn is_health_check<B>(req: &Request<B>) -> bool {
    req.uri().path() == HEALTH_PATH
}

pub fn health_response() -> Response<ProxyBody> {
    text_response(StatusCode::OK, "healthy")
}
