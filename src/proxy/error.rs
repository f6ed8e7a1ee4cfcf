//! Routing failures and the responses they turn into.

use hyper::{Response, StatusCode};
use thiserror::Error;

use crate::registry::RegistryError;

use super::upstream::ProxyError;
use super::{text_response, ProxyBody};

/// Every way a routed request can fail.
///
/// Each variant maps to a fixed status and a short body. Not-found and
/// registry failures share a status but stay separate here so they can be
/// logged differently.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid host header '{host}'")]
    InvalidHost { host: String },

    #[error("service '{service}' not found")]
    NotFound { service: String },

    #[error("registry lookup for '{service}' failed: {source}")]
    Registry {
        service: String,
        #[source]
        source: RegistryError,
    },

    #[error("upstream {target} unavailable: {source}")]
    Upstream {
        service: String,
        target: String,
        #[source]
        source: ProxyError,
    },
}

impl RouteError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidHost { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } | Self::Registry { .. } => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Client-facing body. Never includes the underlying cause.
    pub fn body(&self) -> &'static str {
        match self {
            Self::InvalidHost { .. } => "invalid host header",
            Self::NotFound { .. } | Self::Registry { .. } => "Service not found",
            Self::Upstream { .. } => "service unavailable",
        }
    }

    /// Service name the failure relates to, if one was extracted.
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::InvalidHost { .. } => None,
            Self::NotFound { service }
            | Self::Registry { service, .. }
            | Self::Upstream { service, .. } => Some(service),
        }
    }

    pub fn log(&self) {
        match self {
            Self::InvalidHost { host } => {
                tracing::info!(host = %host, "rejecting request with invalid host header");
            }
            Self::NotFound { service } => {
                tracing::info!(service = %service, "service not found");
            }
            Self::Registry { service, source } => {
                tracing::warn!(service = %service, error = %source, "registry lookup failed");
            }
            Self::Upstream {
                service,
                target,
                source,
            } => {
                tracing::warn!(
                    service = %service,
                    target = %target,
                    error = %source,
                    "proxy error"
                );
            }
        }
    }

    pub fn into_response(self) -> Response<ProxyBody> {
        text_response(self.status(), self.body())
    }
}
