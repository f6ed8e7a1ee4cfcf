//! Subdomain routing for incoming HTTP requests.
//!
//! The first label of the Host header names the backend service. The
//! service must exist in the registry before anything is forwarded.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::{Request, Response};

use crate::config::Config;
use crate::registry::{is_service_name, Lookup, RegistryError, ServiceRegistry};

use super::error::RouteError;
use super::target::TargetResolver;
use super::upstream::{append_forwarded_for, Forwarder};
use super::ProxyBody;

/// Routes requests to `<subdomain>.<namespace>` services.
///
/// Holds only immutable state, so one instance is shared by every
/// connection.
pub struct Router<B = Incoming>
where
    B: Send + 'static,
{
    registry: Arc<dyn ServiceRegistry>,
    forwarder: Arc<dyn Forwarder<B>>,
    resolver: TargetResolver,
    registry_timeout: Duration,
}

impl<B: Send + 'static> Router<B> {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        forwarder: Arc<dyn Forwarder<B>>,
        resolver: TargetResolver,
        registry_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            forwarder,
            resolver,
            registry_timeout,
        }
    }

    /// Creates a router using namespace, domain and timeout from `config`.
    pub fn from_config(
        config: &Config,
        registry: Arc<dyn ServiceRegistry>,
        forwarder: Arc<dyn Forwarder<B>>,
    ) -> Self {
        Self::new(
            registry,
            forwarder,
            TargetResolver::new(&config.namespace, &config.cluster_domain),
            config.registry_timeout,
        )
    }

    /// Handles one request, always producing a response.
    pub async fn handle(&self, req: Request<B>, client_ip: Option<IpAddr>) -> Response<ProxyBody> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let (response, service) = match self.route(req, client_ip).await {
            Ok((response, service)) => (response, Some(service)),
            Err(e) => {
                e.log();
                let service = e.service().map(str::to_string);
                (e.into_response(), service)
            }
        };

        tracing::info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            service = service.as_deref().unwrap_or("-"),
            "request completed"
        );

        response
    }

    /// Resolves and forwards a request.
    ///
    /// On success returns the upstream response and the service name it
    /// was routed to.
    pub async fn route(
        &self,
        mut req: Request<B>,
        client_ip: Option<IpAddr>,
    ) -> Result<(Response<ProxyBody>, String), RouteError> {
        let host_header = req.headers().get(HOST).and_then(|v| v.to_str().ok());
        let authority = req.uri().authority().map(|a| a.as_str());
        let host = routing_host(host_header, authority).to_string();

        let service = match routing_key(&host) {
            Some(key) => key.to_string(),
            None => return Err(RouteError::InvalidHost { host }),
        };
        tracing::debug!(service = %service, host = %host, "incoming request");

        // No Service can carry this name, and it must not reach the
        // registry path or the target URL.
        if !is_service_name(&service) {
            return Err(RouteError::NotFound { service });
        }

        self.check_registry(&service).await?;

        let target = self.resolver.resolve(&service);
        if let Some(ip) = client_ip {
            append_forwarded_for(req.headers_mut(), ip);
        }

        match self.forwarder.forward(req, &target).await {
            Ok(response) => Ok((response, service)),
            Err(source) => Err(RouteError::Upstream {
                service,
                target,
                source,
            }),
        }
    }

    /// Confirms the service exists, bounded by the registry timeout.
    async fn check_registry(&self, service: &str) -> Result<(), RouteError> {
        let lookup = self.registry.lookup(service, self.resolver.namespace());

        match tokio::time::timeout(self.registry_timeout, lookup).await {
            Ok(Ok(Lookup::Found)) => Ok(()),
            Ok(Ok(Lookup::NotFound)) => Err(RouteError::NotFound {
                service: service.to_string(),
            }),
            Ok(Err(source)) => Err(RouteError::Registry {
                service: service.to_string(),
                source,
            }),
            Err(_) => Err(RouteError::Registry {
                service: service.to_string(),
                source: RegistryError::Timeout(self.registry_timeout),
            }),
        }
    }
}

/// Returns the routing key: everything before the first `.`.
///
/// A host without dots is its own key, port included. Returns `None`
/// when the key would be empty (empty host, leading dot).
pub fn routing_key(host: &str) -> Option<&str> {
    host.split('.').next().filter(|key| !key.is_empty())
}

/// Picks the host value a request is routed by.
///
/// The Host header wins; requests without one fall back to the
/// request-target authority. The value is returned as sent, so a
/// `:port` suffix stays part of it.
pub fn routing_host<'a>(host_header: Option<&'a str>, authority: Option<&'a str>) -> &'a str {
    host_header.or(authority).unwrap_or("")
}
