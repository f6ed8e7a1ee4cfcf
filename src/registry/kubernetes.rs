//! Registry backed by the Kubernetes `Service` API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};

use super::{is_service_name, Lookup, RegistryError, ServiceRegistry};

/// Checks service existence with a namespaced GET on `v1/Service`.
///
/// `kube::Client` is a cheap handle over a shared connection pool, so one
/// instance serves every request.
#[derive(Clone)]
pub struct KubeRegistry {
    client: Client,
}

impl KubeRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceRegistry for KubeRegistry {
    async fn lookup(&self, name: &str, namespace: &str) -> Result<Lookup, RegistryError> {
        // The name becomes a URL path segment. Anything that is not a
        // valid Service name could address a subresource instead.
        if !is_service_name(name) {
            return Ok(Lookup::NotFound);
        }

        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);

        // get_opt maps a 404 from the API server to None.
        match services.get_opt(name).await? {
            Some(_) => Ok(Lookup::Found),
            None => Ok(Lookup::NotFound),
        }
    }
}
