//! Cluster-internal target addresses.

/// Port every backend service is reached on.
pub const TARGET_PORT: u16 = 80;

/// Builds upstream URLs for routing keys within one namespace.
///
/// Pure: no I/O and no caching, the address is recomputed per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResolver {
    namespace: String,
    cluster_domain: String,
}

impl TargetResolver {
    pub fn new(namespace: impl Into<String>, cluster_domain: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            cluster_domain: cluster_domain.into(),
        }
    }

    /// Namespace the resolver builds addresses for.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns `http://<key>.<namespace>.<cluster-domain>:80`.
    ///
    /// The key must be non-empty; the router rejects empty keys before
    /// calling this.
    pub fn resolve(&self, key: &str) -> String {
        debug_assert!(!key.is_empty(), "routing key must not be empty");
        format!(
            "http://{}.{}.{}:{}",
            key, self.namespace, self.cluster_domain, TARGET_PORT
        )
    }
}
