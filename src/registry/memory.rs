//! In-memory service registry using DashSet.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashSet;

use super::{Lookup, RegistryError, ServiceRegistry};

/// Thread-safe set of known services, keyed as `namespace/name`.
///
/// Counts every lookup so callers can check whether the registry was
/// consulted at all.
pub struct MemoryRegistry {
    services: DashSet<String>,
    lookups: AtomicU64,
}

impl MemoryRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self {
            services: DashSet::new(),
            lookups: AtomicU64::new(0),
        }
    }

    /// Creates a registry holding the given service names in one namespace.
    pub fn with_services<I, S>(namespace: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = Self::new();
        for name in names {
            registry.insert(namespace, name.as_ref());
        }
        registry
    }

    /// Registers a service. Returns false if it was already present.
    pub fn insert(&self, namespace: &str, name: &str) -> bool {
        self.services.insert(Self::key(namespace, name))
    }

    /// Removes a service. Returns true if it was present.
    pub fn remove(&self, namespace: &str, name: &str) -> bool {
        self.services.remove(&Self::key(namespace, name)).is_some()
    }

    /// Returns whether the service is registered.
    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.services.contains(&Self::key(namespace, name))
    }

    /// Returns the number of registered services across all namespaces.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if no services are registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Returns how many lookups have been served.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    fn key(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    async fn lookup(&self, name: &str, namespace: &str) -> Result<Lookup, RegistryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.contains(namespace, name) {
            Ok(Lookup::Found)
        } else {
            Ok(Lookup::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_empty() {
        let registry = MemoryRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.lookup_count(), 0);
    }

    #[test]
    fn test_insert_and_contains() {
        let registry = MemoryRegistry::new();
        assert!(registry.insert("default", "foo"));
        assert!(!registry.insert("default", "foo"));
        assert!(registry.contains("default", "foo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_namespaces_are_separate() {
        let registry = MemoryRegistry::with_services("team-a", ["foo"]);
        assert!(registry.contains("team-a", "foo"));
        assert!(!registry.contains("team-b", "foo"));
    }

    #[test]
    fn test_remove() {
        let registry = MemoryRegistry::with_services("default", ["foo", "bar"]);
        assert!(registry.remove("default", "foo"));
        assert!(!registry.remove("default", "foo"));
        assert!(!registry.contains("default", "foo"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_found() {
        let registry = MemoryRegistry::with_services("default", ["foo"]);
        let result = registry.lookup("foo", "default").await.unwrap();
        assert_eq!(result, Lookup::Found);
    }

    #[tokio::test]
    async fn test_lookup_not_found() {
        let registry = MemoryRegistry::with_services("default", ["foo"]);
        let result = registry.lookup("bar", "default").await.unwrap();
        assert_eq!(result, Lookup::NotFound);
    }

    #[tokio::test]
    async fn test_lookup_is_exact_match() {
        let registry = MemoryRegistry::with_services("default", ["foo"]);
        assert_eq!(registry.lookup("Foo", "default").await.unwrap(), Lookup::NotFound);
        assert_eq!(registry.lookup("fo", "default").await.unwrap(), Lookup::NotFound);
    }

    #[tokio::test]
    async fn test_lookup_count_increments() {
        let registry = MemoryRegistry::new();
        registry.lookup("a", "default").await.unwrap();
        registry.lookup("b", "default").await.unwrap();
        assert_eq!(registry.lookup_count(), 2);
    }
}
