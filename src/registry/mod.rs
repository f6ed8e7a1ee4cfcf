//! Service registry lookups.
//!
//! The router only needs to know whether a service with a given name
//! exists in a namespace. [`KubeRegistry`] asks the Kubernetes API,
//! [`MemoryRegistry`] answers from an in-process set.

mod kubernetes;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::kubernetes::KubeRegistry;
pub use self::memory::MemoryRegistry;

/// Outcome of a successful registry query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found,
    NotFound,
}

/// Registry query failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
}

/// Longest name a Kubernetes `Service` may have.
pub const MAX_SERVICE_NAME_LEN: usize = 63;

/// Whether `name` is a valid `Service` name (an RFC 1123 DNS label).
///
/// Lowercase ASCII letters, digits and `-`, at most 63 characters,
/// starting and ending with a letter or digit. No service can exist under
/// any other name, so callers may treat anything else as not found.
pub fn is_service_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= MAX_SERVICE_NAME_LEN
                && alnum(first)
                && alnum(last)
                && bytes.iter().all(|b| alnum(b) || *b == b'-')
        }
        _ => false,
    }
}

/// Existence check for a named service within a namespace.
///
/// Implementations must be safe to call concurrently from many requests.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn lookup(&self, name: &str, namespace: &str) -> Result<Lookup, RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_accepts_dns_labels() {
        assert!(is_service_name("foo"));
        assert!(is_service_name("api-v2"));
        assert!(is_service_name("9lives"));
        assert!(is_service_name(&"a".repeat(MAX_SERVICE_NAME_LEN)));
    }

    #[test]
    fn test_service_name_rejects_path_and_url_characters() {
        for name in ["foo/status", "foo?watch=1", "user@foo", "foo:8080", "foo%2f", "foo bar"] {
            assert!(!is_service_name(name), "{name} accepted");
        }
    }

    #[test]
    fn test_service_name_rejects_bad_shape() {
        assert!(!is_service_name(""));
        assert!(!is_service_name("-foo"));
        assert!(!is_service_name("foo-"));
        assert!(!is_service_name("Foo"));
        assert!(!is_service_name("[::1]"));
        assert!(!is_service_name(&"a".repeat(MAX_SERVICE_NAME_LEN + 1)));
    }
}
