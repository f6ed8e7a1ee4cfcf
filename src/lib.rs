//! Host-based reverse proxy for in-cluster services.
//!
//! Routes `<service>.<anything>` to `<service>.<namespace>.svc.cluster.local:80`
//! after confirming the service exists in the Kubernetes API.

pub mod config;
pub mod health;
pub mod proxy;
pub mod registry;
pub mod server;

pub use config::{Config, ConfigError, LogFormat};
pub use proxy::{HyperForwarder, Router};
pub use registry::{KubeRegistry, MemoryRegistry, ServiceRegistry};
pub use server::{shutdown_signal, Server, ServerConfig, ServerState};
