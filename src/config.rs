//! Process configuration loaded from the environment.
//!
//! Read once at startup and passed into the router and server.
//! Nothing on the request path touches the environment.

use std::convert::Infallible;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Suffix appended to `<service>.<namespace>` for in-cluster addresses.
pub const DEFAULT_CLUSTER_DOMAIN: &str = "svc.cluster.local";

/// Default bound on a single registry lookup.
pub const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 5;

/// Startup configuration errors. All of them are fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// `json` (any case) selects JSON output; anything else is pretty.
impl FromStr for LogFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Ok(Self::Pretty)
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace used for registry lookups and target addresses.
    pub namespace: String,
    /// Cluster DNS suffix, e.g. `svc.cluster.local`.
    pub cluster_domain: String,
    /// Upper bound for one registry lookup.
    pub registry_timeout: Duration,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration using the given variable lookup.
    ///
    /// Split out from [`Config::from_env`] so tests don't have to mutate
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("POD_NAMESPACE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("POD_NAMESPACE"))?;

        let cluster_domain = lookup("CLUSTER_DOMAIN")
            .map(|v| v.trim().trim_matches('.').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_CLUSTER_DOMAIN.to_string());

        let registry_timeout = match lookup("REGISTRY_TIMEOUT_SECS") {
            None => Duration::from_secs(DEFAULT_REGISTRY_TIMEOUT_SECS),
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "REGISTRY_TIMEOUT_SECS",
                        value: raw,
                    })
                }
            },
        };

        let log_format = match lookup("LOG_FORMAT") {
            Some(raw) => raw.parse().unwrap_or(LogFormat::Pretty),
            None => LogFormat::Pretty,
        };

        Ok(Self {
            namespace,
            cluster_domain,
            registry_timeout,
            log_format,
        })
    }
}
