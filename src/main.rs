//! subdomain-proxy entry point.
//!
//! Loads configuration, connects to the Kubernetes API and serves until
//! SIGTERM or Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::body::Incoming;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subdomain_proxy::{
    shutdown_signal, Config, HyperForwarder, KubeRegistry, LogFormat, Router, Server,
    ServerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(config.log_format);

    tracing::info!(
        namespace = %config.namespace,
        cluster_domain = %config.cluster_domain,
        registry_timeout = ?config.registry_timeout,
        "subdomain-proxy starting"
    );

    let kube_config =
        kube::Config::incluster().context("failed to create in-cluster config")?;
    let client =
        kube::Client::try_from(kube_config).context("failed to create kubernetes client")?;

    let router = Arc::new(Router::<Incoming>::from_config(
        &config,
        Arc::new(KubeRegistry::new(client)),
        Arc::new(HyperForwarder::<Incoming>::new()),
    ));

    let server_config = ServerConfig::default();
    let listener = TcpListener::bind(server_config.addr)
        .await
        .with_context(|| format!("failed to bind {}", server_config.addr))?;

    Server::new(server_config, router)
        .serve(listener, shutdown_signal())
        .await
        .context("server failed")?;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
