//! HTTP listener and graceful shutdown.
//!
//! Serves `/health` and the subdomain router on one socket. Each
//! connection runs in its own task; on shutdown the listener is closed,
//! open connections are asked to finish their current request, and
//! anything still running after the grace period is aborted.
//!
//! A connection whose peer goes away is dropped together with the request
//! it was serving, so registry lookups and upstream calls stop as well.

use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;

use crate::health;
use crate::proxy::{text_response, ProxyBody, Router};

/// How often a connection with unread input is re-checked for a closed peer.
const PEER_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Address the proxy listens on.
pub const LISTEN_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080);

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Deadline for receiving a complete request head.
    pub read_timeout: Duration,
    /// Deadline for producing the response head.
    pub write_timeout: Duration,
    /// Keep-alive connections with no request in flight are closed after this.
    pub idle_timeout: Duration,
    /// How long in-flight requests may run after shutdown starts.
    pub grace_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: LISTEN_ADDR,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Lifecycle of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Serving,
    ShuttingDown,
    Stopped,
}

pub struct Server {
    config: ServerConfig,
    router: Arc<Router>,
    state: watch::Sender<ServerState>,
}

impl Server {
    pub fn new(config: ServerConfig, router: Arc<Router>) -> Self {
        let (state, _) = watch::channel(ServerState::Starting);
        Self {
            config,
            router,
            state,
        }
    }

    /// Subscribes to lifecycle state changes.
    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Accepts connections until `shutdown` resolves, then drains.
    ///
    /// Returns once every connection has finished or the grace period
    /// has run out. Errors while draining are logged, never returned.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        self.set_state(ServerState::Serving);
        tracing::info!(addr = %addr, "server listening");

        let (drain_tx, drain_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        connections.spawn(serve_connection(
                            stream,
                            remote,
                            self.router.clone(),
                            self.config.clone(),
                            drain_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        // Refuse new connections from here on.
        drop(listener);
        self.set_state(ServerState::ShuttingDown);
        tracing::info!(
            open_connections = connections.len(),
            grace_period = ?self.config.grace_period,
            "shutting down server"
        );
        let _ = drain_tx.send(true);

        let drained = tokio::time::timeout(self.config.grace_period, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "grace period expired, closing remaining connections"
            );
            connections.shutdown().await;
        }

        self.set_state(ServerState::Stopped);
        tracing::info!("server stopped");
        Ok(())
    }

    fn set_state(&self, next: ServerState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(from = ?previous, to = ?next, "server state changed");
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received interrupt"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    router: Arc<Router>,
    config: ServerConfig,
    mut drain: watch::Receiver<bool>,
) {
    let (stream, watcher) = match watch_handle(stream) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, remote = %remote, "failed to set up connection");
            return;
        }
    };

    let activity = Arc::new(Activity::default());
    let write_timeout = config.write_timeout;

    let service = {
        let activity = activity.clone();
        service_fn(move |req| {
            let router = router.clone();
            let activity = activity.clone();
            async move {
                let _busy = activity.begin();
                Ok::<_, Infallible>(dispatch(&router, req, remote, write_timeout).await)
            }
        })
    };

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(config.read_timeout)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(conn);

    let mut closing = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, remote = %remote, "connection error");
                }
                break;
            }
            _ = drain.changed(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
            _ = activity.idle(config.idle_timeout), if !closing => {
                tracing::debug!(remote = %remote, "closing idle connection");
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
            _ = peer_closed(&watcher) => {
                tracing::debug!(
                    remote = %remote,
                    in_flight = activity.in_flight(),
                    "peer closed connection"
                );
                break;
            }
        }
    }
}

/// Splits off a second handle to the same socket.
///
/// hyper owns the first one; the second is only ever peeked, so it sees
/// the peer closing while a request is still being handled.
fn watch_handle(stream: TcpStream) -> std::io::Result<(TcpStream, TcpStream)> {
    let stream = stream.into_std()?;
    let watcher = stream.try_clone()?;
    Ok((TcpStream::from_std(stream)?, TcpStream::from_std(watcher)?))
}

/// Resolves once the peer has closed or reset the connection.
///
/// Unread input is left for hyper. While there is some, EOF cannot be seen
/// behind it, so the check is repeated on an interval.
async fn peer_closed(socket: &TcpStream) {
    let mut buf = [0u8; 1];
    loop {
        match socket.peek(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => tokio::time::sleep(PEER_CHECK_INTERVAL).await,
        }
    }
}

async fn dispatch(
    router: &Router,
    req: Request<Incoming>,
    remote: SocketAddr,
    write_timeout: Duration,
) -> Response<ProxyBody> {
    if health::is_health_check(&req) {
        return health::health_response();
    }

    match tokio::time::timeout(write_timeout, router.handle(req, Some(remote.ip()))).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(
                remote = %remote,
                timeout = ?write_timeout,
                "request exceeded write timeout"
            );
            text_response(StatusCode::SERVICE_UNAVAILABLE, "service unavailable")
        }
    }
}

/// Tracks in-flight requests on one connection.
#[derive(Default)]
struct Activity {
    in_flight: AtomicUsize,
    changed: Notify,
}

impl Activity {
    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn begin(self: &Arc<Self>) -> Busy {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
        Busy(self.clone())
    }

    /// Resolves once no request has been in flight for `timeout`.
    async fn idle(&self, timeout: Duration) {
        loop {
            let changed = self.changed.notified();
            if self.in_flight.load(Ordering::SeqCst) > 0 {
                changed.await;
                continue;
            }
            if tokio::time::timeout(timeout, changed).await.is_err() {
                return;
            }
        }
    }
}

struct Busy(Arc<Activity>);

impl Drop for Busy {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.changed.notify_waiters();
    }
}
