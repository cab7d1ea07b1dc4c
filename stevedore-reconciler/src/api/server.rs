//! HTTP server setup and connection handling.

use super::router;
use super::state::AppState;
use crate::controller::ControllerHandle;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Configuration for the status API server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl ServerConfig {
    /// Create a new server configuration.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        let host: std::net::IpAddr = self.host.parse().unwrap_or([127, 0, 0, 1].into());
        SocketAddr::new(host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8484,
        }
    }
}

/// The operator-facing HTTP API server.
pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a new API server over a controller handle.
    #[must_use]
    pub fn new(config: ServerConfig, handle: ControllerHandle) -> Self {
        Self {
            config,
            state: Arc::new(AppState::new(handle)),
        }
    }

    /// Serve until the shutdown signal fires.
    ///
    /// # Errors
    ///
    /// Fails if the listen address cannot be bound.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        if *shutdown.borrow_and_update() {
            return Ok(());
        }
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "Status API listening");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        let service =
                            service_fn(move |req| router::route(req, state.clone()));
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            tracing::debug!(remote = %remote, error = %e, "Connection error");
                        }
                    });
                }
            }
        }

        tracing::info!("Status API stopped");
        Ok(())
    }
}
