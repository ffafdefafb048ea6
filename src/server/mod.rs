//! Authorizer HTTP server
//!
//! Hosts the authorizer behind `POST /authorize` so any gateway that can
//! call an HTTP endpoint per request (and cache the verdict) can use it.

mod router;

pub use router::{AppState, create_router};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use crate::authorizer::TokenAuthorizer;
use crate::config::Config;
use crate::store::TokenStore;
use crate::{Error, Result};

/// Authorizer server
pub struct Server {
    config: Config,
    authorizer: Arc<TokenAuthorizer>,
}

impl Server {
    /// Create a server over an already-connected store
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn TokenStore>) -> Self {
        let authorizer = Arc::new(TokenAuthorizer::new(
            store,
            config.authorizer.clone(),
            config.store.timeout,
        ));
        Self { config, authorizer }
    }

    /// Run until SIGINT/SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let state = Arc::new(AppState {
            authorizer: Arc::clone(&self.authorizer),
            request_timeout: self.config.server.request_timeout,
        });
        let app = create_router(state);

        let listener = TcpListener::bind(addr).await?;

        info!(
            host = %self.config.server.host,
            port = self.config.server.port,
            principal = %self.config.authorizer.principal_id,
            result_ttl_secs = self.config.authorizer.result_ttl.as_secs(),
            store_timeout_ms = self.config.store.timeout.as_millis(),
            "Token authorizer listening"
        );
        info!("  POST http://{addr}/authorize");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let mut serve = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tokio::select! {
            joined = &mut serve => return flatten(joined),
            () = shutdown_signal() => {}
        }
        let _ = shutdown_tx.send(());

        // In-flight requests get `shutdown_timeout` to drain
        let shutdown_timeout = self.config.server.shutdown_timeout;
        match tokio::time::timeout(shutdown_timeout, serve).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                warn!(?shutdown_timeout, "Graceful shutdown timed out");
                Ok(())
            }
        }
    }
}

fn flatten(
    joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(result) => result.map_err(Error::from),
        Err(e) => Err(Error::Internal(format!("Server task failed: {e}"))),
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
