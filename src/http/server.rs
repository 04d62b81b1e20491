//! HTTP server for the decision service.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::service::build_app;
use crate::error::{Result, TollgateError};
use crate::router::PolicyRouter;

/// HTTP server exposing `POST /v1/decide` and `GET /health`.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The policy router shared by every request
    router: Arc<PolicyRouter>,
    request_timeout: Duration,
    purge_interval: Duration,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, router: Arc<PolicyRouter>) -> Self {
        Self {
            addr,
            router,
            request_timeout: Duration::from_secs(1),
            purge_interval: Duration::from_secs(60),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let app = build_app(self.router.clone(), self.request_timeout);
        let purger = spawn_purger(self.router.clone(), self.purge_interval);

        info!(addr = %local_addr, "Starting HTTP decision service");

        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await;

        purger.abort();

        served.map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Io(e)
        })
    }
}

/// Periodically drop counters whose window has closed.
fn spawn_purger(router: Arc<PolicyRouter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if interval.is_zero() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = router.purge_expired().await;
            if purged > 0 {
                debug!(purged, "Expired counters purged");
            }
        }
    })
}
