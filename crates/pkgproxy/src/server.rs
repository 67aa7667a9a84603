//! HTTP listener wiring: binds the socket, builds the [`Coordinator`] and
//! serves every request through it.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{Method, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{CacheStore, MemoryBarrier};
use crate::coordinator::Coordinator;
use crate::filter::FilterSet;
use crate::stats::Stats;
use crate::upstream::HttpUpstream;
use crate::{ProxyError, ServerConfig};

/// A bound proxy, ready to serve
pub struct Server {
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    filters_path: Option<PathBuf>,
}

impl Server {
    /// Open the cache, load filters and bind the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ProxyError> {
        let store = CacheStore::open(&config.cache_root, Arc::new(MemoryBarrier::new())).await?;
        match store.sweep_staging().await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed leftover staging files"),
            Err(e) => warn!(error = %e, "Failed to sweep staging directory"),
        }

        let filters = Arc::new(FilterSet::new());
        if let Some(path) = &config.filters_path {
            filters.load(path)?;
        }

        let upstream = Arc::new(HttpUpstream::new(&config.upstream)?);
        let coordinator = Coordinator::new(Arc::new(store), filters, upstream, Arc::new(Stats::new()))
            .with_upstream_base(config.upstream.upstream.clone())
            .with_relay_buffer(config.relay_buffer);

        let listener = TcpListener::bind(config.bind_addr).await?;
        info!(
            addr = %listener.local_addr()?,
            root = %config.cache_root.display(),
            "Listening"
        );

        Ok(Self {
            listener,
            coordinator: Arc::new(coordinator),
            filters_path: config.filters_path,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.coordinator.stats().clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/debug/vars", any(debug_vars))
            .fallback(proxy)
            .with_state(self.coordinator.clone())
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let reload = self.watch_filters()?;

        let result = axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(task) = reload {
            task.abort();
        }

        info!("Proxy stopped");
        result.map_err(ProxyError::from)
    }

    /// Reload the filter file on `SIGHUP`
    #[cfg(unix)]
    fn watch_filters(&self) -> Result<Option<JoinHandle<()>>, ProxyError> {
        use tokio::signal::unix::{SignalKind, signal};

        let Some(path) = self.filters_path.clone() else {
            return Ok(None);
        };
        let filters = self.coordinator.filters().clone();
        let mut hangup = signal(SignalKind::hangup())?;

        Ok(Some(tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!(path = %path.display(), "SIGHUP received, reloading filters");
                if let Err(e) = filters.load(&path) {
                    warn!(error = %e, "Filter reload failed, keeping current filters");
                }
            }
        })))
    }

    #[cfg(not(unix))]
    fn watch_filters(&self) -> Result<Option<JoinHandle<()>>, ProxyError> {
        Ok(None)
    }
}

async fn proxy(State(coordinator): State<Arc<Coordinator>>, request: Request) -> Response {
    coordinator.handle(request).await
}

/// Byte counters, unless the request is a proxied absolute-form one
async fn debug_vars(State(coordinator): State<Arc<Coordinator>>, request: Request) -> Response {
    if request.uri().authority().is_some() || request.method() != Method::GET {
        return coordinator.handle(request).await;
    }
    (
        [(header::CONTENT_TYPE, "application/json")],
        coordinator.stats().to_json(),
    )
        .into_response()
}
