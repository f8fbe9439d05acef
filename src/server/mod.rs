//! Live plot server.
//!
//! [`PlotServer`] collects pages and global headers, then [`PlotServer::start`]
//! binds a listener and serves every page's routes with axum. The returned
//! [`RunningServer`] owns the shutdown token; dropping it stops the server.

pub mod dispatch;
pub mod page;
pub mod registry;
pub mod routes;
pub mod snapshot;
pub mod stream;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{PlotError, Result};

pub use dispatch::{DispatchLoop, DispatchOutcome, DispatchState};
pub use page::{HtmlFragment, PageContent, PlotPage};
pub use registry::PlotRegistry;
pub use snapshot::{PlotSnapshot, VERSION_HEADER, get_snapshot};
pub use stream::{StreamPolicy, UpdateStream, open_stream};

use routes::{ServerShared, page_router};

/// Builder for a plot server.
pub struct PlotServer {
    config: ServerConfig,
    headers: Vec<HtmlFragment>,
    pages: Vec<PlotPage>,
}

impl PlotServer {
    /// Create a server with `config` and no pages.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            headers: Vec::new(),
            pages: Vec::new(),
        }
    }

    /// Add a `<head>` fragment to every page.
    pub fn header(mut self, header: HtmlFragment) -> Self {
        self.headers.push(header);
        self
    }

    /// Mount a page at its route.
    pub fn page(mut self, page: PlotPage) -> Self {
        self.pages.push(page);
        self
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the axum router without binding.
    ///
    /// Returns the router and the per-route registries.
    ///
    /// # Errors
    ///
    /// Returns [`PlotError::Config`] if the configuration is invalid or two
    /// pages share a route.
    pub fn into_router(
        self,
        cancel: CancellationToken,
    ) -> Result<(Router, HashMap<String, Arc<PlotRegistry>>)> {
        self.config.validate()?;

        let cors_any_origin = self.config.cors_any_origin;
        let capacity = self.config.change_log_capacity;
        let shared = Arc::new(ServerShared {
            config: self.config,
            global_headers: self.headers,
            cancel,
        });

        let mut registries = HashMap::new();
        let mut app = Router::new();
        for page in self.pages {
            let route = page.route().to_owned();
            if registries.contains_key(&route) {
                return Err(PlotError::Config(format!(
                    "duplicate page route '{}'",
                    if route.is_empty() { "/" } else { &route }
                )));
            }
            let registry = Arc::new(PlotRegistry::with_log_capacity(capacity));
            let router = page_router(page, Arc::clone(&registry), Arc::clone(&shared));
            app = if route.is_empty() {
                app.merge(router)
            } else {
                app.nest(&route, router)
                    .merge(routes::trailing_slash_redirect(&route))
            };
            registries.insert(route, registry);
        }

        if registries.is_empty() {
            warn!("plot server started without pages");
        }
        if cors_any_origin {
            app = app.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }
        Ok((app, registries))
    }

    /// Bind and start serving in a background task.
    ///
    /// # Errors
    ///
    /// Returns [`PlotError::Config`] for an invalid configuration and
    /// [`PlotError::Server`] if the address cannot be bound.
    pub async fn start(self) -> Result<RunningServer> {
        let cancel = CancellationToken::new();
        let bind = format!("{}:{}", self.config.host, self.config.port);
        let (app, registries) = self.into_router(cancel.clone())?;

        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| PlotError::Server(format!("failed to bind {bind}: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| PlotError::Server(format!("failed to read local address: {e}")))?;

        info!(%addr, pages = registries.len(), "plot server listening");

        let shutdown = cancel.clone();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "plot server stopped with error");
            }
            info!(%addr, "plot server stopped");
        });

        Ok(RunningServer {
            addr,
            cancel,
            registries,
            handle: Some(handle),
        })
    }
}

/// Handle to a started server.
///
/// Dropping the handle triggers shutdown.
pub struct RunningServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    registries: HashMap<String, Arc<PlotRegistry>>,
    handle: Option<JoinHandle<()>>,
}

impl RunningServer {
    /// The bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Base HTTP URL, e.g. `http://127.0.0.1:7777`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Registry of the page mounted at `route`.
    pub fn registry(&self, route: &str) -> Option<Arc<PlotRegistry>> {
        self.registries
            .get(&page::normalize_route(route))
            .map(Arc::clone)
    }

    /// Token cancelled on shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the server to stop. Open update streams are closed.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Stop the server and wait for the serve task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "plot server task failed");
        }
    }

    /// Wait until the server stops (after [`shutdown`](Self::shutdown) or
    /// cancellation of its token).
    pub async fn wait(mut self) {
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "plot server task failed");
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for RunningServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningServer")
            .field("addr", &self.addr)
            .field("routes", &self.registries.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::plot::{Plot, PlotState};

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    fn single(route: &str) -> PlotPage {
        PlotPage::single(route, PlotState::new(Plot::new()).shared())
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let server = PlotServer::new(test_config())
            .page(single("/a"))
            .page(single("a/"));
        let err = server.into_router(CancellationToken::new()).unwrap_err();
        assert!(matches!(err, PlotError::Config(_)));
    }

    #[test]
    fn registries_keyed_by_normalized_route() {
        let server = PlotServer::new(test_config())
            .page(single(""))
            .page(single("/live/"));
        let (_, registries) = server.into_router(CancellationToken::new()).unwrap();
        assert!(registries.contains_key(""));
        assert!(registries.contains_key("/live"));
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port() {
        let server = PlotServer::new(test_config())
            .page(single("/"))
            .start()
            .await
            .unwrap();
        assert_ne!(server.port(), 0);
        assert!(server.registry("/").is_some());
        assert!(server.registry("/other").is_none());
        server.stop().await;
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let mut config = test_config();
        config.update.interval_ms = 0;
        let result = PlotServer::new(config).page(single("")).start().await;
        assert!(matches!(result, Err(PlotError::Config(_))));
    }
}
