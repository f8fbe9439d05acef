//! HTTP and WebSocket routes for one mounted page.
//!
//! ## Endpoints (relative to the page route)
//!
//! - `GET /`: the rendered page
//! - `GET /data/{id}`: plot snapshot JSON
//! - `GET /ws/{id}?since=N`: update stream (only when live updates are enabled)
//! - `GET /js/plotlyConnect.js`: client bootstrap script
//! - `GET /js/plotly.min.js`: charting engine bundle

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::dispatch::DispatchLoop;
use super::page::{CONNECT_SCRIPT, ENGINE_BUNDLE, HtmlFragment, PageUrls, PlotPage, RenderSettings, render_page};
use super::registry::PlotRegistry;
use super::snapshot::{PlotSnapshot, get_snapshot};
use super::stream::StreamPolicy;
use crate::config::ServerConfig;
use crate::error::PlotError;

/// Public CDN location of the charting engine, used when no local bundle is configured.
pub const ENGINE_CDN_URL: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

const CONNECT_SCRIPT_SOURCE: &str = include_str!("assets/plotlyConnect.js");

/// Settings shared by every route of a server.
pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) global_headers: Vec<HtmlFragment>,
    pub(crate) cancel: CancellationToken,
}

/// Shared state for axum handlers of one page.
#[derive(Clone)]
struct RouteState {
    page: Arc<PlotPage>,
    registry: Arc<PlotRegistry>,
    shared: Arc<ServerShared>,
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    since: Option<u64>,
}

/// Build the router for one page, relative to its route.
pub(crate) fn page_router(
    page: PlotPage,
    registry: Arc<PlotRegistry>,
    shared: Arc<ServerShared>,
) -> Router {
    let live = StreamPolicy::for_config(&shared.config).is_some();
    let state = RouteState {
        page: Arc::new(page),
        registry,
        shared,
    };

    let mut router = Router::new()
        .route("/", get(handle_page))
        .route("/data/", get(handle_missing_id))
        .route("/data/{id}", get(handle_data))
        .route("/ws/", get(handle_missing_id))
        .route(&format!("/js/{CONNECT_SCRIPT}"), get(handle_connect_script))
        .route(&format!("/js/{ENGINE_BUNDLE}"), get(handle_engine_bundle));
    if live {
        router = router.route("/ws/{id}", get(handle_stream));
    }
    router.with_state(state)
}

/// Redirect `{route}/` to `{route}` for a page nested below the root.
pub(crate) fn trailing_slash_redirect(route: &str) -> Router {
    let target = route.to_owned();
    Router::new().route(
        &format!("{route}/"),
        get(move || {
            let target = target.clone();
            async move { Redirect::permanent(&target) }
        }),
    )
}

/// `GET /`: render the page and register its plots.
async fn handle_page(State(state): State<RouteState>) -> Result<Html<String>, PlotError> {
    let urls = PageUrls::new(state.page.route());
    render_page(
        &state.page,
        &state.shared.global_headers,
        RenderSettings::from(&state.shared.config),
        &urls,
        &state.registry,
    )
    .map(Html)
}

/// `GET /data/{id}`: plot snapshot.
async fn handle_data(
    State(state): State<RouteState>,
    Path(id): Path<String>,
) -> Result<PlotSnapshot, PlotError> {
    get_snapshot(&state.registry, &id)
}

/// `GET /data/` and `GET /ws/`: no plot id given.
async fn handle_missing_id() -> PlotError {
    PlotError::InvalidParameter("Plot id not defined".to_owned())
}

/// `GET /ws/{id}`: upgrade and run a dispatch loop.
async fn handle_stream(
    ws: WebSocketUpgrade,
    State(state): State<RouteState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let Some(policy) = StreamPolicy::for_config(&state.shared.config) else {
        return (StatusCode::NOT_FOUND, "live updates are disabled").into_response();
    };
    debug!(plot_id = %id, since = ?query.since, "opening update stream");
    let dispatch = DispatchLoop::new(
        id,
        query.since,
        policy,
        Arc::clone(&state.registry),
        state.shared.cancel.child_token(),
    );
    ws.on_upgrade(move |socket| async move {
        let (tx, rx) = socket.split();
        dispatch.run(tx, rx).await;
    })
}

/// `GET /js/plotlyConnect.js`
async fn handle_connect_script() -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/javascript"),
        )],
        CONNECT_SCRIPT_SOURCE,
    )
}

/// `GET /js/plotly.min.js`: local bundle or CDN redirect.
async fn handle_engine_bundle(State(state): State<RouteState>) -> Response {
    let Some(dir) = state.shared.config.assets_dir.as_ref() else {
        return Redirect::temporary(ENGINE_CDN_URL).into_response();
    };
    match tokio::fs::read(dir.join(ENGINE_BUNDLE)).await {
        Ok(bytes) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/javascript"),
            )],
            bytes,
        )
            .into_response(),
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "engine bundle not readable");
            (StatusCode::NOT_FOUND, format!("{ENGINE_BUNDLE} not found")).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn connect_script_defines_client_contract() {
        for function in ["makePlot", "createPlotFrom", "startPush", "startPull"] {
            assert!(
                CONNECT_SCRIPT_SOURCE.contains(&format!("function {function}(")),
                "missing {function}"
            );
        }
    }

    #[tokio::test]
    async fn missing_id_is_bad_request() {
        let response = handle_missing_id().await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Plot id not defined");
    }

    #[test]
    fn connect_script_waits_for_fetched_version() {
        assert!(CONNECT_SCRIPT_SOURCE.contains("return fetch(url)"));
        assert!(CONNECT_SCRIPT_SOURCE.contains("x-plot-version"));
        assert!(CONNECT_SCRIPT_SOURCE.contains("\"?since=\" + since"));
    }
}
