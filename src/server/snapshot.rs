//! Snapshot responder: the full JSON of a registered plot.

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::registry::PlotRegistry;
use crate::error::Result;

/// Response header carrying the snapshot's version.
pub const VERSION_HEADER: HeaderName = HeaderName::from_static("x-plot-version");

/// Full JSON of a plot at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotSnapshot {
    /// Plot the snapshot belongs to.
    pub plot_id: String,
    /// Version the JSON was taken at.
    pub version: u64,
    /// Canonical JSON (`{"data": [...], "layout": {...}}`).
    pub json: String,
}

/// Serialize the current state of plot `id`.
///
/// Has no side effects on the plot or registry.
///
/// # Errors
///
/// Returns [`PlotError::NotFound`](crate::error::PlotError::NotFound) if `id`
/// is not registered.
pub fn get_snapshot(registry: &PlotRegistry, id: &str) -> Result<PlotSnapshot> {
    let state = registry.get(id)?;
    let (version, plot) = state.versioned_plot();
    Ok(PlotSnapshot {
        plot_id: id.to_owned(),
        version,
        json: plot.to_json_string()?,
    })
}

impl IntoResponse for PlotSnapshot {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                ),
                (VERSION_HEADER, HeaderValue::from(self.version)),
            ],
            self.json,
        )
            .into_response()
    }
}
