//! Error types for the plot server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Top-level error type for plot state, routing and configuration.
#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    /// The requested plot identifier is not registered under the route.
    #[error("Plot with id = {0} not found")]
    NotFound(String),

    /// A required request parameter is missing or malformed. The message is
    /// the response body as-is.
    #[error("{0}")]
    InvalidParameter(String),

    /// The subscriber went away while an update was being delivered.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// Configuration error (rejected at startup).
    #[error("config error: {0}")]
    Config(String),

    /// A validated plot option was set outside its allowed range.
    #[error("{field} = {value} is out of range {range}")]
    OutOfRange {
        /// Option name, e.g. `opacity`.
        field: &'static str,
        /// The rejected value.
        value: f64,
        /// Human-readable description of the accepted range.
        range: &'static str,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP server error (bind, serve).
    #[error("server error: {0}")]
    Server(String),
}

impl PlotError {
    /// HTTP status used when this error ends a request.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidParameter(_) | Self::OutOfRange { .. } | Self::Config(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::TransportClosed(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PlotError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PlotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_plot() {
        let err = PlotError::NotFound("missing".to_owned());
        assert_eq!(err.to_string(), "Plot with id = missing not found");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn request_errors_map_to_bad_request() {
        let missing = PlotError::InvalidParameter("Plot id not defined".to_owned());
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert_eq!(missing.to_string(), "Plot id not defined");
        let range = PlotError::OutOfRange {
            field: "opacity",
            value: 2.0,
            range: "0.0..=1.0",
        };
        assert_eq!(range.status(), StatusCode::BAD_REQUEST);
        assert_eq!(range.to_string(), "opacity = 2 is out of range 0.0..=1.0");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::other("disk gone");
        let err: PlotError = io.into();
        assert!(matches!(err, PlotError::Io(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
