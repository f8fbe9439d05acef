//! plotlive: serve live-updating plots to browsers.
//!
//! A [`PlotState`] holds one plot and a monotonically increasing version.
//! Pages registered on a [`PlotServer`] render their plots as HTML, and
//! browsers keep them current through one of three update modes:
//!
//! - **none**: the page shows the state at render time
//! - **push**: a WebSocket stream sends an update after every mutation
//! - **pull**: the browser polls the snapshot endpoint on an interval
//!
//! # Architecture
//!
//! - [`plot`]: the plot model, versioned state, change log and update events
//! - [`server`]: per-route registries, snapshot and stream sources, page
//!   rendering, per-connection dispatch loops and the axum server
//! - [`config`]: TOML-backed server configuration
//! - [`error`]: the crate error type

pub mod config;
pub mod error;
pub mod plot;
pub mod server;

pub use config::{ServerConfig, UpdateConfig, UpdateMode};
pub use error::{PlotError, Result};
pub use plot::{Axis, FieldPath, Layout, Plot, PlotPatch, PlotState, Trace, UpdateEvent, UpdatePayload};
pub use server::{HtmlFragment, PageContent, PlotPage, PlotRegistry, PlotServer, RunningServer};
