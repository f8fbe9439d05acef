//! Page renderer.
//!
//! A [`PlotPage`] describes what one route shows: a title, extra `<head>`
//! fragments and a content callback that places plots (and any surrounding
//! HTML) on the page. The callback runs on every render, so the plots it
//! places are re-registered each time and the last render wins.
//!
//! Each placed plot becomes a `<div>` tagged with its ID followed by a
//! script that either embeds the plot JSON or points the client at the data
//! URL, then starts push or pull updates when live updates are enabled.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::registry::PlotRegistry;
use crate::config::{ServerConfig, UpdateMode};
use crate::error::Result;
use crate::plot::PlotState;

/// File name of the client bootstrap script under `{route}/js/`.
pub const CONNECT_SCRIPT: &str = "plotlyConnect.js";

/// File name of the charting engine bundle under `{route}/js/`.
pub const ENGINE_BUNDLE: &str = "plotly.min.js";

/// Raw HTML inserted verbatim into a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlFragment(String);

impl HtmlFragment {
    /// Wrap raw HTML.
    pub fn new(html: impl Into<String>) -> Self {
        Self(html.into())
    }

    /// The raw HTML.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A plot placed on a page.
#[derive(Debug, Clone)]
pub struct PlacedPlot {
    /// Identifier the plot is registered and addressed under.
    pub id: String,
    /// The backing state.
    pub state: Arc<PlotState>,
    /// Client-side engine options (`responsive`, `displayModeBar`, ...).
    pub config: Value,
}

#[derive(Debug, Clone)]
enum Block {
    Html(String),
    Plot(PlacedPlot),
}

/// Content collected while a page renders.
#[derive(Debug, Default)]
pub struct PageContent {
    blocks: Vec<Block>,
}

impl PageContent {
    /// Place a plot under its own identifier.
    pub fn plot(&mut self, state: &Arc<PlotState>) -> &mut Self {
        let id = state.id().to_owned();
        self.plot_with_id(id, state)
    }

    /// Place a plot under a caller-chosen identifier.
    pub fn plot_with_id(&mut self, id: impl Into<String>, state: &Arc<PlotState>) -> &mut Self {
        self.plot_with_config(id, state, Value::Object(serde_json::Map::new()))
    }

    /// Place a plot with client-side engine options.
    pub fn plot_with_config(
        &mut self,
        id: impl Into<String>,
        state: &Arc<PlotState>,
        config: Value,
    ) -> &mut Self {
        self.blocks.push(Block::Plot(PlacedPlot {
            id: id.into(),
            state: Arc::clone(state),
            config,
        }));
        self
    }

    /// Insert raw HTML between plots.
    pub fn html(&mut self, fragment: &HtmlFragment) -> &mut Self {
        self.blocks.push(Block::Html(fragment.as_str().to_owned()));
        self
    }

    /// Plots placed so far, in page order.
    pub fn plots(&self) -> impl Iterator<Item = &PlacedPlot> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Plot(p) => Some(p),
            Block::Html(_) => None,
        })
    }
}

type ContentFn = dyn Fn(&mut PageContent) + Send + Sync;

/// One page mounted at a route.
#[derive(Clone)]
pub struct PlotPage {
    route: String,
    title: String,
    headers: Vec<HtmlFragment>,
    content: Arc<ContentFn>,
}

impl PlotPage {
    /// Create a page at `route` whose content is produced by `content`.
    pub fn new(
        route: impl Into<String>,
        content: impl Fn(&mut PageContent) + Send + Sync + 'static,
    ) -> Self {
        let route = normalize_route(&route.into());
        let shown = if route.is_empty() { "/" } else { route.as_str() };
        Self {
            title: format!("Plot server page '{shown}'"),
            route,
            headers: Vec::new(),
            content: Arc::new(content),
        }
    }

    /// A page showing a single plot.
    pub fn single(route: impl Into<String>, state: Arc<PlotState>) -> Self {
        Self::new(route, move |page| {
            page.plot(&state);
        })
    }

    /// Set the page title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Add a `<head>` fragment for this page only.
    pub fn with_header(mut self, header: HtmlFragment) -> Self {
        self.headers.push(header);
        self
    }

    /// Normalized route: `""` for the root, otherwise `/a/b` without a trailing slash.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// The page title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Run the content callback.
    pub fn collect(&self) -> PageContent {
        let mut content = PageContent::default();
        (self.content)(&mut content);
        content
    }
}

impl std::fmt::Debug for PlotPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlotPage")
            .field("route", &self.route)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

/// Rendering options taken from the server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    /// Update strategy to bootstrap.
    pub mode: UpdateMode,
    /// Polling interval for pull mode, in milliseconds.
    pub interval_ms: u64,
    /// Embed plot JSON instead of referencing the data URL.
    pub embed_data: bool,
}

impl From<&ServerConfig> for RenderSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            mode: config.update.mode,
            interval_ms: config.update.interval_ms,
            embed_data: config.embed_data,
        }
    }
}

/// URLs for one route, as seen by the requesting browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrls {
    route: String,
}

impl PageUrls {
    /// URLs under `route`.
    pub fn new(route: &str) -> Self {
        Self {
            route: normalize_route(route),
        }
    }

    /// Snapshot endpoint of a plot.
    pub fn data_url(&self, id: &str) -> String {
        format!("{}/data/{}", self.route, urlencoding::encode(id))
    }

    /// Stream endpoint of a plot, relative to the page origin.
    ///
    /// The client appends `?since=` and picks `ws:` or `wss:` from the page
    /// protocol.
    pub fn stream_url(&self, id: &str) -> String {
        format!("{}/ws/{}", self.route, urlencoding::encode(id))
    }

    /// Static asset under the route.
    pub fn asset_url(&self, file: &str) -> String {
        format!("{}/js/{file}", self.route)
    }
}

/// Render `page` to a full HTML document and register its plots.
///
/// `global_headers` go into every page's `<head>` before the page's own
/// headers.
///
/// # Errors
///
/// Returns an error if a plot cannot be serialized.
pub fn render_page(
    page: &PlotPage,
    global_headers: &[HtmlFragment],
    settings: RenderSettings,
    urls: &PageUrls,
    registry: &PlotRegistry,
) -> Result<String> {
    let content = page.collect();

    let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    for header in global_headers.iter().chain(&page.headers) {
        html.push_str(header.as_str());
        html.push('\n');
    }
    for file in [ENGINE_BUNDLE, CONNECT_SCRIPT] {
        html.push_str(&format!(
            "<script type=\"text/javascript\" src=\"{}\"></script>\n",
            html_escape(&urls.asset_url(file))
        ));
    }
    html.push_str(&format!("<title>{}</title>\n</head>\n<body>\n", html_escape(&page.title)));

    let mut plots = 0usize;
    for block in &content.blocks {
        match block {
            Block::Html(raw) => {
                html.push_str(raw);
                html.push('\n');
            }
            Block::Plot(placed) => {
                registry.register(placed.id.clone(), Arc::clone(&placed.state));
                html.push_str(&render_plot(placed, settings, urls)?);
                plots += 1;
            }
        }
    }

    html.push_str("</body>\n</html>\n");
    debug!(route = page.route(), plots, mode = %settings.mode, "page rendered");
    Ok(html)
}

/// Container and bootstrap script for one plot.
fn render_plot(placed: &PlacedPlot, settings: RenderSettings, urls: &PageUrls) -> Result<String> {
    let (version, plot) = placed.state.versioned_plot();
    let id = js_string(&placed.id)?;
    let config = script_safe(serde_json::to_string(&placed.config)?);
    let data_url = js_string(&urls.data_url(&placed.id))?;

    // Updates start from the version the client actually holds: the render
    // version when the data is inlined, the fetched version otherwise.
    let since = if settings.embed_data {
        version.to_string()
    } else {
        "version".to_owned()
    };
    let start = match settings.mode {
        UpdateMode::Push => {
            let ws_url = js_string(&urls.stream_url(&placed.id))?;
            Some(format!("startPush({id}, {ws_url}, {since})"))
        }
        UpdateMode::Pull => Some(format!(
            "startPull({id}, {data_url}, {})",
            settings.interval_ms
        )),
        UpdateMode::None => None,
    };

    let mut script = String::new();
    if settings.embed_data {
        let data = script_safe(serde_json::to_string(&plot.data)?);
        let layout = script_safe(serde_json::to_string(&plot.layout)?);
        script.push_str(&format!("    makePlot({id}, {data}, {layout}, {config});\n"));
        if let Some(start) = start {
            script.push_str(&format!("    {start};\n"));
        }
    } else {
        match start {
            Some(start) => script.push_str(&format!(
                "    createPlotFrom({id}, {data_url}, {config}).then(function (version) {{ {start}; }});\n"
            )),
            None => script.push_str(&format!("    createPlotFrom({id}, {data_url}, {config});\n")),
        }
    }

    Ok(format!(
        "<div id=\"{}\">\n<script>\n{script}</script>\n</div>\n",
        html_escape(&placed.id)
    ))
}

/// Normalize a route to `""` (root) or `/a/b`.
pub fn normalize_route(route: &str) -> String {
    let trimmed = route.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Quote a string as a JavaScript literal safe inside `<script>`.
fn js_string(s: &str) -> Result<String> {
    Ok(script_safe(serde_json::to_string(s)?))
}

/// Keep JSON from closing the surrounding `<script>` element.
fn script_safe(json: String) -> String {
    json.replace("</", "<\\/")
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
