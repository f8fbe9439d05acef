//! Plot configuration model.
//!
//! Traces and layout are open key/value maps so any option understood by
//! the browser-side charting engine can be carried through untouched. Typed
//! setters cover the common options; range-checked ones return
//! [`PlotError::OutOfRange`] instead of storing a value the engine would reject.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PlotError, Result};

/// One data series of a plot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace(Map<String, Value>);

impl Trace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a trace from x/y samples.
    pub fn xy(x: impl IntoIterator<Item = f64>, y: impl IntoIterator<Item = f64>) -> Self {
        let mut trace = Self::new();
        trace.set_x(x);
        trace.set_y(y);
        trace
    }

    /// Series name shown in the legend.
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// Set the series name.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.set("name", Value::String(name.into()))
    }

    /// Set the trace type (`scatter`, `bar`, `histogram`, ...).
    pub fn set_kind(&mut self, kind: impl Into<String>) -> &mut Self {
        self.set("type", Value::String(kind.into()))
    }

    /// Set the drawing mode (`lines`, `markers`, `lines+markers`).
    pub fn set_mode(&mut self, mode: impl Into<String>) -> &mut Self {
        self.set("mode", Value::String(mode.into()))
    }

    /// Replace the x samples.
    pub fn set_x(&mut self, x: impl IntoIterator<Item = f64>) -> &mut Self {
        self.set("x", number_array(x))
    }

    /// Replace the y samples.
    pub fn set_y(&mut self, y: impl IntoIterator<Item = f64>) -> &mut Self {
        self.set("y", number_array(y))
    }

    /// Set the trace opacity.
    ///
    /// # Errors
    ///
    /// Returns [`PlotError::OutOfRange`] unless `0.0 <= opacity <= 1.0`.
    pub fn set_opacity(&mut self, opacity: f64) -> Result<&mut Self> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(PlotError::OutOfRange {
                field: "opacity",
                value: opacity,
                range: "0.0..=1.0",
            });
        }
        Ok(self.set("opacity", Value::from(opacity)))
    }

    /// Set an arbitrary option.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Read an arbitrary option.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Axis options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Axis {
    /// Axis title.
    pub title: Option<String>,
    /// Axis type (`linear`, `log`, `date`, `category`).
    pub kind: Option<String>,
}

impl Axis {
    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(title) = &self.title {
            map.insert("title".to_owned(), serde_json::json!({ "text": title }));
        }
        if let Some(kind) = &self.kind {
            map.insert("type".to_owned(), Value::String(kind.clone()));
        }
        Value::Object(map)
    }
}

/// Display options for a whole plot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Layout(Map<String, Value>);

impl Layout {
    /// Create an empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the plot title.
    pub fn set_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.set("title", serde_json::json!({ "text": title.into() }))
    }

    /// Set the x axis options.
    pub fn set_xaxis(&mut self, axis: &Axis) -> &mut Self {
        self.set("xaxis", axis.to_value())
    }

    /// Set the y axis options.
    pub fn set_yaxis(&mut self, axis: &Axis) -> &mut Self {
        self.set("yaxis", axis.to_value())
    }

    /// Set the plot width in pixels.
    ///
    /// # Errors
    ///
    /// Returns [`PlotError::OutOfRange`] for a zero width.
    pub fn set_width(&mut self, width: u32) -> Result<&mut Self> {
        positive("width", width)?;
        Ok(self.set("width", Value::from(width)))
    }

    /// Set the plot height in pixels.
    ///
    /// # Errors
    ///
    /// Returns [`PlotError::OutOfRange`] for a zero height.
    pub fn set_height(&mut self, height: u32) -> Result<&mut Self> {
        positive("height", height)?;
        Ok(self.set("height", Value::from(height)))
    }

    /// Set an arbitrary option.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Remove an option, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Read an arbitrary option.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub(crate) fn entries(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// A chart: ordered traces plus layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plot {
    /// Data series, in drawing order.
    pub data: Vec<Trace>,
    /// Display options.
    pub layout: Layout,
}

impl Plot {
    /// Create an empty plot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a trace, returning its index.
    pub fn add_trace(&mut self, trace: Trace) -> usize {
        self.data.push(trace);
        self.data.len() - 1
    }

    /// Builder form of [`add_trace`](Self::add_trace).
    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.data.push(trace);
        self
    }

    /// Mutable access to the trace at `index`.
    pub fn trace_mut(&mut self, index: usize) -> Option<&mut Trace> {
        self.data.get_mut(index)
    }

    /// Mutable access to the layout.
    pub fn layout_mut(&mut self) -> &mut Layout {
        &mut self.layout
    }

    /// Canonical JSON form: `{"data": [...], "layout": {...}}` with sorted keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be serialized.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn number_array(values: impl IntoIterator<Item = f64>) -> Value {
    Value::Array(values.into_iter().map(Value::from).collect())
}

fn positive(field: &'static str, value: u32) -> Result<()> {
    if value == 0 {
        return Err(PlotError::OutOfRange {
            field,
            value: f64::from(value),
            range: "> 0",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn trace_setters_store_values() {
        let mut trace = Trace::xy([1.0, 2.0], [3.0, 4.0]);
        trace.set_name("Random data").set_kind("histogram");
        assert_eq!(trace.name(), Some("Random data"));
        assert_eq!(trace.get("type"), Some(&Value::from("histogram")));
        assert_eq!(trace.get("x"), Some(&serde_json::json!([1.0, 2.0])));
    }

    #[test]
    fn opacity_out_of_range_is_rejected() {
        let mut trace = Trace::new();
        assert!(trace.set_opacity(0.5).is_ok());
        let err = trace.set_opacity(1.5).unwrap_err();
        assert!(matches!(err, PlotError::OutOfRange { field: "opacity", .. }));
        assert_eq!(trace.get("opacity"), Some(&Value::from(0.5)));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let mut layout = Layout::new();
        assert!(layout.set_width(0).is_err());
        assert!(layout.set_height(480).is_ok());
        assert!(layout.get("width").is_none());
    }

    #[test]
    fn axis_titles_nest_under_text() {
        let mut layout = Layout::new();
        layout.set_xaxis(&Axis {
            title: Some("Bins".to_owned()),
            kind: None,
        });
        assert_eq!(
            layout.get("xaxis"),
            Some(&serde_json::json!({ "title": { "text": "Bins" } }))
        );
    }

    #[test]
    fn json_keys_are_sorted() {
        let mut trace = Trace::new();
        trace.set("z", Value::from(1)).set("a", Value::from(2));
        let plot = Plot::new().with_trace(trace);
        let json = plot.to_json_string().unwrap();
        assert_eq!(json, r#"{"data":[{"a":2,"z":1}],"layout":{}}"#);
    }

    #[test]
    fn plot_round_trips_through_json() {
        let mut plot = Plot::new().with_trace(Trace::xy([0.0], [1.0]));
        plot.layout_mut().set_title("Cumulative Histogram");
        let json = plot.to_json_string().unwrap();
        let parsed: Plot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, plot);
    }
}
