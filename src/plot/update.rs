//! Update events: what changed between two versions of a plot.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::Plot;

/// A top-level field of a plot that a mutation touched.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "field", content = "key", rename_all = "snake_case")]
pub enum FieldPath {
    /// The trace at this index (added, replaced or removed).
    Trace(usize),
    /// A layout key (set or removed).
    Layout(String),
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace(index) => write!(f, "data[{index}]"),
            Self::Layout(key) => write!(f, "layout.{key}"),
        }
    }
}

/// Compute the fields that differ between two plot states.
pub fn diff(before: &Plot, after: &Plot) -> BTreeSet<FieldPath> {
    let mut changed = BTreeSet::new();

    let traces = before.data.len().max(after.data.len());
    for index in 0..traces {
        if before.data.get(index) != after.data.get(index) {
            changed.insert(FieldPath::Trace(index));
        }
    }

    let old = before.layout.entries();
    let new = after.layout.entries();
    for key in old.keys().chain(new.keys()) {
        if old.get(key) != new.get(key) {
            changed.insert(FieldPath::Layout(key.clone()));
        }
    }

    changed
}

/// Minimal change set for a client holding an older version.
///
/// `traces` and `layout` hold the current value for every changed entry;
/// `null` means the entry no longer exists. A client truncates its trace
/// list to `trace_count` after applying the trace entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotPatch {
    /// Number of traces at the target version.
    pub trace_count: usize,
    /// Changed traces by index.
    pub traces: BTreeMap<usize, Value>,
    /// Changed layout keys.
    pub layout: BTreeMap<String, Value>,
}

impl PlotPatch {
    /// Build a patch carrying the current value of each path in `paths`.
    pub fn from_paths<'a>(plot: &Plot, paths: impl IntoIterator<Item = &'a FieldPath>) -> Self {
        let mut patch = Self {
            trace_count: plot.data.len(),
            ..Self::default()
        };
        for path in paths {
            match path {
                FieldPath::Trace(index) => {
                    let value = plot
                        .data
                        .get(*index)
                        .and_then(|trace| serde_json::to_value(trace).ok())
                        .unwrap_or(Value::Null);
                    patch.traces.insert(*index, value);
                }
                FieldPath::Layout(key) => {
                    let value = plot.layout.get(key).cloned().unwrap_or(Value::Null);
                    patch.layout.insert(key.clone(), value);
                }
            }
        }
        patch
    }

    /// Apply this patch to `plot` in place.
    pub fn apply(&self, plot: &mut Plot) {
        for (index, value) in &self.traces {
            if value.is_null() {
                continue;
            }
            let Ok(trace) = serde_json::from_value(value.clone()) else {
                continue;
            };
            if *index < plot.data.len() {
                plot.data[*index] = trace;
            } else {
                plot.data.push(trace);
            }
        }
        plot.data.truncate(self.trace_count);
        for (key, value) in &self.layout {
            if value.is_null() {
                plot.layout.remove(key);
            } else {
                plot.layout.set(key.clone(), value.clone());
            }
        }
    }
}

/// Payload of an [`UpdateEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum UpdatePayload {
    /// The whole plot at `to_version`.
    Snapshot(Plot),
    /// Only the entries that changed since `since_version`.
    Patch(PlotPatch),
}

/// One observable delta of a plot.
///
/// Applying the payload to a client holding `since_version` yields the
/// state at `to_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    /// Plot the event belongs to.
    pub plot_id: String,
    /// Version the client is assumed to hold.
    pub since_version: u64,
    /// Version the event brings the client to.
    pub to_version: u64,
    /// Fields touched between the two versions.
    pub changed_paths: BTreeSet<FieldPath>,
    /// Snapshot or patch.
    pub update: UpdatePayload,
}

impl UpdateEvent {
    /// Whether the event carries a full snapshot.
    pub fn is_snapshot(&self) -> bool {
        matches!(self.update, UpdatePayload::Snapshot(_))
    }

    /// Serialize for a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_json_string(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
