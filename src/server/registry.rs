//! Thread-safe plot registry.
//!
//! One registry exists per mounted page route. Rendering a page registers
//! each plot on it; the data and stream endpoints look plots up by ID.
//! Entries stay until the server stops, so a client can still fetch a
//! snapshot after every subscriber has disconnected.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{PlotError, Result};
use crate::plot::PlotState;

/// Registry of plots, keyed by plot ID.
#[derive(Debug, Default)]
pub struct PlotRegistry {
    plots: RwLock<HashMap<String, Arc<PlotState>>>,
    log_capacity: Option<usize>,
}

impl PlotRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry that sets the change log capacity of every
    /// plot registered on it.
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            plots: RwLock::default(),
            log_capacity: Some(capacity),
        }
    }

    /// Register a plot under `id`. Returns the previous plot with the same ID, if any.
    ///
    /// Re-registering an ID replaces the entry: the last render wins.
    pub fn register(&self, id: impl Into<String>, plot: Arc<PlotState>) -> Option<Arc<PlotState>> {
        if let Some(capacity) = self.log_capacity {
            plot.set_log_capacity(capacity);
        }
        let mut plots = match self.plots.write() {
            Ok(p) => p,
            Err(p) => p.into_inner(),
        };
        plots.insert(id.into(), plot)
    }

    /// Register a plot under its own identifier.
    pub fn register_state(&self, plot: Arc<PlotState>) -> Option<Arc<PlotState>> {
        let id = plot.id().to_owned();
        self.register(id, plot)
    }

    /// Look up a plot by ID.
    ///
    /// # Errors
    ///
    /// Returns [`PlotError::NotFound`] if no plot is registered under `id`.
    pub fn get(&self, id: &str) -> Result<Arc<PlotState>> {
        let plots = match self.plots.read() {
            Ok(p) => p,
            Err(p) => p.into_inner(),
        };
        plots
            .get(id)
            .cloned()
            .ok_or_else(|| PlotError::NotFound(id.to_owned()))
    }

    /// List all registered plot IDs.
    pub fn plot_ids(&self) -> Vec<String> {
        match self.plots.read() {
            Ok(p) => p.keys().cloned().collect(),
            Err(p) => p.into_inner().keys().cloned().collect(),
        }
    }

    /// Number of registered plots.
    pub fn len(&self) -> usize {
        match self.plots.read() {
            Ok(p) => p.len(),
            Err(p) => p.into_inner().len(),
        }
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
