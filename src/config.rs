//! Configuration types for the plot server.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default cadence for push updates set through [`ServerConfig::push_updates`].
pub const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Default polling interval set through [`ServerConfig::pull_updates`].
pub const DEFAULT_PULL_INTERVAL: Duration = Duration::from_millis(1000);

/// How connected pages receive plot changes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Static pages; changes show up on reload only.
    #[default]
    None,
    /// Server pushes updates over a held-open WebSocket.
    Push,
    /// Client polls the data endpoint on a timer.
    Pull,
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// Live update settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Update strategy for every page of the server.
    pub mode: UpdateMode,
    /// Update cadence in milliseconds. Poll period in pull mode.
    pub interval_ms: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            mode: UpdateMode::None,
            interval_ms: 300,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` = auto-assign).
    pub port: u16,
    /// Live update settings.
    pub update: UpdateConfig,
    /// Embed plot JSON in the page instead of referencing the data URL.
    pub embed_data: bool,
    /// Directory holding `plotly.min.js`. When unset, the bundle path
    /// redirects to the public CDN.
    pub assets_dir: Option<PathBuf>,
    /// Allow cross-origin requests from any host.
    pub cors_any_origin: bool,
    /// Maximum number of change records retained per plot.
    pub change_log_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 7777,
            update: UpdateConfig::default(),
            embed_data: false,
            assets_dir: None,
            cors_any_origin: true,
            change_log_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Switch to push updates with the given cadence.
    ///
    /// Does not affect pages that were already loaded by a browser.
    pub fn push_updates(mut self, interval: Duration) -> Self {
        self.update.mode = UpdateMode::Push;
        self.update.interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Switch to pull updates with the given polling interval.
    ///
    /// Pull updates always carry the full plot, so they cost more than push
    /// updates.
    pub fn pull_updates(mut self, interval: Duration) -> Self {
        self.update.mode = UpdateMode::Pull;
        self.update.interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Update cadence as a [`Duration`].
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update.interval_ms)
    }

    /// Reject configurations the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`PlotError::Config`](crate::error::PlotError::Config) for a
    /// zero update interval, an empty host or a zero change log capacity.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.update.interval_ms == 0 {
            return Err(crate::error::PlotError::Config(
                "update.interval_ms must be greater than zero".to_owned(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(crate::error::PlotError::Config(
                "host must not be empty".to_owned(),
            ));
        }
        if self.change_log_capacity == 0 {
            return Err(crate::error::PlotError::Config(
                "change_log_capacity must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::PlotError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::PlotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ServerConfig::default();
        assert_eq!(config.update.mode, UpdateMode::None);
        assert_eq!(config.update.interval_ms, 300);
        assert!(!config.embed_data);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn push_and_pull_helpers_set_mode_and_interval() {
        let push = ServerConfig::default().push_updates(DEFAULT_PUSH_INTERVAL);
        assert_eq!(push.update.mode, UpdateMode::Push);
        assert_eq!(push.update.interval_ms, 100);

        let pull = ServerConfig::default().pull_updates(DEFAULT_PULL_INTERVAL);
        assert_eq!(pull.update.mode, UpdateMode::Pull);
        assert_eq!(pull.update_interval(), Duration::from_secs(1));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = ServerConfig::default().pull_updates(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("interval_ms"));
    }

    #[test]
    fn zero_log_capacity_is_rejected() {
        let config = ServerConfig {
            change_log_capacity: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
            port = 9000

            [update]
            mode = "pull"
        "#;
        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.update.mode, UpdateMode::Pull);
        assert_eq!(config.update.interval_ms, 300);
    }

    #[test]
    fn unknown_mode_fails_to_parse() {
        let toml_str = r#"
            [update]
            mode = "sometimes"
        "#;
        assert!(toml::from_str::<ServerConfig>(toml_str).is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("plotlive.toml");

        let mut config = ServerConfig::default().push_updates(Duration::from_millis(250));
        config.embed_data = true;
        config.port = 0;

        config.save_to_file(&path).unwrap();
        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.update.mode, UpdateMode::Push);
        assert_eq!(loaded.update.interval_ms, 250);
        assert!(loaded.embed_data);
        assert_eq!(loaded.port, 0);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = ServerConfig::from_file(std::path::Path::new("/nonexistent/plotlive.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn update_mode_display() {
        assert_eq!(UpdateMode::None.to_string(), "none");
        assert_eq!(UpdateMode::Push.to_string(), "push");
        assert_eq!(UpdateMode::Pull.to_string(), "pull");
    }

    #[test]
    fn oversized_interval_saturates() {
        let config = ServerConfig::default().pull_updates(Duration::MAX);
        assert_eq!(config.update.interval_ms, u64::MAX);
        let config = ServerConfig::default().push_updates(Duration::from_secs(2));
        assert_eq!(config.update.interval_ms, 2000);
    }
}
