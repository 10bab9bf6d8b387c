//! Monitor configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`vigil.toml`)
//! - Environment variables (VIGIL_*) for anything the file leaves unset

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use vigil_core::batch::DEFAULT_MAX_HISTORY;
use vigil_core::presence::{
    DEFAULT_ACTIVE_THRESHOLD_MS, DEFAULT_CLEANUP_INTERVAL_MS, DEFAULT_STALE_THRESHOLD_MS,
};
use vigil_core::{BatchTrackerConfig, PresenceConfig, RosterMember};

/// Monitor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Event backend connection.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// HTTP views.
    #[serde(default)]
    pub http: HttpConfig,

    /// Batch lifecycle tracking.
    #[serde(default)]
    pub batches: BatchesConfig,

    /// Zone presence tracking.
    #[serde(default)]
    pub presence: PresenceSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Upstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// WebSocket URL of the event stream.
    #[serde(default = "default_upstream_url")]
    pub url: String,
}

/// HTTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Batch tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchesConfig {
    /// Terminal batches kept.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Only track batches from this camera.
    #[serde(default)]
    pub camera_id: Option<String>,
}

/// Presence tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSection {
    #[serde(default = "default_zone_id")]
    pub zone_id: String,

    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_ms: u64,

    #[serde(default = "default_active_threshold")]
    pub active_threshold_ms: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,

    /// Known household members and visitors.
    #[serde(default)]
    pub roster: Vec<RosterMember>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_upstream_url() -> String {
    std::env::var("VIGIL_UPSTREAM_URL")
        .unwrap_or_else(|_| "ws://127.0.0.1:8000/ws/events".to_string())
}

fn default_host() -> String {
    std::env::var("VIGIL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("VIGIL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

fn default_zone_id() -> String {
    "front_door".to_string()
}

fn default_stale_threshold() -> u64 {
    DEFAULT_STALE_THRESHOLD_MS
}

fn default_active_threshold() -> u64 {
    DEFAULT_ACTIVE_THRESHOLD_MS
}

fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for BatchesConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            camera_id: None,
        }
    }
}

impl Default for PresenceSection {
    fn default() -> Self {
        Self {
            zone_id: default_zone_id(),
            stale_threshold_ms: default_stale_threshold(),
            active_threshold_ms: default_active_threshold(),
            cleanup_interval_ms: default_cleanup_interval(),
            roster: Vec::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `VIGIL_CONFIG`, the default paths, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed or
    /// holds invalid tracker settings.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("VIGIL_CONFIG") {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        let config_paths = [
            "vigil.toml",
            "/etc/vigil/vigil.toml",
            "~/.config/vigil/vigil.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_toml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Check tracker settings without building trackers.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.batch_tracker_config()
            .validate()
            .context("Invalid [batches] section")?;
        self.presence_config()
            .validate()
            .context("Invalid [presence] section")?;
        Ok(())
    }

    /// Get the socket address to bind the HTTP views to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.http.host, self.http.port)
            .parse()
            .with_context(|| format!("Invalid HTTP bind {}:{}", self.http.host, self.http.port))
    }

    #[must_use]
    pub fn batch_tracker_config(&self) -> BatchTrackerConfig {
        BatchTrackerConfig {
            max_history: self.batches.max_history,
            camera_id: self.batches.camera_id.clone(),
        }
    }

    #[must_use]
    pub fn presence_config(&self) -> PresenceConfig {
        PresenceConfig {
            zone_id: self.presence.zone_id.clone(),
            stale_threshold_ms: self.presence.stale_threshold_ms,
            active_threshold_ms: self.presence.active_threshold_ms,
            cleanup_interval_ms: self.presence.cleanup_interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::MemberRole;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.batches.max_history, 50);
        assert_eq!(config.presence.stale_threshold_ms, 300_000);
        assert_eq!(config.presence.active_threshold_ms, 30_000);
        assert_eq!(config.presence.cleanup_interval_ms, 60_000);
        assert!(config.presence.roster.is_empty());
        assert!(config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.http.host = "0.0.0.0".to_string();
        config.http.port = 9000;
        assert_eq!(config.bind_addr().unwrap().port(), 9000);

        config.http.host = "not a host".to_string();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [upstream]
            url = "ws://nvr.local:8000/ws/events"

            [batches]
            max_history = 10
            camera_id = "garage"

            [presence]
            zone_id = "porch"
            stale_threshold_ms = 120000

            [[presence.roster]]
            id = "m-alex"
            name = "Alex"
            role = "resident"
        "#;

        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.upstream.url, "ws://nvr.local:8000/ws/events");
        assert_eq!(config.batch_tracker_config().max_history, 10);
        assert_eq!(config.batches.camera_id.as_deref(), Some("garage"));

        let presence = config.presence_config();
        assert_eq!(presence.zone_id, "porch");
        assert_eq!(presence.stale_threshold_ms, 120_000);
        assert_eq!(presence.active_threshold_ms, 30_000);
        assert_eq!(config.presence.roster[0].role, MemberRole::Resident);
    }

    #[test]
    fn test_config_rejects_invalid_trackers() {
        assert!(Config::from_toml("[batches]\nmax_history = 0").is_err());
        assert!(Config::from_toml("[presence]\ncleanup_interval_ms = 0").is_err());
        assert!(Config::from_toml(
            "[presence]\nstale_threshold_ms = 1000\nactive_threshold_ms = 2000"
        )
        .is_err());
    }

    #[test]
    fn test_config_rejects_unknown_role() {
        let toml_str = r#"
            [[presence.roster]]
            id = "m-1"
            name = "Pat"
            role = "landlord"
        "#;
        assert!(Config::from_toml(toml_str).is_err());
    }
}
