use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Environment variable consulted when no token is set in the config file.
pub const TOKEN_ENV_VAR: &str = "CORKBOARD_TOKEN";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Board server endpoints and credentials
    pub server: ServerConfig,

    /// Synchronization engine tuning
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// REST base URL, e.g. `http://localhost:8000/api/v1`
    pub api_url: String,

    /// Push channel base URL. Derived from `api_url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,

    /// Per-request timeout for REST calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Session credential (JWT). Falls back to `CORKBOARD_TOKEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Fixed delay before the push channel reconnects after an abnormal close
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Pointer travel (pixels) before a press turns into a drag
    #[serde(default = "default_drag_activation_distance")]
    pub drag_activation_distance: f64,
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_drag_activation_distance() -> f64 {
    3.0
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            drag_activation_distance: default_drag_activation_distance(),
        }
    }
}

impl SyncConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                api_url: "http://localhost:8000/api/v1".to_string(),
                ws_url: None,
                request_timeout_secs: default_request_timeout_secs(),
                token: None,
            },
            sync: SyncConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Session credential from the config file or the environment.
    ///
    /// Blank tokens count as absent.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Base URL for the push channel.
    ///
    /// Uses `ws_url` when set, otherwise swaps the scheme of `api_url`
    /// (`http` -> `ws`, `https` -> `wss`).
    pub fn push_base_url(&self) -> Result<Url, ConfigError> {
        if let Some(ws) = &self.ws_url {
            return Url::parse(ws).map_err(|e| ConfigError::Invalid(format!("ws_url: {}", e)));
        }

        let mut url = Url::parse(&self.api_url)
            .map_err(|e| ConfigError::Invalid(format!("api_url: {}", e)))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ConfigError::Invalid(format!(
                    "api_url: cannot derive push URL from scheme {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::Invalid("api_url: scheme swap failed".to_string()))?;
        Ok(url)
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, creating default if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(
            &self.server.api_url,
            "server.api_url",
            &["http", "https"],
            &mut result,
        );

        if let Some(ws) = &self.server.ws_url {
            self.validate_url(ws, "server.ws_url", &["ws", "wss"], &mut result);
        }

        if self.server.request_timeout_secs == 0 {
            result.add_error(
                "server.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        }

        if self.server.resolved_token().is_none() {
            result.add_warning(
                "server.token",
                format!(
                    "No session token configured (set {}) - live updates disabled",
                    TOKEN_ENV_VAR
                ),
            );
        }

        if self.sync.reconnect_delay_ms == 0 {
            result.add_error(
                "sync.reconnect_delay_ms",
                "Reconnect delay must be greater than 0",
            );
        } else if self.sync.reconnect_delay_ms > 60_000 {
            result.add_warning(
                "sync.reconnect_delay_ms",
                "Reconnect delay is more than a minute",
            );
        }

        let distance = self.sync.drag_activation_distance;
        if !distance.is_finite() || distance < 0.0 {
            result.add_error(
                "sync.drag_activation_distance",
                "Activation distance must be a non-negative number",
            );
        }

        result
    }

    /// Validate a URL field against a set of allowed schemes
    fn validate_url(
        &self,
        url_str: &str,
        field_name: &str,
        schemes: &[&str],
        result: &mut ValidationResult,
    ) {
        match Url::parse(url_str) {
            Ok(url) => {
                if !schemes.contains(&url.scheme()) {
                    result.add_error(
                        field_name,
                        format!(
                            "URL must use {} scheme, got: {}",
                            schemes.join(" or "),
                            url.scheme()
                        ),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("corkboard");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(
            result.is_valid(),
            "Default config should be valid: {:?}",
            result.errors
        );
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.server.api_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "server.api_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.server.api_url = "ftp://localhost:8000".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_ws_url_must_use_ws_scheme() {
        let mut config = Config::default();
        config.server.ws_url = Some("http://localhost:8000/api/v1".to_string());
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "server.ws_url"));
    }

    #[test]
    fn test_zero_reconnect_delay_is_error() {
        let mut config = Config::default();
        config.sync.reconnect_delay_ms = 0;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result
            .errors
            .iter()
            .any(|e| e.field == "sync.reconnect_delay_ms"));
    }

    #[test]
    fn test_negative_activation_distance_is_error() {
        let mut config = Config::default();
        config.sync.drag_activation_distance = -1.0;
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn test_push_url_derived_from_api_url() {
        let mut server = Config::default().server;
        server.api_url = "https://boards.example.com/api/v1".to_string();
        let url = server.push_base_url().unwrap();
        assert_eq!(url.as_str(), "wss://boards.example.com/api/v1");
    }

    #[test]
    fn test_explicit_ws_url_wins() {
        let mut server = Config::default().server;
        server.ws_url = Some("ws://push.local:9000/api/v1".to_string());
        let url = server.push_base_url().unwrap();
        assert_eq!(url.host_str(), Some("push.local"));
    }

    #[test]
    fn test_blank_token_counts_as_missing() {
        let mut server = Config::default().server;
        server.token = Some("   ".to_string());
        if std::env::var(TOKEN_ENV_VAR).is_err() {
            assert!(server.resolved_token().is_none());
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.server.token = Some("secret".to_string());
        config.sync.reconnect_delay_ms = 1500;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.server.token.as_deref(), Some("secret"));
        assert_eq!(loaded.sync.reconnect_delay_ms, 1500);
    }

    #[test]
    fn test_load_creates_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.sync.reconnect_delay_ms, 3000);
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
