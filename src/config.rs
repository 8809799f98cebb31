//! Configuration loading from TOML files and environment variables.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::RelayError;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub prompt: PromptConfig,
    pub stream: StreamConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the relay listens on.
    pub listen_addr: String,

    /// Path of the event-stream endpoint.
    pub stream_path: String,

    /// Number of framed events buffered between a session and its response body.
    pub channel_capacity: usize,

    /// Graceful shutdown timeout (seconds).
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            stream_path: "/api/ideas".to_string(),
            channel_capacity: 32,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, RelayError> {
        self.listen_addr.parse().map_err(|e| {
            RelayError::Config(format!("Invalid listen address {}: {}", self.listen_addr, e))
        })
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Backend configuration for the upstream completion API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend provider: "mock" or "openai".
    pub provider: String,

    /// Model requested from the upstream API.
    pub default_model: String,

    /// TCP connect timeout for the upstream API (seconds).
    pub connect_timeout_secs: u64,

    /// Delay between fragments emitted by the mock backend (milliseconds).
    pub mock_delay_ms: u64,

    /// OpenAI-specific settings.
    pub openai: OpenAIConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            connect_timeout_secs: 10,
            mock_delay_ms: 40,
            openai: OpenAIConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn mock_delay(&self) -> Duration {
        Duration::from_millis(self.mock_delay_ms)
    }
}

/// OpenAI-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAIConfig {
    /// API key (can also be set via OPENAI_API_KEY env var).
    pub api_key: Option<String>,

    /// API base URL.
    pub api_base: String,

    /// Maximum idle connections per host in pool.
    pub pool_max_idle_per_host: usize,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            pool_max_idle_per_host: 16,
        }
    }
}

/// Server-defined prompt sent upstream for every request.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub system: Option<String>,
    pub user: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: Some(
                "You are a helpful assistant that answers in GitHub-flavored markdown.".to_string(),
            ),
            user: "Give me five ideas for a weekend side project. \
                   Use a numbered list with a short bold title and one sentence each."
                .to_string(),
            max_tokens: Some(1024),
            temperature: Some(0.9),
        }
    }
}

/// Event-stream framing options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Append an `end` event after normal upstream completion.
    pub end_event: bool,
}

/// Metrics/Prometheus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint.
    pub enabled: bool,

    /// Listen address for metrics server.
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn").
    pub level: String,

    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from file, then apply environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, RelayError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("RELAY_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(v) = var("RELAY_STREAM_PATH") {
            self.server.stream_path = v;
        }

        if let Some(v) = var("RELAY_BACKEND_PROVIDER") {
            self.backend.provider = v;
        }
        if let Some(v) = var("RELAY_DEFAULT_MODEL") {
            self.backend.default_model = v;
        }
        if let Some(n) = var("RELAY_MOCK_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.backend.mock_delay_ms = n;
        }

        // Standard OpenAI variables
        if let Some(v) = var("OPENAI_API_KEY") {
            self.backend.openai.api_key = Some(v);
        }
        if let Some(v) = var("OPENAI_API_BASE") {
            self.backend.openai.api_base = v;
        }

        if let Some(v) = var("RELAY_PROMPT") {
            self.prompt.user = v;
        }
        if let Some(v) = var("RELAY_END_EVENT") {
            self.stream.end_event = is_truthy(&v);
        }

        if let Some(v) = var("RELAY_METRICS_ENABLED") {
            self.metrics.enabled = is_truthy(&v);
        }
        if let Some(v) = var("RELAY_METRICS_ADDR") {
            self.metrics.listen_addr = v;
        }

        if let Some(v) = var("RELAY_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = var("RELAY_LOG_FORMAT") {
            self.logging.format = v;
        }
    }
}

fn is_truthy(v: &str) -> bool {
    v == "true" || v == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.server.stream_path, "/api/ideas");
        assert_eq!(config.backend.provider, "mock");
        assert!(!config.stream.end_event);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [server]
            listen_addr = "0.0.0.0:8080"

            [backend]
            provider = "openai"
            default_model = "gpt-4o"

            [backend.openai]
            api_base = "http://localhost:9000/v1"

            [prompt]
            user = "Three ideas, please"

            [stream]
            end_event = true
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.server.stream_path, "/api/ideas");
        assert_eq!(config.backend.provider, "openai");
        assert_eq!(config.backend.default_model, "gpt-4o");
        assert_eq!(config.backend.openai.api_base, "http://localhost:9000/v1");
        assert_eq!(config.prompt.user, "Three ideas, please");
        assert!(config.prompt.system.is_some());
        assert!(config.stream.end_event);
    }

    #[test]
    fn test_sample_config_parses() {
        let config: Config = toml::from_str(include_str!("../config/relay.toml")).unwrap();
        assert_eq!(config.backend.provider, "openai");
        assert!(config.backend.openai.api_key.is_none());
        assert_eq!(config.server.socket_addr().unwrap().port(), 3000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RELAY_LISTEN_ADDR", "127.0.0.1:4000"),
            ("RELAY_BACKEND_PROVIDER", "openai"),
            ("RELAY_MOCK_DELAY_MS", "not-a-number"),
            ("OPENAI_API_KEY", "sk-test"),
            ("RELAY_END_EVENT", "1"),
            ("RELAY_METRICS_ENABLED", "yes"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.backend.provider, "openai");
        assert_eq!(config.backend.mock_delay_ms, 40);
        assert_eq!(config.backend.openai.api_key.as_deref(), Some("sk-test"));
        assert!(config.stream.end_event);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_invalid_listen_addr() {
        let server = ServerConfig {
            listen_addr: "localhost".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(server.socket_addr(), Err(RelayError::Config(_))));
    }
}
