//! Configuration management for querywire
//!
//! Configuration is loaded from an optional YAML file, then overridden by
//! `QUERYWIRE_*` environment variables, then by command-line flags. Call
//! [`Config::validate`] before use.

use crate::error::{QuerywireError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Settings used by the client commands
    #[serde(default)]
    pub client: ClientConfig,

    /// Settings used by `serve`
    #[serde(default)]
    pub server: ServerConfig,

    /// Query backend
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Client connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host; resolved to an IPv4 address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Reconnect attempts after an unexpected disconnect
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay before the first reconnect attempt; doubles on each retry
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Per-request deadline (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    #[serde(default = "default_host")]
    pub bind_host: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum tool calls executing at once
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,

    /// Cache successful tool results
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,

    /// Lifetime of a cached result (seconds)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_max_concurrent_queries() -> usize {
    8
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_host(),
            port: default_port(),
            max_concurrent_queries: default_max_concurrent_queries(),
            cache_enabled: default_cache_enabled(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "querywire.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Parse `QUERYWIRE_*` variable `name` into `target`, keeping the current
/// value when it is unset or invalid.
fn env_override<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => {
                *target = value;
                tracing::debug!("Env override: {}", name);
            }
            Err(_) => tracing::warn!("Invalid {}: {}", name, raw),
        }
    }
}

impl Config {
    /// Load configuration from `path`, the environment, and `cli`
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Config`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| QuerywireError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| QuerywireError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(host) = std::env::var("QUERYWIRE_HOST") {
            self.client.host = host;
        }

        // One port for both ends: the client dials what the server binds.
        env_override("QUERYWIRE_PORT", &mut self.client.port);
        env_override("QUERYWIRE_PORT", &mut self.server.port);

        env_override(
            "QUERYWIRE_MAX_RECONNECT_ATTEMPTS",
            &mut self.client.max_reconnect_attempts,
        );
        env_override(
            "QUERYWIRE_RECONNECT_BASE_DELAY_MS",
            &mut self.client.reconnect_base_delay_ms,
        );
        env_override(
            "QUERYWIRE_REQUEST_TIMEOUT_SECS",
            &mut self.client.request_timeout_secs,
        );

        if let Ok(bind_host) = std::env::var("QUERYWIRE_BIND_HOST") {
            self.server.bind_host = bind_host;
        }
        env_override(
            "QUERYWIRE_MAX_CONCURRENT_QUERIES",
            &mut self.server.max_concurrent_queries,
        );
        env_override("QUERYWIRE_CACHE_ENABLED", &mut self.server.cache_enabled);
        env_override("QUERYWIRE_CACHE_TTL_SECS", &mut self.server.cache_ttl_secs);

        if let Ok(path) = std::env::var("QUERYWIRE_DATABASE") {
            self.database.path = path;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(host) = &cli.host {
            self.client.host = host.clone();
            self.server.bind_host = host.clone();
        }

        if let Some(port) = cli.port {
            self.client.port = port;
            self.server.port = port;
        }

        if let Some(database) = &cli.database {
            self.database.path = database.clone();
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.client.host.trim().is_empty() {
            return Err(QuerywireError::Config("client.host cannot be empty".to_string()).into());
        }

        if self.server.bind_host.trim().is_empty() {
            return Err(
                QuerywireError::Config("server.bind_host cannot be empty".to_string()).into(),
            );
        }

        if self.client.port == 0 || self.server.port == 0 {
            return Err(QuerywireError::Config("port must be greater than 0".to_string()).into());
        }

        if self.client.request_timeout_secs == 0 {
            return Err(QuerywireError::Config(
                "client.request_timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.server.max_concurrent_queries == 0 {
            return Err(QuerywireError::Config(
                "server.max_concurrent_queries must be greater than 0".to_string(),
            )
            .into());
        }

        if self.server.cache_enabled && self.server.cache_ttl_secs == 0 {
            return Err(QuerywireError::Config(
                "server.cache_ttl_secs must be greater than 0 when the cache is enabled"
                    .to_string(),
            )
            .into());
        }

        if self.database.path.trim().is_empty() {
            return Err(
                QuerywireError::Config("database.path cannot be empty".to_string()).into(),
            );
        }

        Ok(())
    }
}
