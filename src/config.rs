//! Configuration management for Windowgate.
//!
//! Values are layered, lowest precedence first: built-in defaults, an
//! optional YAML file, `WINDOWGATE__SECTION__FIELD` environment variables,
//! and the legacy `APP_PORT` / `DUMP_FILE` variables. Command-line flags are
//! applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Result, WindowgateError};
use crate::persistence::PersistenceFormat;
use crate::ratelimit::LimiterSettings;

/// Environment variable holding the listen port (`8000` or `:8000`).
pub const APP_PORT_ENV: &str = "APP_PORT";
/// Environment variable holding the dump file location.
pub const DUMP_FILE_ENV: &str = "DUMP_FILE";

const ENV_PREFIX: &str = "WINDOWGATE";

/// Main configuration for the Windowgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Persistence configuration
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Request header carrying the client identity
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// How long in-flight requests may drain after a shutdown signal
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            identity_header: default_identity_header(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_identity_header() -> String {
    "X-Forwarded-For".to_string()
}

fn default_shutdown_grace() -> u64 {
    5
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Hits admitted per identity within the identity window
    #[serde(default = "default_allowed_rate")]
    pub allowed_rate: i64,

    /// Global tally window in seconds
    #[serde(default = "default_global_window")]
    pub global_window_secs: i64,

    /// Per-identity window in seconds
    #[serde(default = "default_ip_window")]
    pub ip_window_secs: i64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            allowed_rate: default_allowed_rate(),
            global_window_secs: default_global_window(),
            ip_window_secs: default_ip_window(),
        }
    }
}

fn default_allowed_rate() -> i64 {
    15
}

fn default_global_window() -> i64 {
    60
}

fn default_ip_window() -> i64 {
    20
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Dump file location
    #[serde(default = "default_dump_path")]
    pub path: PathBuf,

    /// Dump file format; inferred from `path` when unset
    #[serde(default)]
    pub format: Option<PersistenceFormat>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_dump_path(),
            format: None,
        }
    }
}

fn default_dump_path() -> PathBuf {
    PathBuf::from("./dump.json")
}

impl PersistenceConfig {
    /// The configured format, or the one implied by the file extension.
    pub fn resolved_format(&self) -> PersistenceFormat {
        self.format
            .unwrap_or_else(|| PersistenceFormat::from_path(&self.path))
    }
}

impl WindowgateConfig {
    /// Load configuration from an optional YAML file and the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let mut config: WindowgateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| WindowgateError::Config(e.to_string()))?;

        config.apply_legacy_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| WindowgateError::Config(e.to_string()))
    }

    /// Apply `APP_PORT` and `DUMP_FILE` as read through `lookup`.
    pub fn apply_legacy_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(APP_PORT_ENV).filter(|p| !p.trim().is_empty()) {
            let port = port
                .trim()
                .trim_start_matches(':')
                .parse::<u16>()
                .map_err(|e| {
                    WindowgateError::Config(format!("invalid {}: {:?}: {}", APP_PORT_ENV, port, e))
                })?;
            self.server.listen_addr.set_port(port);
        }

        if let Some(path) = lookup(DUMP_FILE_ENV).filter(|p| !p.trim().is_empty()) {
            self.persistence.path = PathBuf::from(path);
        }

        Ok(())
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.global_window_secs <= 0 {
            return Err(WindowgateError::Config(
                "rate_limiting.global_window_secs must be positive".to_string(),
            ));
        }
        if rl.ip_window_secs <= 0 {
            return Err(WindowgateError::Config(
                "rate_limiting.ip_window_secs must be positive".to_string(),
            ));
        }
        if self.server.identity_header.trim().is_empty() {
            return Err(WindowgateError::Config(
                "server.identity_header must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Limits for the rate limiter.
    pub fn limiter_settings(&self) -> LimiterSettings {
        LimiterSettings {
            allowed_rate: self.rate_limiting.allowed_rate,
            global_window_secs: self.rate_limiting.global_window_secs,
            ip_window_secs: self.rate_limiting.ip_window_secs,
        }
    }
}
