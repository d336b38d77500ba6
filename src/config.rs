// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid environment configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("failed to read backends file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid backends file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Gateway configuration loaded from environment variables.
///
/// All configuration is externalized to support 12-factor app deployment.
/// Backend definitions live in a separate YAML file, see [`BackendsFile`].
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 3000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Comma separated CORS origins, `*` allows any (default: *)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// HMAC secret used to sign session tokens
    #[serde(default)]
    pub jwt_secret: String,

    /// Idle time after which a session expires (default: 3600)
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Upper bound on live sessions (default: 1000)
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,

    /// How often the reaper sweeps idle sessions (default: 60)
    #[serde(default = "default_session_sweep_interval")]
    pub session_sweep_interval_secs: u64,

    /// Lifetime of issued session tokens (default: 86400)
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Timeout for a single backend call in milliseconds (default: 30000)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Timeout for backend health probes in seconds (default: 2)
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout_secs: u64,

    /// Path to the backends YAML file (default: backends.yaml)
    #[serde(default = "default_backends_file")]
    pub backends_file: String,

    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty" (default: json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_session_timeout() -> u64 {
    3600
}

fn default_max_concurrent_sessions() -> usize {
    1000
}

fn default_session_sweep_interval() -> u64 {
    60
}

fn default_token_ttl() -> u64 {
    86400
}

/// Longest accepted token lifetime (ten years).
const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

fn default_request_timeout() -> u64 {
    30_000
}

fn default_health_check_timeout() -> u64 {
    2
}

fn default_backends_file() -> String {
    "backends.yaml".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_health_check_interval() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are uppercase with underscore separators.
    /// Example: `JWT_SECRET`, `MAX_CONCURRENT_SESSIONS`, etc.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(envy::from_env()?)
    }

    /// Load configuration from an explicit list of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::from_iter(vars)?)
    }

    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("JWT_SECRET must be set".to_string()));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(ConfigError::Invalid(
                "MAX_CONCURRENT_SESSIONS must be greater than zero".to_string(),
            ));
        }
        if self.session_sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "SESSION_SWEEP_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.token_ttl_secs == 0 || self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "TOKEN_TTL_SECS must be between 1 and {}",
                MAX_TOKEN_TTL_SECS
            )));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }
}

/// Static definition of one capability provider.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BackendConfig {
    /// Unique backend identifier, used as the routing target
    pub id: String,

    /// Base URL; requests are posted to `<url>/mcp`
    pub url: String,

    /// Method names or glob patterns (`*`, `?`) this backend serves
    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub description: String,

    /// Seconds between health probes (default: 30)
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// Additional base URLs serving the same backend
    #[serde(default)]
    pub replicas: Vec<String>,
}

impl BackendConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    /// Primary URL followed by replicas.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.replicas.iter().map(String::as_str))
    }
}

/// Top-level shape of the backends YAML file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendsFile {
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl BackendsFile {
    /// Parse and validate a backends document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let file: BackendsFile = serde_yaml::from_str(yaml)?;
        file.validate()?;
        Ok(file)
    }

    /// Read and parse the backends file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.trim().is_empty() {
                return Err(ConfigError::Invalid("backend id must not be empty".to_string()));
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate backend id: {}",
                    backend.id
                )));
            }
            if backend.urls().any(|url| url.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "backend {} has an empty url",
                    backend.id
                )));
            }
        }
        Ok(())
    }
}
