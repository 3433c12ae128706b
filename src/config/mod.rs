/// Configuration management for pasarela
///
/// Read once at startup, either from a TOML file or from the `ARANGO_*`
/// environment, and validated before anything is constructed from it.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{AuthMode, Credentials, TokenCacheMode, TokenPolicy, TokenStore};
use crate::cluster::ClusterConfig;
use crate::safety::SafetyPolicy;
use crate::utils::parse_bool;

pub use crate::error::ConfigError;

/// Main pasarela configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logical database bound into handles by default
    pub database: String,
    /// Cluster endpoints and timeouts
    pub cluster: ClusterSettings,
    /// Authentication and token caching
    pub auth: AuthSettings,
    /// Destructive operation gates
    pub safety: SafetyPolicy,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Node base URLs in failover order
    pub endpoints: Vec<String>,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// How long a failed node is deprioritized, in milliseconds
    pub failure_cooldown_ms: u64,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub mode: AuthMode,
    pub cache: TokenCacheMode,
    pub username: String,
    pub password: String,
    /// Token lifetime when the issued JWT carries no `exp` claim
    pub token_ttl_sec: u64,
    /// Renew this long before expiry
    pub refresh_margin_sec: u64,
    /// Root directory of the disk token cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "_system".to_string(),
            cluster: ClusterSettings::default(),
            auth: AuthSettings::default(),
            safety: SafetyPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://localhost:8529".to_string()],
            request_timeout_ms: 10_000,
            failure_cooldown_ms: 30_000,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            mode: AuthMode::Jwt,
            cache: TokenCacheMode::Memory,
            username: "root".to_string(),
            password: String::new(),
            token_ttl_sec: 3600,
            refresh_margin_sec: 60,
            cache_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Defaults overlaid with the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `ARANGO_*` variables resolved through `lookup`
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(list) = lookup("ARANGO_CLUSTER").or_else(|| lookup("ARANGO_URLS")) {
            self.cluster.endpoints = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(mode) = lookup("ARANGO_AUTH") {
            self.auth.mode = mode.parse()?;
        }
        if let Some(cache) = lookup("ARANGO_AUTH_CACHE") {
            self.auth.cache = cache.parse()?;
        }
        if let Some(dir) = lookup("ARANGO_AUTH_CACHE_DIR") {
            self.auth.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(username) = lookup("ARANGO_USERNAME") {
            self.auth.username = username;
        }
        if let Some(password) = lookup("ARANGO_PASSWORD") {
            self.auth.password = password;
        }
        if let Some(ttl) = lookup("ARANGO_TTL_SECONDS") {
            self.auth.token_ttl_sec = ttl.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("Invalid ARANGO_TTL_SECONDS: {}", ttl))
            })?;
        }
        if let Some(flag) = lookup("ARANGO_DISABLE_DATABASE_DELETE") {
            self.safety.disable_database_delete = env_flag("ARANGO_DISABLE_DATABASE_DELETE", &flag)?;
        }
        if let Some(flag) = lookup("ARANGO_DISABLE_COLLECTION_DELETE") {
            self.safety.disable_collection_delete =
                env_flag("ARANGO_DISABLE_COLLECTION_DELETE", &flag)?;
        }
        if let Some(database) = lookup("ARANGO_DB") {
            self.database = database;
        }
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate cluster config
        if self.cluster_config()?.is_empty() {
            return Err(ConfigError::NoNodesConfigured);
        }

        if self.cluster.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        // Validate auth config
        if self.auth.mode != AuthMode::None && self.auth.username.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "auth.username is required when auth mode is {}",
                self.auth.mode
            )));
        }

        if self.auth.token_ttl_sec == 0 {
            return Err(ConfigError::ValidationError(
                "token_ttl_sec must be greater than 0".to_string(),
            ));
        }

        if self.auth.refresh_margin_sec >= self.auth.token_ttl_sec {
            return Err(ConfigError::ValidationError(
                "refresh_margin_sec must be less than token_ttl_sec".to_string(),
            ));
        }

        if self.database.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database cannot be empty".to_string(),
            ));
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    pub fn cluster_config(&self) -> Result<ClusterConfig, ConfigError> {
        ClusterConfig::new(&self.cluster.endpoints)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.auth.username.clone(),
            self.auth.password.clone(),
            self.auth.mode,
        )
    }

    pub fn token_policy(&self) -> TokenPolicy {
        TokenPolicy {
            default_ttl: Duration::from_secs(self.auth.token_ttl_sec),
            refresh_margin: Duration::from_secs(self.auth.refresh_margin_sec),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.request_timeout_ms)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.cluster.failure_cooldown_ms)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.auth
            .cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("pasarela-tokens"))
    }

    /// Build the configured TokenStore variant
    pub fn token_store(&self) -> TokenStore {
        match self.auth.cache {
            TokenCacheMode::Memory => TokenStore::memory(),
            TokenCacheMode::Disk => TokenStore::disk(self.cache_dir()),
        }
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, mode: &str) -> Result<(), ConfigError> {
        let config = match mode {
            "single" => Config::default(),
            "cluster" => Config {
                database: "app".to_string(),
                cluster: ClusterSettings {
                    endpoints: vec![
                        "http://10.0.1.10:8529".to_string(),
                        "http://10.0.1.11:8529".to_string(),
                        "http://10.0.1.12:8529".to_string(),
                    ],
                    ..Default::default()
                },
                auth: AuthSettings {
                    cache: TokenCacheMode::Disk,
                    cache_dir: Some(PathBuf::from("/var/cache/pasarela")),
                    ..Default::default()
                },
                ..Default::default()
            },
            _ => {
                return Err(ConfigError::ValidationError(
                    "Mode must be 'single' or 'cluster'".to_string(),
                ))
            }
        };

        config.save_to_file(path)
    }
}

fn env_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value)
        .ok_or_else(|| ConfigError::ValidationError(format!("Invalid boolean for {}: {}", name, value)))
}
