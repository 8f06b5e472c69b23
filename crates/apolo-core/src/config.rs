//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2080
}

fn default_workers() -> usize {
    num_cpus::get()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
        }
    }
}

/// Engine-wide defaults used by rating and account mutation
#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// Tenant applied when a request omits it
    #[serde(default = "default_tenant")]
    pub default_tenant: String,

    /// Category applied when a call descriptor omits it
    #[serde(default = "default_category")]
    pub default_category: String,

    /// Guardian lock acquisition budget in milliseconds (0 = unbounded)
    #[serde(default)]
    pub locking_timeout_ms: u64,

    /// Decimals kept on the final call cost
    #[serde(default = "default_rounding_decimals")]
    pub rounding_decimals: u32,

    /// Maximum depth followed through rating profile fallbacks
    #[serde(default = "default_max_fallback_depth")]
    pub max_fallback_depth: usize,

    /// Try the `*any` subject when the subject chain yields no rating
    #[serde(default = "default_true")]
    pub any_subject_fallback: bool,
}

fn default_tenant() -> String {
    "cgrates.org".to_string()
}

fn default_category() -> String {
    "call".to_string()
}

fn default_rounding_decimals() -> u32 {
    5
}

fn default_max_fallback_depth() -> usize {
    3
}

fn default_true() -> bool {
    true
}

impl GeneralConfig {
    /// Guardian timeout, `None` meaning wait forever
    pub fn locking_timeout(&self) -> Option<Duration> {
        match self.locking_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_tenant: default_tenant(),
            default_category: default_category(),
            locking_timeout_ms: 0,
            rounding_decimals: default_rounding_decimals(),
            max_fallback_depth: default_max_fallback_depth(),
            any_subject_fallback: true,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redis,
}

/// Account and rating store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Redis connection URL, used when `backend = "redis"` or the cache is enabled
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            redis_url: default_redis_url(),
        }
    }
}

/// Cache collaborator configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Pub/sub channel receiving reload-by-key notifications
    #[serde(default = "default_reload_channel")]
    pub reload_channel: String,
}

fn default_reload_channel() -> String {
    "apolo:cache:reload".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reload_channel: default_reload_channel(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Longest idle sleep between queue checks, in seconds
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// How far ahead a calendar timing is searched for its next fire
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: u32,
}

fn default_tick_secs() -> u64 {
    60
}

fn default_lookahead_days() -> u32 {
    1830
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_tick_secs(),
            lookahead_days: default_lookahead_days(),
        }
    }
}

/// Outbound action configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ActionsConfig {
    /// Per-request timeout for `*http_post`, in milliseconds
    #[serde(default = "default_http_post_timeout")]
    pub http_post_timeout_ms: u64,

    /// Attempts made for a single `*http_post` notification
    #[serde(default = "default_http_post_attempts")]
    pub http_post_attempts: u32,
}

fn default_http_post_timeout() -> u64 {
    5000
}

fn default_http_post_attempts() -> u32 {
    3
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            http_post_timeout_ms: default_http_post_timeout(),
            http_post_attempts: default_http_post_attempts(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("general.default_tenant", default_tenant())?
            .set_default("general.default_category", default_category())?
            .set_default("general.locking_timeout_ms", 0)?
            .set_default("general.rounding_decimals", default_rounding_decimals() as i64)?
            .set_default("general.max_fallback_depth", default_max_fallback_depth() as i64)?
            .set_default("general.any_subject_fallback", true)?
            .set_default("storage.backend", "memory")?
            .set_default("storage.redis_url", default_redis_url())?
            .set_default("cache.enabled", false)?
            .set_default("scheduler.enabled", true)?
            .set_default("scheduler.tick_secs", default_tick_secs() as i64)?
            .set_default("actions.http_post_timeout_ms", default_http_post_timeout() as i64)?
            .set_default("actions.http_post_attempts", default_http_post_attempts() as i64)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with APOLO_ prefix
            .add_source(
                Environment::with_prefix("APOLO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("APOLO").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
