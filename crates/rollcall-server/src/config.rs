use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Phone-lookup and guest-duplicate caches
    #[serde(default)]
    pub cache: CacheConfig,
    /// Principal cache
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Background job registry
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Health/stats endpoint tuning
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Configuration failed to load or is out of range.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.server.port == 0 {
            return invalid("server.port must be > 0");
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        let fmt = self.logging.format.to_ascii_lowercase();
        if fmt != "text" && fmt != "json" {
            return invalid("logging.format must be \"text\" or \"json\"");
        }
        // Cache validations
        if self.cache.phone_capacity == 0 || self.cache.guest_capacity == 0 {
            return invalid("cache capacities must be > 0");
        }
        if self.cache.phone_ttl_ms == 0 || self.cache.guest_ttl_ms == 0 {
            return invalid("cache TTLs must be > 0");
        }
        if self.cache.cleanup_interval_ms == 0 {
            return invalid("cache.cleanup_interval_ms must be > 0");
        }
        if self.session.ttl_ms == 0 {
            return invalid("session.ttl_ms must be > 0");
        }
        // Rate limit validations
        if self.rate_limit.limit == 0 {
            return invalid("rate_limit.limit must be > 0");
        }
        if self.rate_limit.window_ms == 0 || self.rate_limit.sweep_interval_ms == 0 {
            return invalid("rate_limit.window_ms and sweep_interval_ms must be > 0");
        }
        // Processing validations
        let p = &self.processing;
        if p.expiry_ceiling_ms == 0
            || p.processing_timeout_ms == 0
            || p.terminal_grace_ms == 0
            || p.cleanup_interval_ms == 0
        {
            return invalid("processing durations must be > 0");
        }
        // Stats validations
        if self.stats.phone_cache_weight <= 0.0 || self.stats.guest_cache_weight <= 0.0 {
            return invalid("stats weights must be > 0");
        }
        if !(0.0..=1.0).contains(&self.stats.degraded_headroom) {
            return invalid("stats.degraded_headroom must be within [0, 1]");
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// Returns the base URL for the server.
    /// If `base_url` is configured, returns that; otherwise computes from host:port.
    pub fn base_url(&self) -> String {
        self.server
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL used in status links.
    /// If not set, defaults to http://{host}:{port}
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: None,
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_phone_capacity")]
    pub phone_capacity: usize,
    #[serde(default = "default_phone_ttl_ms")]
    pub phone_ttl_ms: u64,
    #[serde(default = "default_guest_capacity")]
    pub guest_capacity: usize,
    #[serde(default = "default_guest_ttl_ms")]
    pub guest_ttl_ms: u64,
    /// How often expired entries are swept
    #[serde(default = "default_sweep_interval_ms")]
    pub cleanup_interval_ms: u64,
}

fn default_phone_capacity() -> usize {
    1000
}
fn default_phone_ttl_ms() -> u64 {
    5 * 60 * 1000
}
fn default_guest_capacity() -> usize {
    5000
}
fn default_guest_ttl_ms() -> u64 {
    2 * 60 * 1000
}
fn default_sweep_interval_ms() -> u64 {
    60 * 1000
}

impl CacheConfig {
    pub fn phone_ttl(&self) -> Duration {
        Duration::from_millis(self.phone_ttl_ms)
    }
    pub fn guest_ttl(&self) -> Duration {
        Duration::from_millis(self.guest_ttl_ms)
    }
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            phone_capacity: default_phone_capacity(),
            phone_ttl_ms: default_phone_ttl_ms(),
            guest_capacity: default_guest_capacity(),
            guest_ttl_ms: default_guest_ttl_ms(),
            cleanup_interval_ms: default_sweep_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_session_ttl_ms() -> u64 {
    5 * 60 * 1000
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_session_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// Requests admitted per identifier per window
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Use the first `x-forwarded-for` hop as the identifier.
    /// Only enable behind a proxy that sets the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

fn default_rate_limit_enabled() -> bool {
    true
}
fn default_rate_limit() -> u32 {
    100
}
fn default_rate_window_ms() -> u64 {
    60 * 1000
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            limit: default_rate_limit(),
            window_ms: default_rate_window_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Poll reports an entry older than this as gone
    #[serde(default = "default_expiry_ceiling_ms")]
    pub expiry_ceiling_ms: u64,
    /// Processing entries older than this are swept as abandoned
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,
    /// Finished entries are kept this long for pollers
    #[serde(default = "default_terminal_grace_ms")]
    pub terminal_grace_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub cleanup_interval_ms: u64,
}

fn default_expiry_ceiling_ms() -> u64 {
    5 * 60 * 1000
}
fn default_processing_timeout_ms() -> u64 {
    10 * 60 * 1000
}
fn default_terminal_grace_ms() -> u64 {
    5 * 60 * 1000
}

impl ProcessingConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            expiry_ceiling_ms: default_expiry_ceiling_ms(),
            processing_timeout_ms: default_processing_timeout_ms(),
            terminal_grace_ms: default_terminal_grace_ms(),
            cleanup_interval_ms: default_sweep_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_weight")]
    pub phone_cache_weight: f64,
    #[serde(default = "default_weight")]
    pub guest_cache_weight: f64,
    /// Report "degraded" when any cache has less free capacity than this fraction
    #[serde(default = "default_degraded_headroom")]
    pub degraded_headroom: f64,
}

fn default_weight() -> f64 {
    1.0
}
fn default_degraded_headroom() -> f64 {
    0.1
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            phone_cache_weight: default_weight(),
            guest_cache_weight: default_weight(),
            degraded_headroom: default_degraded_headroom(),
        }
    }
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "rollcall.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., ROLLCALL__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("ROLLCALL")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let merged: AppConfig = builder.build()?.try_deserialize()?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.cache.phone_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.processing.expiry_ceiling_ms, 300_000);
        assert_eq!(cfg.processing.processing_timeout_ms, 600_000);
        assert_eq!(cfg.base_url(), "http://0.0.0.0:8080");
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut cfg = AppConfig::default();
        cfg.cache.guest_capacity = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("capacities"));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let mut cfg = AppConfig::default();
        cfg.logging.level = "chatty".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_stats_weights() {
        let mut cfg = AppConfig::default();
        cfg.stats.phone_cache_weight = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.stats.degraded_headroom = 1.5;
        assert!(cfg.validate().is_err());
    }
}
