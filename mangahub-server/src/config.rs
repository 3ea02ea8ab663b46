//! Configuration for the MangaHub sync core.
//!
//! Everything is resolved from environment variables; config-file I/O is
//! handled by the process supervisor, not by this server.
//!
//! Recognized variables: `TCP_PORT`, `UDP_PORT`, `HTTP_PORT`, `DB_PATH`,
//! `JWT_SECRET`, `LOG_LEVEL`, `LOG_FORMAT`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// The development fallback used when `JWT_SECRET` is unset. Startup logs
/// a warning when this value is in effect.
pub const DEV_JWT_SECRET: &str = "your-secret-key-change-this-in-production";

/// Root configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Session server bind port (default: 9090).
    pub tcp_port: u16,
    /// Notification server bind port (default: 9091).
    pub udp_port: u16,
    /// Health/metrics HTTP bind port (default: 9092).
    pub http_port: u16,
    /// Path to the SQLite database file (default: `./data/mangahub.db`).
    pub db_path: PathBuf,
    /// HS256 secret used to validate bearer tokens.
    pub jwt_secret: String,
    /// Minimum log level (default: INFO).
    pub log_level: LogLevel,
    /// Log output format (default: text).
    pub log_format: LogFormat,
    /// Session liveness sweeping.
    pub liveness: LivenessConfig,
    /// Datagram endpoint TTL sweeping.
    pub datagram: DatagramConfig,
}

/// Liveness monitor configuration.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// How often the sweeper runs (default: 30 s).
    pub sweep_interval: Duration,
    /// Heartbeat age after which a session is evicted (default: 90 s).
    pub heartbeat_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

/// Datagram subscriber registry configuration.
#[derive(Debug, Clone)]
pub struct DatagramConfig {
    /// How often the sweeper runs (default: 30 s).
    pub sweep_interval: Duration,
    /// `last_seen` age after which an endpoint is evicted (default: 2 min).
    pub endpoint_ttl: Duration,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            endpoint_ttl: Duration::from_secs(120),
        }
    }
}

/// Minimum log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Everything, including per-frame traces.
    Debug,
    /// Normal operation (default).
    Info,
    /// Degraded but functioning.
    Warn,
    /// Faults only.
    Error,
}

impl LogLevel {
    /// The `tracing` filter directive for this level.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(ConfigError::InvalidLogLevel(s.to_string())),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable compact lines (default).
    Text,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            _ => Err(ConfigError::InvalidLogFormat(s.to_string())),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A port variable did not parse as a u16.
    #[error("invalid value for {var}: {value}")]
    InvalidPort {
        /// The offending variable name.
        var: &'static str,
        /// The offending value.
        value: String,
    },
    /// `LOG_LEVEL` was not one of DEBUG, INFO, WARN, ERROR.
    #[error("invalid LOG_LEVEL: {0} (expected DEBUG, INFO, WARN or ERROR)")]
    InvalidLogLevel(String),
    /// `LOG_FORMAT` was not `json` or `text`.
    #[error("invalid LOG_FORMAT: {0} (expected json or text)")]
    InvalidLogFormat(String),
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_port(name: &'static str, default: u16) -> Result<u16, ConfigError> {
    match env_var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort { var: name, value }),
        None => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcp_port: 9090,
            udp_port: 9091,
            http_port: 9092,
            db_path: PathBuf::from("./data/mangahub.db"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
            liveness: LivenessConfig::default(),
            datagram: DatagramConfig::default(),
        }
    }
}

impl Config {
    /// Resolve configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Self {
            tcp_port: env_port("TCP_PORT", defaults.tcp_port)?,
            udp_port: env_port("UDP_PORT", defaults.udp_port)?,
            http_port: env_port("HTTP_PORT", defaults.http_port)?,
            db_path: env_var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            jwt_secret: env_var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            log_level: match env_var("LOG_LEVEL") {
                Some(v) => v.parse()?,
                None => defaults.log_level,
            },
            log_format: match env_var("LOG_FORMAT") {
                Some(v) => v.parse()?,
                None => defaults.log_format,
            },
            liveness: defaults.liveness,
            datagram: defaults.datagram,
        })
    }

    /// Whether the development fallback secret is in effect.
    pub fn using_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_ports() {
        let config = Config::default();
        assert_eq!(config.tcp_port, 9090);
        assert_eq!(config.udp_port, 9091);
        assert_eq!(config.db_path, PathBuf::from("./data/mangahub.db"));
        assert_eq!(config.liveness.heartbeat_timeout, Duration::from_secs(90));
        assert_eq!(config.liveness.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.datagram.endpoint_ttl, Duration::from_secs(120));
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn dev_secret_is_flagged() {
        let config = Config::default();
        assert!(config.using_dev_secret());

        let config = Config {
            jwt_secret: "deployed-secret".to_string(),
            ..Config::default()
        };
        assert!(!config.using_dev_secret());
    }
}
