//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::SagaSettings;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` bind address (default: `"0.0.0.0"`)
/// - `PORT` listen port (default: `3000`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` set to `json` for JSON log lines
/// - `DATABASE_URL` Postgres journal; the in-memory store is used when unset
/// - `ALPHA_SHARDS` router shards (default: `10`)
/// - `ALPHA_SNAPSHOT_INTERVAL` journal versions between snapshots (default: `100`)
/// - `ALPHA_IDLE_PASSIVATE_SECS` idle worker lifetime (default: `60`)
/// - `ALPHA_PAYLOAD_MAX_LENGTH` failure payload cap in bytes (default: `10240`)
/// - `ALPHA_COMMAND_POLL_MILLIS` long-poll wait for compensation commands (default: `1000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub shards: usize,
    pub snapshot_interval: i64,
    pub idle_passivate_secs: u64,
    pub payload_max_length: usize,
    pub command_poll_millis: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            shards: env_or("ALPHA_SHARDS", defaults.shards),
            snapshot_interval: env_or("ALPHA_SNAPSHOT_INTERVAL", defaults.snapshot_interval),
            idle_passivate_secs: env_or("ALPHA_IDLE_PASSIVATE_SECS", defaults.idle_passivate_secs),
            payload_max_length: env_or("ALPHA_PAYLOAD_MAX_LENGTH", defaults.payload_max_length),
            command_poll_millis: env_or("ALPHA_COMMAND_POLL_MILLIS", defaults.command_poll_millis),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings handed to the saga router.
    pub fn saga_settings(&self) -> SagaSettings {
        SagaSettings {
            shards: self.shards,
            snapshot_interval: self.snapshot_interval,
            idle_passivate: Duration::from_secs(self.idle_passivate_secs),
            payload_max_length: self.payload_max_length,
        }
    }

    pub fn command_poll_wait(&self) -> Duration {
        Duration::from_millis(self.command_poll_millis)
    }
}

impl Default for Config {
    fn default() -> Self {
        let saga = SagaSettings::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            shards: saga.shards,
            snapshot_interval: saga.snapshot_interval,
            idle_passivate_secs: saga.idle_passivate.as_secs(),
            payload_max_length: saga.payload_max_length,
            command_poll_millis: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
        assert!(config.database_url.is_none());
        assert_eq!(config.shards, 10);
        assert_eq!(config.snapshot_interval, 100);
        assert_eq!(config.idle_passivate_secs, 60);
        assert_eq!(config.payload_max_length, 10240);
        assert_eq!(config.command_poll_millis, 1000);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_saga_settings_follow_config() {
        let config = Config {
            shards: 4,
            snapshot_interval: 0,
            idle_passivate_secs: 5,
            payload_max_length: 64,
            ..Config::default()
        };
        let settings = config.saga_settings();
        assert_eq!(settings.shards, 4);
        assert_eq!(settings.snapshot_interval, 0);
        assert_eq!(settings.idle_passivate, Duration::from_secs(5));
        assert_eq!(settings.payload_max_length, 64);
    }

    #[test]
    fn test_command_poll_wait() {
        let config = Config {
            command_poll_millis: 250,
            ..Config::default()
        };
        assert_eq!(config.command_poll_wait(), Duration::from_millis(250));
    }
}
