//! Configuration management for the booking coordinator
//!
//! Configuration comes from environment variables (the deployment default)
//! or a TOML file, and is validated before the server starts.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::coordinator::protocol::AgentSettings;
use crate::scheduler::parse::parse_timezone;
use crate::scheduler::splitter::DEFAULT_MAX_PER_UNIT;
use crate::storage::{PRIMARY_FILE, SHADOW_FILE};

/// Timezone used when none (or an unknown one) is configured
pub const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,

    /// Booking store location
    pub storage: StorageConfig,

    /// Trigger scheduling
    pub scheduler: SchedulerConfig,

    /// Settings pushed to agents on handshake
    pub agent: AgentConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Outbound queue capacity per WebSocket session
    pub session_buffer: usize,

    /// Enable permissive CORS
    pub enable_cors: bool,

    /// Enable HTTP request tracing
    pub enable_request_logging: bool,
}

/// Booking store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the primary and shadow files
    pub data_dir: PathBuf,
}

/// Trigger scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// IANA zone used to interpret user-entered times
    pub timezone: String,

    /// Ticket cap per browser tab
    pub max_quantity_per_unit: u32,

    /// `TIMEZONE` value that failed to parse and was replaced by the default
    #[serde(skip)]
    pub rejected_timezone: Option<String>,
}

/// Settings pushed to agents on handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Minutes to keep monitoring a slot page
    pub slot_monitoring_minutes: u64,

    /// Polling interval in milliseconds
    pub monitoring_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 5000,
            session_buffer: 256,
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: String::from(DEFAULT_TIMEZONE),
            max_quantity_per_unit: DEFAULT_MAX_PER_UNIT,
            rejected_timezone: None,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            slot_monitoring_minutes: 30,
            monitoring_interval_ms: 50,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let host = std::env::var("HOST").unwrap_or(defaults.server.host);
        let port = env_parse::<u16>("PORT").unwrap_or(defaults.server.port);
        let session_buffer =
            env_parse::<usize>("SESSION_BUFFER").unwrap_or(defaults.server.session_buffer);

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage.data_dir);

        let (timezone, rejected_timezone) = match std::env::var("TIMEZONE") {
            Ok(tz) if parse_timezone(&tz).is_ok() => (tz.trim().to_string(), None),
            Ok(tz) => (String::from(DEFAULT_TIMEZONE), Some(tz)),
            Err(_) => (defaults.scheduler.timezone, None),
        };
        let max_quantity_per_unit = env_parse::<u32>("MAX_QUANTITY_PER_TAB")
            .unwrap_or(defaults.scheduler.max_quantity_per_unit);

        let slot_monitoring_minutes = env_parse::<u64>("SLOT_MONITORING_TIME")
            .unwrap_or(defaults.agent.slot_monitoring_minutes);
        let monitoring_interval_ms = env_parse::<u64>("MONITORING_INTERVAL")
            .unwrap_or(defaults.agent.monitoring_interval_ms);

        let level = std::env::var("LOG_LEVEL")
            .map(|v| v.to_lowercase())
            .unwrap_or(defaults.logging.level);
        let format = std::env::var("LOG_FORMAT").unwrap_or(defaults.logging.format);

        Ok(Self {
            server: ServerConfig {
                host,
                port,
                session_buffer,
                ..defaults.server
            },
            storage: StorageConfig { data_dir },
            scheduler: SchedulerConfig {
                timezone,
                max_quantity_per_unit,
                rejected_timezone,
            },
            agent: AgentConfig {
                slot_monitoring_minutes,
                monitoring_interval_ms,
            },
            logging: LoggingConfig { level, format },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_quantity_per_unit == 0 {
            anyhow::bail!("max_quantity_per_unit must be greater than 0");
        }

        if self.server.session_buffer == 0 {
            anyhow::bail!("session_buffer must be greater than 0");
        }

        if self.agent.monitoring_interval_ms == 0 {
            anyhow::bail!("monitoring_interval_ms must be greater than 0");
        }

        parse_timezone(&self.scheduler.timezone)?;
        self.bind_address()?;

        Ok(())
    }

    /// Report values replaced by defaults while loading.
    ///
    /// Loading runs before tracing is installed, so this is called afterwards.
    pub fn log_fallbacks(&self) {
        if let Some(tz) = &self.scheduler.rejected_timezone {
            tracing::warn!(
                timezone = %tz,
                fallback = %self.scheduler.timezone,
                "Unknown timezone, using default"
            );
        }
    }

    /// Socket address to listen on
    pub fn bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid bind address: {}:{}",
                    self.server.host, self.server.port
                )
            })
    }

    /// Configured timezone, or the default if it does not parse
    #[must_use]
    pub fn timezone(&self) -> Tz {
        parse_timezone(&self.scheduler.timezone)
            .or_else(|_| parse_timezone(DEFAULT_TIMEZONE))
            .unwrap_or(Tz::UTC)
    }

    #[must_use]
    pub fn primary_path(&self) -> PathBuf {
        self.storage.data_dir.join(PRIMARY_FILE)
    }

    #[must_use]
    pub fn shadow_path(&self) -> PathBuf {
        self.storage.data_dir.join(SHADOW_FILE)
    }

    /// Snapshot pushed to agents after their handshake
    #[must_use]
    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            monitoring_time: self.agent.slot_monitoring_minutes,
            monitoring_interval: self.agent.monitoring_interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.timezone(), chrono_tz::Asia::Kolkata);
    }

    #[test]
    fn test_invalid_values() {
        let mut config = Config::default();
        config.scheduler.max_quantity_per_unit = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scheduler.timezone = "Nowhere/Special".into();
        assert!(config.validate().is_err());
        assert_eq!(config.timezone(), chrono_tz::Asia::Kolkata);

        let mut config = Config::default();
        config.server.host = "not a host".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8088

            [scheduler]
            timezone = "UTC"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.scheduler.max_quantity_per_unit, 50);
        assert_eq!(config.timezone(), Tz::UTC);
        assert!(config.scheduler.rejected_timezone.is_none());
    }

    #[test]
    #[serial]
    fn test_known_timezone_from_env_is_kept() {
        std::env::set_var("TIMEZONE", "Europe/Berlin");
        let config = Config::from_env().unwrap();
        std::env::remove_var("TIMEZONE");

        assert_eq!(config.scheduler.timezone, "Europe/Berlin");
        assert!(config.scheduler.rejected_timezone.is_none());
        config.log_fallbacks();
    }

    #[test]
    fn test_store_paths() {
        let mut config = Config::default();
        config.storage.data_dir = PathBuf::from("/var/lib/tabtrigger");
        assert_eq!(
            config.primary_path(),
            PathBuf::from("/var/lib/tabtrigger/scheduled_bookings.json")
        );
        assert_eq!(
            config.shadow_path(),
            PathBuf::from("/var/lib/tabtrigger/scheduled_bookings.backup.json")
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("PORT", "6123");
        std::env::set_var("MAX_QUANTITY_PER_TAB", "20");
        std::env::set_var("TIMEZONE", "Not/AZone");
        std::env::set_var("SLOT_MONITORING_TIME", "10");

        let config = Config::from_env().unwrap();

        std::env::remove_var("PORT");
        std::env::remove_var("MAX_QUANTITY_PER_TAB");
        std::env::remove_var("TIMEZONE");
        std::env::remove_var("SLOT_MONITORING_TIME");

        assert_eq!(config.server.port, 6123);
        assert_eq!(config.scheduler.max_quantity_per_unit, 20);
        assert_eq!(config.scheduler.timezone, DEFAULT_TIMEZONE);
        assert_eq!(config.scheduler.rejected_timezone.as_deref(), Some("Not/AZone"));
        assert_eq!(config.agent_settings().monitoring_time, 10);
        assert!(config.validate().is_ok());
    }
}
