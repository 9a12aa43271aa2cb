//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use crate::overrides::MAX_COOLDOWN_MINUTES;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
        }
    }
}

/// Event mirror database configuration (optional)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 10,
            require_tls: false,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Timing knobs for the governance engines
#[derive(Debug, Clone, Deserialize)]
pub struct GovernanceConfig {
    /// Cadence of the SLA monitor scan
    pub sla_scan_interval_secs: u64,
    /// Lifetime of a reversal lock before another caller may take it over
    pub reversal_lock_ttl_secs: i64,
    /// Cooldown applied to reversals when the caller does not supply one
    pub default_cooldown_minutes: i64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            sla_scan_interval_secs: 60,
            reversal_lock_ttl_secs: 300,
            default_cooldown_minutes: 30,
        }
    }
}

/// Longest reversal lock a deployment may configure (one day)
const MAX_REVERSAL_LOCK_TTL_SECS: i64 = 86_400;

impl GovernanceConfig {
    /// Reject values the engines would refuse or overflow on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=MAX_COOLDOWN_MINUTES).contains(&self.default_cooldown_minutes) {
            return Err(ConfigError::InvalidValue(format!(
                "DEFAULT_COOLDOWN_MINUTES must be between 0 and {}",
                MAX_COOLDOWN_MINUTES
            )));
        }
        if !(1..=MAX_REVERSAL_LOCK_TTL_SECS).contains(&self.reversal_lock_ttl_secs) {
            return Err(ConfigError::InvalidValue(format!(
                "REVERSAL_LOCK_TTL_SECS must be between 1 and {}",
                MAX_REVERSAL_LOCK_TTL_SECS
            )));
        }
        Ok(())
    }

    pub fn sla_scan_interval(&self) -> Duration {
        Duration::from_secs(self.sla_scan_interval_secs.max(1))
    }

    pub fn reversal_lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reversal_lock_ttl_secs)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    /// `None` keeps the event log in memory only
    pub database: Option<DatabaseConfig>,
    pub cors: CorsConfig,
    pub governance: GovernanceConfig,
    pub jwt_secret: Option<String>,
    pub log_format: LogFormat,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: env_parse("HOST").unwrap_or_else(|| ServerConfig::default().host),
            port: env_parse("PORT").unwrap_or_else(|| ServerConfig::default().port),
        };

        let database = match std::env::var("DATABASE_URL") {
            Ok(database_url) if !database_url.trim().is_empty() => {
                Some(Self::parse_database_url(&database_url)?)
            }
            _ => None,
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let defaults = GovernanceConfig::default();
        let governance = GovernanceConfig {
            sla_scan_interval_secs: env_parse("SLA_SCAN_INTERVAL_SECS")
                .unwrap_or(defaults.sla_scan_interval_secs),
            reversal_lock_ttl_secs: env_parse("REVERSAL_LOCK_TTL_SECS")
                .unwrap_or(defaults.reversal_lock_ttl_secs),
            default_cooldown_minutes: env_parse("DEFAULT_COOLDOWN_MINUTES")
                .unwrap_or(defaults.default_cooldown_minutes),
        };
        governance.validate()?;

        let log_format = match std::env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        Ok(Self {
            server,
            database,
            cors,
            governance,
            jwt_secret: std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),
            log_format,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(ConfigError::InvalidValue(format!(
                "Unsupported DATABASE_URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        let require_tls = host.contains("neon.tech")
            || parsed
                .query_pairs()
                .any(|(k, v)| k == "sslmode" && v == "require");

        Ok(DatabaseConfig {
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            host,
            database,
            max_pool_size: env_parse("DB_MAX_CONNECTIONS").unwrap_or(10),
            require_tls,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_default_governance_config() {
        let config = GovernanceConfig::default();
        assert_eq!(config.sla_scan_interval(), Duration::from_secs(60));
        assert_eq!(config.reversal_lock_ttl(), chrono::Duration::minutes(5));
        assert_eq!(config.default_cooldown_minutes, 30);
    }

    #[test]
    fn test_governance_config_bounds() {
        assert!(GovernanceConfig::default().validate().is_ok());

        for minutes in [-1, MAX_COOLDOWN_MINUTES + 1, i64::MAX] {
            let config = GovernanceConfig {
                default_cooldown_minutes: minutes,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
        }

        for secs in [0, -30, MAX_REVERSAL_LOCK_TTL_SECS + 1, i64::MAX] {
            let config = GovernanceConfig {
                reversal_lock_ttl_secs: secs,
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }

        let edge = GovernanceConfig {
            sla_scan_interval_secs: 1,
            reversal_lock_ttl_secs: MAX_REVERSAL_LOCK_TTL_SECS,
            default_cooldown_minutes: MAX_COOLDOWN_MINUTES,
        };
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_parse_database_url() {
        let config =
            Settings::parse_database_url("postgresql://lab:pw@db.internal:5433/governance").unwrap();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 5433);
        assert_eq!(config.user, "lab");
        assert_eq!(config.database, "governance");
        assert!(!config.require_tls);
    }

    #[test]
    fn test_parse_database_url_sslmode() {
        let config =
            Settings::parse_database_url("postgres://u:p@host/db?sslmode=require").unwrap();
        assert!(config.require_tls);
        assert_eq!(config.port, 5432);
    }

    #[test]
    fn test_parse_database_url_rejects_missing_database() {
        assert!(Settings::parse_database_url("postgres://u:p@host/").is_err());
        assert!(Settings::parse_database_url("mysql://u:p@host/db").is_err());
    }
}
