//! Configuration management

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub capture: CaptureConfig,
    pub auth: AuthConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Shared secret for the capture API signature. The default exists so a
    /// fresh checkout starts; override it in any real deployment.
    #[serde(default = "default_capture_secret")]
    pub secret: String,
    /// Maximum clock skew (seconds) between caller and server
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: i64,
    #[serde(default = "default_capture_rate_limit")]
    pub rate_limit_per_minute: u32,
    /// Whole-ingest processing deadline
    #[serde(default = "default_capture_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_capture_secret() -> String {
    "api-secret-change-me".to_string()
}

fn default_replay_window_secs() -> i64 {
    300
}

fn default_capture_rate_limit() -> u32 {
    100
}

fn default_capture_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: i64,
    #[serde(default = "default_login_rate_limit")]
    pub login_rate_limit_per_minute: u32,
    #[serde(default = "default_register_rate_limit")]
    pub register_rate_limit_per_minute: u32,
}

fn default_session_ttl_minutes() -> i64 {
    7 * 24 * 60
}

fn default_login_rate_limit() -> u32 {
    5
}

fn default_register_rate_limit() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub days: i64,
    #[serde(default = "default_sweep_interval_hours")]
    pub sweep_interval_hours: u64,
}

fn default_retention_days() -> i64 {
    30
}

fn default_sweep_interval_hours() -> u64 {
    24
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "config.toml";

        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path))
            .add_source(config::Environment::with_prefix("HIVEWATCH").separator("__"));

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Invalid server port: 0 is not allowed");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.capture.secret.is_empty() {
            anyhow::bail!("Capture secret cannot be empty");
        }
        if self.capture.replay_window_secs <= 0 {
            anyhow::bail!("Capture replay window must be positive");
        }
        if self.capture.rate_limit_per_minute == 0
            || self.auth.login_rate_limit_per_minute == 0
            || self.auth.register_rate_limit_per_minute == 0
        {
            anyhow::bail!("Rate limits must be positive");
        }

        if self.auth.session_ttl_minutes <= 0 {
            anyhow::bail!("Session TTL must be positive");
        }
        if self.retention.days <= 0 {
            anyhow::bail!("Retention window must be positive");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid logging level '{}'. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        database: DatabaseConfig {
            url: ":memory:".to_string(),
        },
        capture: CaptureConfig {
            secret: "s3cret".to_string(),
            replay_window_secs: 300,
            rate_limit_per_minute: 100,
            timeout_secs: 10,
        },
        auth: AuthConfig {
            session_ttl_minutes: 60,
            login_rate_limit_per_minute: 5,
            register_rate_limit_per_minute: 3,
        },
        retention: RetentionConfig {
            days: 30,
            sweep_interval_hours: 24,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
        },
    }
}
