//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (the flat operator-facing keys below)
//! 2. Current working directory: ./config.toml
//! 3. Default values
//!
//! The flat environment keys operators already use (`APP_ENV`, `DATABASE_PATH`,
//! `SESSION_TIMEOUT`, ...) are mapped onto the nested sections before the
//! figment merge, so `config.toml` and the environment describe the same tree.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Testing,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service-level configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Embedded database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Upload handling configuration
    #[serde(default)]
    pub uploads: UploadConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Login throttling configuration
    #[serde(default)]
    pub logins: LoginConfig,

    /// Password policy configuration
    #[serde(default)]
    pub passwords: PasswordPolicyConfig,

    /// Per-route rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Deployment environment; gates Secure cookies, HSTS, and boot checks
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Secret key for cookie integrity; >= 32 chars in production
    #[serde(default)]
    pub secret_key: String,

    /// Per-request handling deadline in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Grace period for in-flight requests on shutdown, in seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

/// Embedded database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the single-file database; the WAL lives alongside it
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Wall-clock checkpoint interval in seconds
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,

    /// Checkpoint after this many committed write transactions
    #[serde(default = "default_checkpoint_every_writes")]
    pub checkpoint_every_writes: u64,

    /// Queue depth above which submitters receive a typed Busy error
    #[serde(default = "default_write_queue_soft_limit")]
    pub write_queue_soft_limit: usize,
}

/// Upload handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Root directory for stored attachments
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Comma-separated list of allowed MIME types
    #[serde(default = "default_allowed_image_types")]
    pub allowed_image_types: String,
}

impl UploadConfig {
    /// Allowed MIME types as a list, trimmed and lowercased
    pub fn allowed_types(&self) -> Vec<String> {
        self.allowed_image_types
            .split(',')
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in seconds
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent active sessions per user
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent: u32,

    /// Minimum interval between successive expiry-renewal writes, in seconds
    #[serde(default = "default_renewal_window")]
    pub renewal_window_secs: u64,
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Login throttling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Failed attempts before the account locks
    #[serde(default = "default_max_failed_logins")]
    pub max_failed: u32,

    /// Lockout duration in seconds
    #[serde(default = "default_lockout_duration")]
    pub lockout_duration_secs: u64,

    /// Constant delay applied to unknown-user failures, in milliseconds
    #[serde(default = "default_failure_delay_ms")]
    pub failure_delay_ms: u64,
}

/// Password policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordPolicyConfig {
    /// Minimum password length
    #[serde(default = "default_password_min_length")]
    pub min_length: usize,

    /// Number of prior digests a new password must not match
    #[serde(default = "default_password_history")]
    pub history_count: usize,

    /// Argon2id time cost (iterations)
    #[serde(default = "default_argon2_time_cost")]
    pub argon2_time_cost: u32,

    /// Argon2id memory cost in KiB
    #[serde(default = "default_argon2_memory_cost")]
    pub argon2_memory_cost_kib: u32,

    /// Argon2id lanes
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,
}

/// Per-route rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute on the login path, per client IP
    #[serde(default = "default_rate_limit_login")]
    pub login_per_minute: u32,

    /// Requests per minute everywhere else, per client IP
    #[serde(default = "default_rate_limit_api")]
    pub api_per_minute: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file; stderr when unset
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Rotation policy label, consumed by the log shipper
    #[serde(default)]
    pub rotation: Option<String>,

    /// Retention in days, consumed by the log shipper
    #[serde(default)]
    pub retention_days: Option<u32>,
}

fn default_environment() -> Environment {
    Environment::Development
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/mailroom.db")
}

fn default_checkpoint_interval() -> u64 {
    300
}

fn default_checkpoint_every_writes() -> u64 {
    1000
}

fn default_write_queue_soft_limit() -> usize {
    1024
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_max_upload_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_allowed_image_types() -> String {
    "image/jpeg,image/png,image/webp".to_string()
}

fn default_session_timeout() -> u64 {
    1800
}

fn default_max_concurrent_sessions() -> u32 {
    3
}

fn default_renewal_window() -> u64 {
    60
}

fn default_max_failed_logins() -> u32 {
    5
}

fn default_lockout_duration() -> u64 {
    1800
}

fn default_failure_delay_ms() -> u64 {
    250
}

fn default_password_min_length() -> usize {
    12
}

fn default_password_history() -> usize {
    3
}

fn default_argon2_time_cost() -> u32 {
    3
}

fn default_argon2_memory_cost() -> u32 {
    19456
}

fn default_argon2_parallelism() -> u32 {
    1
}

fn default_rate_limit_login() -> u32 {
    10
}

fn default_rate_limit_api() -> u32 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            host: default_host(),
            port: default_port(),
            secret_key: String::new(),
            request_timeout_secs: default_request_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            checkpoint_interval_secs: default_checkpoint_interval(),
            checkpoint_every_writes: default_checkpoint_every_writes(),
            write_queue_soft_limit: default_write_queue_soft_limit(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            allowed_image_types: default_allowed_image_types(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout(),
            max_concurrent: default_max_concurrent_sessions(),
            renewal_window_secs: default_renewal_window(),
        }
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_failed: default_max_failed_logins(),
            lockout_duration_secs: default_lockout_duration(),
            failure_delay_ms: default_failure_delay_ms(),
        }
    }
}

impl Default for PasswordPolicyConfig {
    fn default() -> Self {
        Self {
            min_length: default_password_min_length(),
            history_count: default_password_history(),
            argon2_time_cost: default_argon2_time_cost(),
            argon2_memory_cost_kib: default_argon2_memory_cost(),
            argon2_parallelism: default_argon2_parallelism(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_per_minute: default_rate_limit_login(),
            api_per_minute: default_rate_limit_api(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            rotation: None,
            retention_days: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            database: DatabaseConfig::default(),
            uploads: UploadConfig::default(),
            sessions: SessionConfig::default(),
            logins: LoginConfig::default(),
            passwords: PasswordPolicyConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Flat env keys recognized for operator compatibility, with their nested targets
const ENV_KEY_MAP: &[(&str, &str)] = &[
    ("APP_ENV", "service.environment"),
    ("APP_HOST", "service.host"),
    ("APP_PORT", "service.port"),
    ("SECRET_KEY", "service.secret_key"),
    ("DATABASE_PATH", "database.path"),
    ("DATABASE_CHECKPOINT_INTERVAL", "database.checkpoint_interval_secs"),
    ("UPLOAD_DIR", "uploads.dir"),
    ("MAX_UPLOAD_SIZE", "uploads.max_upload_bytes"),
    ("ALLOWED_IMAGE_TYPES", "uploads.allowed_image_types"),
    ("SESSION_TIMEOUT", "sessions.timeout_secs"),
    ("MAX_CONCURRENT_SESSIONS", "sessions.max_concurrent"),
    ("MAX_FAILED_LOGINS", "logins.max_failed"),
    ("ACCOUNT_LOCKOUT_DURATION", "logins.lockout_duration_secs"),
    ("PASSWORD_MIN_LENGTH", "passwords.min_length"),
    ("PASSWORD_HISTORY_COUNT", "passwords.history_count"),
    ("ARGON2_TIME_COST", "passwords.argon2_time_cost"),
    ("ARGON2_MEMORY_COST", "passwords.argon2_memory_cost_kib"),
    ("ARGON2_PARALLELISM", "passwords.argon2_parallelism"),
    ("RATE_LIMIT_LOGIN", "rate_limit.login_per_minute"),
    ("RATE_LIMIT_API", "rate_limit.api_per_minute"),
    ("LOG_LEVEL", "logging.level"),
    ("LOG_FILE", "logging.file"),
    ("LOG_ROTATION", "logging.rotation"),
    ("LOG_RETENTION_DAYS", "logging.retention_days"),
];

impl Config {
    /// Load configuration from defaults, `./config.toml`, and the environment
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load configuration from a specific TOML file path
    ///
    /// Useful for testing or non-standard deployments. The file may be absent;
    /// environment variables still apply.
    pub fn load_from(path: &str) -> Result<Self> {
        let keys: Vec<&str> = ENV_KEY_MAP.iter().map(|(k, _)| *k).collect();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(
                Env::raw()
                    .only(&keys)
                    .map(|key| {
                        ENV_KEY_MAP
                            .iter()
                            .find(|(flat, _)| key.as_str().eq_ignore_ascii_case(flat))
                            .map(|(_, nested)| (*nested).into())
                            .unwrap_or_else(|| key.as_str().to_owned().into())
                    })
                    .split("."),
            )
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Boot-time strictness checks
    ///
    /// Production requires a secret key of at least 32 characters.
    pub fn validate(&self) -> Result<()> {
        if self.service.environment == Environment::Production {
            if self.service.secret_key.len() < 32 {
                return Err(Error::Validation(
                    "SECRET_KEY must be at least 32 characters in production".into(),
                ));
            }
        } else if self.service.secret_key.is_empty() {
            tracing::warn!("SECRET_KEY is not set; using an empty key outside production");
        }

        if self.sessions.renewal_window_secs >= self.sessions.timeout_secs {
            return Err(Error::Validation(
                "session renewal window must be shorter than the session timeout".into(),
            ));
        }

        Ok(())
    }

    /// Whether the deployment is production
    pub fn is_production(&self) -> bool {
        self.service.environment == Environment::Production
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.service.request_timeout_secs)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.database.checkpoint_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy() {
        let config = Config::default();
        assert_eq!(config.sessions.timeout_secs, 1800);
        assert_eq!(config.sessions.max_concurrent, 3);
        assert_eq!(config.logins.max_failed, 5);
        assert_eq!(config.logins.lockout_duration_secs, 1800);
        assert_eq!(config.passwords.min_length, 12);
        assert_eq!(config.passwords.history_count, 3);
        assert_eq!(config.passwords.argon2_memory_cost_kib, 19456);
        assert_eq!(config.rate_limit.login_per_minute, 10);
        assert_eq!(config.rate_limit.api_per_minute, 100);
        assert_eq!(config.uploads.max_upload_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_allowed_types_parses_csv() {
        let uploads = UploadConfig {
            allowed_image_types: "image/jpeg, IMAGE/PNG ,image/webp,".to_string(),
            ..Default::default()
        };
        assert_eq!(
            uploads.allowed_types(),
            vec!["image/jpeg", "image/png", "image/webp"]
        );
    }

    #[test]
    fn test_production_requires_secret_key() {
        let mut config = Config::default();
        config.service.environment = Environment::Production;
        config.service.secret_key = "short".to_string();
        assert!(config.validate().is_err());

        config.service.secret_key = "x".repeat(32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_renewal_window_must_fit_timeout() {
        let mut config = Config::default();
        config.sessions.renewal_window_secs = config.sessions.timeout_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_key_map_covers_documented_keys() {
        for key in [
            "APP_ENV",
            "DATABASE_PATH",
            "SESSION_TIMEOUT",
            "MAX_FAILED_LOGINS",
            "RATE_LIMIT_LOGIN",
        ] {
            assert!(ENV_KEY_MAP.iter().any(|(flat, _)| *flat == key));
        }
    }
}
