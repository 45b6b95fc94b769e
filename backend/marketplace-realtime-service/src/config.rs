use crate::error::AppError;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub embedding: EmbeddingConfig,
    pub smtp: SmtpConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Key prefix for presence markers (`{prefix}:{user_id}`)
    pub presence_key_prefix: String,
    /// TTL of a presence marker in seconds (default: 900)
    pub presence_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// RS256 public key used to verify connection tokens
    pub jwt_public_key_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// No host means notifications are only logged
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("from", &self.from)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub heartbeat_interval_secs: u64,
    pub presence_tick_secs: u64,
    pub recommendation_count: usize,
}

impl RealtimeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn presence_tick(&self) -> Duration {
        Duration::from_secs(self.presence_tick_secs)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            presence_tick_secs: 300,
            recommendation_count: 5,
        }
    }
}

fn required(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Config(format!("{name} missing")))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{name} is not a valid value: {raw}"))),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let defaults = RealtimeConfig::default();

        Ok(Config {
            app: AppConfig {
                env: optional("APP_ENV").unwrap_or_else(|| "development".to_string()),
                port: parsed("APP_PORT", 8080)?,
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
                acquire_timeout_secs: parsed("DATABASE_ACQUIRE_TIMEOUT_SECS", 10)?,
            },
            redis: RedisConfig {
                url: optional("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".into()),
                presence_key_prefix: optional("PRESENCE_KEY_PREFIX")
                    .unwrap_or_else(|| "presence".into()),
                presence_ttl_secs: parsed("PRESENCE_TTL_SECS", 900)?,
            },
            auth: AuthConfig {
                // Accept PEMs with escaped newlines
                jwt_public_key_pem: required("JWT_PUBLIC_KEY_PEM")?.replace("\\n", "\n"),
            },
            embedding: EmbeddingConfig {
                base_url: optional("EMBEDDING_SERVICE_URL")
                    .unwrap_or_else(|| "http://127.0.0.1:8090".into()),
                timeout_secs: parsed("EMBEDDING_TIMEOUT_SECS", 10)?,
            },
            smtp: SmtpConfig {
                host: optional("SMTP_HOST"),
                port: parsed("SMTP_PORT", 587)?,
                username: optional("SMTP_USERNAME"),
                password: optional("SMTP_PASSWORD"),
                from: optional("SMTP_FROM")
                    .unwrap_or_else(|| "no-reply@marketplace.local".into()),
            },
            realtime: RealtimeConfig {
                heartbeat_interval_secs: parsed(
                    "HEARTBEAT_INTERVAL_SECS",
                    defaults.heartbeat_interval_secs,
                )?,
                presence_tick_secs: parsed("PRESENCE_TICK_SECS", defaults.presence_tick_secs)?,
                recommendation_count: parsed(
                    "RECOMMENDATION_COUNT",
                    defaults.recommendation_count,
                )?,
            },
        })
    }
}
