use crate::config::RedisConfig;
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use uuid::Uuid;

/// Marker meaning "this user is considered active"
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceMarker {
    pub user_id: Uuid,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// TTL-bound presence store. Absence of a marker means the session expired.
#[async_trait]
pub trait PresenceCache: Send + Sync {
    async fn get(&self, user_id: Uuid) -> AppResult<Option<PresenceMarker>>;

    /// Set or refresh the marker with a fresh TTL
    async fn touch(&self, user_id: Uuid) -> AppResult<()>;
}

/// Redis-backed presence markers (`{prefix}:{user_id}` → RFC3339 timestamp)
#[derive(Clone)]
pub struct RedisPresenceCache {
    manager: ConnectionManager,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisPresenceCache {
    pub fn new(manager: ConnectionManager, key_prefix: String, ttl_secs: u64) -> Self {
        Self {
            manager,
            key_prefix,
            ttl_secs,
        }
    }

    pub async fn connect(cfg: &RedisConfig) -> AppResult<Self> {
        let client = Client::open(cfg.url.as_str())?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(
            manager,
            cfg.presence_key_prefix.clone(),
            cfg.presence_ttl_secs,
        ))
    }

    fn key(&self, user_id: Uuid) -> String {
        presence_key(&self.key_prefix, user_id)
    }
}

pub(crate) fn presence_key(prefix: &str, user_id: Uuid) -> String {
    format!("{prefix}:{user_id}")
}

#[async_trait]
impl PresenceCache for RedisPresenceCache {
    async fn get(&self, user_id: Uuid) -> AppResult<Option<PresenceMarker>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(self.key(user_id)).await?;

        Ok(value.map(|raw| PresenceMarker {
            user_id,
            last_active_at: DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
        }))
    }

    async fn touch(&self, user_id: Uuid) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(self.key(user_id), Utc::now().to_rfc3339(), self.ttl_secs)
            .await?;
        Ok(())
    }
}
