use crate::config::DatabaseConfig;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub mod chat_store;
pub mod recommendation_store;
pub mod user_directory;

pub use chat_store::{ChatStore, PgChatStore};
pub use recommendation_store::{PgRecommendationStore, RecommendationStore};
pub use user_directory::{PgUserDirectory, UserContact, UserDirectory};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_pool(cfg: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = cfg.max_connections,
        acquire_timeout_secs = cfg.acquire_timeout_secs,
        "creating database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
        .connect(&cfg.url)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

/// pgvector text literal, e.g. `[0.1,0.2,0.3]`
pub(crate) fn vector_literal(values: &[f32]) -> String {
    let body = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{body}]")
}
