use crate::error::AppResult;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Contact details owned by the account service
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserContact {
    pub email: String,
    pub display_name: Option<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn contact(&self, user_id: Uuid) -> AppResult<Option<UserContact>>;
}

/// Read-only view over the `users` table
pub struct PgUserDirectory {
    db: PgPool,
}

impl PgUserDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn contact(&self, user_id: Uuid) -> AppResult<Option<UserContact>> {
        let contact = sqlx::query_as::<_, UserContact>(
            "SELECT email, display_name FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(contact)
    }
}
