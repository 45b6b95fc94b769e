use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Message, NewMessage};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

/// Conversation and message persistence
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Fetch-or-create the conversation for a (customer, seller) pair.
    ///
    /// Must be safe under concurrent callers racing on the same pair.
    async fn upsert_conversation(&self, customer_id: Uuid, seller_id: Uuid)
        -> AppResult<Conversation>;

    async fn find_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    /// Durably persist a message and bump the conversation's `updated_at`
    async fn create_message(&self, message: NewMessage) -> AppResult<Message>;
}

pub struct PgChatStore {
    db: PgPool,
}

impl PgChatStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn upsert_conversation(
        &self,
        customer_id: Uuid,
        seller_id: Uuid,
    ) -> AppResult<Conversation> {
        // The no-op DO UPDATE makes RETURNING yield the existing row on conflict.
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (id, customer_id, seller_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (customer_id, seller_id)
            DO UPDATE SET customer_id = EXCLUDED.customer_id
            RETURNING id, customer_id, seller_id, is_flagged, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(customer_id)
        .bind(seller_id)
        .fetch_one(&self.db)
        .await?;

        Ok(conversation)
    }

    async fn find_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, customer_id, seller_id, is_flagged, created_at, updated_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(conversation)
    }

    async fn create_message(&self, message: NewMessage) -> AppResult<Message> {
        let mut tx = self.db.begin().await?;
        let now = Utc::now();

        let persisted = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, images, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, conversation_id, sender_id, receiver_id, content, images, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(&message.content)
        .bind(&message.images)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let touched = sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
            .bind(message.conversation_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        if touched.rows_affected() == 0 {
            // FK would normally catch this; keep the message unwritten either way.
            tx.rollback().await?;
            return Err(AppError::NotFound("conversation not found".into()));
        }

        tx.commit().await?;
        Ok(persisted)
    }
}
