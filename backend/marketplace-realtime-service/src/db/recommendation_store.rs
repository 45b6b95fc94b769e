use super::vector_literal;
use crate::error::{AppError, AppResult};
use crate::models::{CatalogItem, InteractionSignal, Recommendation, SignalSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Reads interaction signals and the catalog, writes recommendation sets
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Single existence check over likes and views
    async fn has_interactions(&self, customer_id: Uuid) -> AppResult<bool>;

    /// All likes, views, reviews and successful order lines of a customer
    async fn fetch_signals(&self, customer_id: Uuid) -> AppResult<Vec<InteractionSignal>>;

    async fn save_product_embedding(&self, product_id: Uuid, embedding: &[f32]) -> AppResult<()>;

    /// Up to `limit` distinct approved products, uniformly at random
    async fn sample_approved_products(&self, limit: usize) -> AppResult<Vec<Uuid>>;

    /// Up to `limit` approved, embedded products by ascending cosine distance
    async fn nearest_approved_products(&self, query: &[f32], limit: usize)
        -> AppResult<Vec<Uuid>>;

    /// Replace the customer's recommendations with `product_ids`.
    ///
    /// Writes only when exactly `expected` distinct products are given;
    /// otherwise nothing is touched and `false` is returned.
    async fn replace_recommendations(
        &self,
        customer_id: Uuid,
        product_ids: &[Uuid],
        expected: usize,
    ) -> AppResult<bool>;

    async fn list_recommendations(&self, customer_id: Uuid) -> AppResult<Vec<Recommendation>>;
}

/// All-or-nothing precondition shared by every store implementation
pub fn is_complete_set(product_ids: &[Uuid], expected: usize) -> bool {
    if product_ids.len() != expected || expected == 0 {
        return false;
    }
    let mut unique = product_ids.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique.len() == expected
}

pub struct PgRecommendationStore {
    db: PgPool,
}

impl PgRecommendationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct SignalRow {
    source: String,
    product_id: Uuid,
    name: String,
    description: Option<String>,
    embedding: Option<Vec<f32>>,
    base_weight: f64,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<SignalRow> for InteractionSignal {
    type Error = AppError;

    fn try_from(row: SignalRow) -> Result<Self, Self::Error> {
        let source = row
            .source
            .parse::<SignalSource>()
            .map_err(|e| AppError::Database(sqlx::Error::Decode(e.into())))?;

        Ok(InteractionSignal {
            source,
            product: CatalogItem {
                id: row.product_id,
                name: row.name,
                description: row.description,
            },
            product_embedding: row.embedding.filter(|e| !e.is_empty()),
            base_weight: row.base_weight,
            occurred_at: row.occurred_at,
        })
    }
}

fn fixed_weight(source: SignalSource) -> f64 {
    source.fixed_weight().unwrap_or(1.0)
}

#[async_trait]
impl RecommendationStore for PgRecommendationStore {
    async fn has_interactions(&self, customer_id: Uuid) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM product_likes WHERE customer_id = $1)
                OR EXISTS (SELECT 1 FROM product_views WHERE customer_id = $1)
            "#,
        )
        .bind(customer_id)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    async fn fetch_signals(&self, customer_id: Uuid) -> AppResult<Vec<InteractionSignal>> {
        let rows = sqlx::query_as::<_, SignalRow>(
            r#"
            SELECT 'like' AS source, p.id AS product_id, p.name, p.description,
                   p.embedding::real[] AS embedding, $2::float8 AS base_weight,
                   l.created_at AS occurred_at
            FROM product_likes l
            JOIN products p ON p.id = l.product_id
            WHERE l.customer_id = $1
            UNION ALL
            SELECT 'view', p.id, p.name, p.description,
                   p.embedding::real[], $3::float8, v.viewed_at
            FROM product_views v
            JOIN products p ON p.id = v.product_id
            WHERE v.customer_id = $1
            UNION ALL
            SELECT 'review', p.id, p.name, p.description,
                   p.embedding::real[], r.rating::float8, r.created_at
            FROM reviews r
            JOIN products p ON p.id = r.product_id
            WHERE r.customer_id = $1
            UNION ALL
            SELECT 'order', p.id, p.name, p.description,
                   p.embedding::real[], $4::float8, o.created_at
            FROM orders o
            JOIN order_items oi ON oi.order_id = o.id
            JOIN products p ON p.id = oi.product_id
            WHERE o.customer_id = $1 AND o.payment_status = 'SUCCESS'
            "#,
        )
        .bind(customer_id)
        .bind(fixed_weight(SignalSource::Like))
        .bind(fixed_weight(SignalSource::View))
        .bind(fixed_weight(SignalSource::Order))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(InteractionSignal::try_from).collect()
    }

    async fn save_product_embedding(&self, product_id: Uuid, embedding: &[f32]) -> AppResult<()> {
        sqlx::query("UPDATE products SET embedding = $2::vector WHERE id = $1")
            .bind(product_id)
            .bind(vector_literal(embedding))
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn sample_approved_products(&self, limit: usize) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM products
            WHERE status = 'APPROVED'
            ORDER BY random()
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        Ok(ids)
    }

    async fn nearest_approved_products(
        &self,
        query: &[f32],
        limit: usize,
    ) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM products
            WHERE status = 'APPROVED' AND embedding IS NOT NULL
            ORDER BY embedding <=> $1::vector
            LIMIT $2
            "#,
        )
        .bind(vector_literal(query))
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        Ok(ids)
    }

    async fn replace_recommendations(
        &self,
        customer_id: Uuid,
        product_ids: &[Uuid],
        expected: usize,
    ) -> AppResult<bool> {
        if !is_complete_set(product_ids, expected) {
            return Ok(false);
        }

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM recommendations WHERE customer_id = $1")
            .bind(customer_id)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO recommendations (customer_id, product_id, updated_at)
            SELECT $1, product_id, NOW() FROM UNNEST($2::uuid[]) AS t(product_id)
            "#,
        )
        .bind(customer_id)
        .bind(product_ids)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() as usize != expected {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list_recommendations(&self, customer_id: Uuid) -> AppResult<Vec<Recommendation>> {
        let rows = sqlx::query_as::<_, Recommendation>(
            r#"
            SELECT customer_id, product_id, updated_at
            FROM recommendations
            WHERE customer_id = $1
            ORDER BY updated_at DESC, product_id
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_set_requires_exact_distinct_count() {
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        assert!(is_complete_set(&ids, 5));
        assert!(!is_complete_set(&ids[..4], 5));
        assert!(!is_complete_set(&[], 0));

        let mut dup = ids.clone();
        dup[4] = dup[0];
        assert!(!is_complete_set(&dup, 5));
    }
}
