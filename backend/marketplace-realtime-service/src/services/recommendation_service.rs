use crate::db::RecommendationStore;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{InteractionSignal, Recommendation};
use crate::services::embedding_client::EmbeddingService;
use crate::services::vector_math::personalization_vector;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputePath {
    /// No likes or views yet: random approved products
    ColdStart,
    /// Nearest products to the decay-weighted interest vector
    Warm,
}

/// Result of one recompute cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecomputeOutcome {
    /// The customer's set was replaced with `count` products
    Replaced { path: RecomputePath, count: usize },
    /// Fewer candidates than required; nothing written
    NotEnoughCandidates { path: RecomputePath, found: usize },
    /// Signals produced no usable vector; nothing written
    NoSignals,
}

impl RecomputeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RecomputeOutcome::Replaced { .. } => "replaced",
            RecomputeOutcome::NotEnoughCandidates { .. } => "not_enough_candidates",
            RecomputeOutcome::NoSignals => "no_signals",
        }
    }
}

pub struct RecommendationEngine {
    store: Arc<dyn RecommendationStore>,
    embedder: Arc<dyn EmbeddingService>,
    count: usize,
}

impl RecommendationEngine {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        embedder: Arc<dyn EmbeddingService>,
        count: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            count,
        }
    }

    /// Rebuild the customer's recommendation set.
    ///
    /// Either exactly `count` rows replace the previous set or nothing is
    /// written. Errors leave prior recommendations untouched.
    pub async fn recompute(&self, customer_id: Uuid) -> AppResult<RecomputeOutcome> {
        let result = self.run_cycle(customer_id).await;

        match &result {
            Ok(outcome) => {
                metrics::record_recompute(outcome.label());
                tracing::info!(customer_id = %customer_id, outcome = ?outcome, "recommendations recomputed");
            }
            Err(e) => {
                metrics::record_recompute("error");
                tracing::warn!(customer_id = %customer_id, error = %e, "recompute aborted");
            }
        }
        result
    }

    pub async fn list(&self, customer_id: Uuid) -> AppResult<Vec<Recommendation>> {
        self.store.list_recommendations(customer_id).await
    }

    async fn run_cycle(&self, customer_id: Uuid) -> AppResult<RecomputeOutcome> {
        if self.store.has_interactions(customer_id).await? {
            self.warm(customer_id).await
        } else {
            self.cold_start(customer_id).await
        }
    }

    async fn cold_start(&self, customer_id: Uuid) -> AppResult<RecomputeOutcome> {
        let sampled = self.store.sample_approved_products(self.count).await?;
        self.write(customer_id, RecomputePath::ColdStart, &sampled).await
    }

    async fn warm(&self, customer_id: Uuid) -> AppResult<RecomputeOutcome> {
        let signals = self.store.fetch_signals(customer_id).await?;
        let weighted = self.weighted_embeddings(&signals, Utc::now()).await?;

        let query = personalization_vector(weighted.iter().map(|(e, w)| (e.as_slice(), *w)))
            .map_err(|e| AppError::Embedding(e.to_string()))?;

        let Some(query) = query else {
            return Ok(RecomputeOutcome::NoSignals);
        };

        let ranked = self
            .store
            .nearest_approved_products(&query, self.count)
            .await?;
        self.write(customer_id, RecomputePath::Warm, &ranked).await
    }

    /// Pair each signal's embedding with its decayed weight, embedding
    /// products that have none yet and storing the result.
    async fn weighted_embeddings(
        &self,
        signals: &[InteractionSignal],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<(Vec<f32>, f64)>> {
        let mut backfilled: HashMap<Uuid, Vec<f32>> = HashMap::new();
        let mut weighted = Vec::with_capacity(signals.len());

        for signal in signals {
            let embedding = match &signal.product_embedding {
                Some(embedding) => embedding.clone(),
                None => match backfilled.get(&signal.product.id) {
                    Some(embedding) => embedding.clone(),
                    None => {
                        let embedding = self.embedder.embed_product(&signal.product).await?;
                        self.store
                            .save_product_embedding(signal.product.id, &embedding)
                            .await?;
                        tracing::debug!(product_id = %signal.product.id, "product embedding backfilled");
                        backfilled.insert(signal.product.id, embedding.clone());
                        embedding
                    }
                },
            };
            weighted.push((embedding, signal.decayed_weight(now)));
        }

        Ok(weighted)
    }

    async fn write(
        &self,
        customer_id: Uuid,
        path: RecomputePath,
        product_ids: &[Uuid],
    ) -> AppResult<RecomputeOutcome> {
        if self
            .store
            .replace_recommendations(customer_id, product_ids, self.count)
            .await?
        {
            Ok(RecomputeOutcome::Replaced {
                path,
                count: product_ids.len(),
            })
        } else {
            Ok(RecomputeOutcome::NotEnoughCandidates {
                path,
                found: product_ids.len(),
            })
        }
    }
}
