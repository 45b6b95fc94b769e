//! In-memory collaborators for integration tests
//!
//! Every store/client trait the realtime core depends on gets a small fake
//! here, so routing, recompute and scheduling run without Postgres, Redis,
//! SMTP or the embedding service.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use marketplace_realtime_service::config::RealtimeConfig;
use marketplace_realtime_service::db::recommendation_store::is_complete_set;
use marketplace_realtime_service::db::{ChatStore, RecommendationStore};
use marketplace_realtime_service::error::{AppError, AppResult};
use marketplace_realtime_service::models::{
    CatalogItem, Conversation, InteractionSignal, Message, NewMessage, Recommendation, Role,
    SignalSource,
};
use marketplace_realtime_service::services::vector_math::cosine_distance;
use marketplace_realtime_service::services::{
    ConversationContext, EmbeddingService, JwtAuthenticator, NotificationSender, PresenceCache,
    PresenceMarker,
};
use marketplace_realtime_service::state::{AppState, Collaborators};
use marketplace_realtime_service::websocket::{
    Connection, ConnectionHandle, ConnectionRegistry, ServerFrame, SessionCommand,
};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

pub const TEST_PUBLIC_KEY: &str = include_str!("../fixtures/jwt_test_public.pem");
pub const TEST_PRIVATE_KEY: &str = include_str!("../fixtures/jwt_test_private.pem");

fn unavailable() -> AppError {
    AppError::Database(sqlx::Error::PoolTimedOut)
}

// ---------------------------------------------------------------------------
// Chat persistence
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ChatState {
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct MemoryChatStore {
    state: Mutex<ChatState>,
    fail_writes: AtomicBool,
    slow_content: Mutex<Option<(String, std::time::Duration)>>,
}

impl MemoryChatStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Hold back the write of any message with exactly this content
    pub fn delay_content(&self, content: &str, delay: std::time::Duration) {
        *self.slow_content.lock().unwrap() = Some((content.to_string(), delay));
    }

    pub fn insert_conversation(&self, customer_id: Uuid, seller_id: Uuid) -> Conversation {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            customer_id,
            seller_id,
            is_flagged: false,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .unwrap()
            .conversations
            .push(conversation.clone());
        conversation
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().unwrap().conversations.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.clone()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn upsert_conversation(
        &self,
        customer_id: Uuid,
        seller_id: Uuid,
    ) -> AppResult<Conversation> {
        // Let racing callers interleave before the atomic section.
        tokio::task::yield_now().await;

        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .conversations
            .iter()
            .find(|c| c.customer_id == customer_id && c.seller_id == seller_id)
        {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            customer_id,
            seller_id,
            is_flagged: false,
            created_at: now,
            updated_at: now,
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn find_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let state = self.state.lock().unwrap();
        Ok(state.conversations.iter().find(|c| c.id == id).cloned())
    }

    async fn create_message(&self, message: NewMessage) -> AppResult<Message> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(unavailable());
        }

        let delay = self
            .slow_content
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(content, _)| *content == message.content)
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
            .ok_or_else(|| AppError::NotFound("conversation not found".into()))?;
        conversation.updated_at = now;

        let persisted = message.into_message(Uuid::new_v4(), now);
        state.messages.push(persisted.clone());
        Ok(persisted)
    }
}

// ---------------------------------------------------------------------------
// Recommendation persistence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CatalogProduct {
    pub id: Uuid,
    pub name: String,
    pub approved: bool,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
struct StoredSignal {
    source: SignalSource,
    product_id: Uuid,
    base_weight: f64,
    occurred_at: DateTime<Utc>,
}

#[derive(Default)]
struct RecommendationState {
    catalog: Vec<CatalogProduct>,
    signals: HashMap<Uuid, Vec<StoredSignal>>,
    recommendations: HashMap<Uuid, Vec<Recommendation>>,
}

#[derive(Default)]
pub struct MemoryRecommendationStore {
    state: Mutex<RecommendationState>,
    replace_calls: AtomicUsize,
    fail_reads: AtomicBool,
}

impl MemoryRecommendationStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn add_product(&self, approved: bool, embedding: Option<Vec<f32>>) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().catalog.push(CatalogProduct {
            id,
            name: format!("product-{id}"),
            approved,
            embedding,
        });
        id
    }

    pub fn add_signal(
        &self,
        customer_id: Uuid,
        source: SignalSource,
        product_id: Uuid,
        age: ChronoDuration,
    ) {
        let base_weight = source.fixed_weight().unwrap_or(4.0);
        self.add_weighted_signal(customer_id, source, product_id, base_weight, age);
    }

    pub fn add_weighted_signal(
        &self,
        customer_id: Uuid,
        source: SignalSource,
        product_id: Uuid,
        base_weight: f64,
        age: ChronoDuration,
    ) {
        self.state
            .lock()
            .unwrap()
            .signals
            .entry(customer_id)
            .or_default()
            .push(StoredSignal {
                source,
                product_id,
                base_weight,
                occurred_at: Utc::now() - age,
            });
    }

    pub fn seed_recommendations(&self, customer_id: Uuid, product_ids: &[Uuid]) {
        let now = Utc::now();
        self.state.lock().unwrap().recommendations.insert(
            customer_id,
            product_ids
                .iter()
                .map(|product_id| Recommendation {
                    customer_id,
                    product_id: *product_id,
                    updated_at: now,
                })
                .collect(),
        );
    }

    pub fn recommended_ids(&self, customer_id: Uuid) -> Vec<Uuid> {
        self.state
            .lock()
            .unwrap()
            .recommendations
            .get(&customer_id)
            .map(|rows| rows.iter().map(|r| r.product_id).collect())
            .unwrap_or_default()
    }

    pub fn product(&self, id: Uuid) -> Option<CatalogProduct> {
        self.state
            .lock()
            .unwrap()
            .catalog
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    fn check_reads(&self) -> AppResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecommendationStore for MemoryRecommendationStore {
    async fn has_interactions(&self, customer_id: Uuid) -> AppResult<bool> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .signals
            .get(&customer_id)
            .map(|signals| {
                signals
                    .iter()
                    .any(|s| matches!(s.source, SignalSource::Like | SignalSource::View))
            })
            .unwrap_or(false))
    }

    async fn fetch_signals(&self, customer_id: Uuid) -> AppResult<Vec<InteractionSignal>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        let signals = state.signals.get(&customer_id).cloned().unwrap_or_default();

        Ok(signals
            .into_iter()
            .filter_map(|s| {
                let product = state.catalog.iter().find(|p| p.id == s.product_id)?;
                Some(InteractionSignal {
                    source: s.source,
                    product: CatalogItem {
                        id: product.id,
                        name: product.name.clone(),
                        description: None,
                    },
                    product_embedding: product.embedding.clone(),
                    base_weight: s.base_weight,
                    occurred_at: s.occurred_at,
                })
            })
            .collect())
    }

    async fn save_product_embedding(&self, product_id: Uuid, embedding: &[f32]) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        let product = state
            .catalog
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or_else(|| AppError::NotFound(format!("product {product_id}")))?;
        product.embedding = Some(embedding.to_vec());
        Ok(())
    }

    async fn sample_approved_products(&self, limit: usize) -> AppResult<Vec<Uuid>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        let mut ids: Vec<Uuid> = state
            .catalog
            .iter()
            .filter(|p| p.approved)
            .map(|p| p.id)
            .collect();
        ids.shuffle(&mut rand::thread_rng());
        ids.truncate(limit);
        Ok(ids)
    }

    async fn nearest_approved_products(
        &self,
        query: &[f32],
        limit: usize,
    ) -> AppResult<Vec<Uuid>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        let mut ranked: Vec<(f64, Uuid)> = state
            .catalog
            .iter()
            .filter(|p| p.approved)
            .filter_map(|p| {
                p.embedding
                    .as_ref()
                    .map(|e| (cosine_distance(query, e), p.id))
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(ranked.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn replace_recommendations(
        &self,
        customer_id: Uuid,
        product_ids: &[Uuid],
        expected: usize,
    ) -> AppResult<bool> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        if !is_complete_set(product_ids, expected) {
            return Ok(false);
        }
        self.seed_recommendations(customer_id, product_ids);
        Ok(true)
    }

    async fn list_recommendations(&self, customer_id: Uuid) -> AppResult<Vec<Recommendation>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .recommendations
            .get(&customer_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Embedding service
// ---------------------------------------------------------------------------

pub struct StubEmbedder {
    vector: Mutex<Vec<f32>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn returning(vector: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            vector: Mutex::new(vector),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        let stub = Self::returning(vec![1.0, 0.0, 0.0]);
        stub.set_failing(true);
        stub
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for StubEmbedder {
    async fn embed_text(&self, _text: &str) -> AppResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Embedding("embedding service returned 503".into()));
        }
        Ok(self.vector.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Presence cache
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryPresenceCache {
    markers: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl MemoryPresenceCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_present(&self, user_id: Uuid) {
        self.markers.lock().unwrap().insert(user_id, Utc::now());
    }

    pub fn expire(&self, user_id: Uuid) {
        self.markers.lock().unwrap().remove(&user_id);
    }

    pub fn is_present(&self, user_id: Uuid) -> bool {
        self.markers.lock().unwrap().contains_key(&user_id)
    }
}

#[async_trait]
impl PresenceCache for MemoryPresenceCache {
    async fn get(&self, user_id: Uuid) -> AppResult<Option<PresenceMarker>> {
        Ok(self
            .markers
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|at| PresenceMarker {
                user_id,
                last_active_at: Some(*at),
            }))
    }

    async fn touch(&self, user_id: Uuid) -> AppResult<()> {
        self.mark_present(user_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub struct RecordingNotifier {
    tx: UnboundedSender<(Uuid, ConversationContext)>,
}

impl RecordingNotifier {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<(Uuid, ConversationContext)>) {
        let (tx, rx) = unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn notify(&self, recipient_id: Uuid, context: ConversationContext) -> AppResult<()> {
        let _ = self.tx.send((recipient_id, context));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// Register a channel-backed connection; the receiver plays the socket.
pub async fn connect(
    registry: &ConnectionRegistry,
    user_id: Uuid,
    role: Role,
) -> (Connection, UnboundedReceiver<SessionCommand>) {
    let (handle, rx) = ConnectionHandle::channel();
    let connection = registry.register(user_id, role, handle).await;
    (connection, rx)
}

/// Next frame already queued for the socket, skipping liveness probes
pub fn next_frame(rx: &mut UnboundedReceiver<SessionCommand>) -> Option<ServerFrame> {
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            SessionCommand::Frame(json) => {
                return Some(ServerFrame::from_json(&json).expect("valid server frame"))
            }
            SessionCommand::Probe => continue,
            SessionCommand::Close => return None,
        }
    }
    None
}

/// Whether a `Close` command is queued for the socket
pub fn received_close(rx: &mut UnboundedReceiver<SessionCommand>) -> bool {
    while let Ok(cmd) = rx.try_recv() {
        if matches!(cmd, SessionCommand::Close) {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub state: AppState,
    pub chat: Arc<MemoryChatStore>,
    pub recommendations: Arc<MemoryRecommendationStore>,
    pub embedder: Arc<StubEmbedder>,
    pub presence: Arc<MemoryPresenceCache>,
    pub notifications: UnboundedReceiver<(Uuid, ConversationContext)>,
}

pub fn test_app(realtime: RealtimeConfig) -> TestApp {
    let chat = MemoryChatStore::new();
    let recommendations = MemoryRecommendationStore::new();
    let embedder = StubEmbedder::returning(vec![1.0, 0.0, 0.0]);
    let presence = MemoryPresenceCache::new();
    let (notifier, notifications) = RecordingNotifier::new();

    let state = AppState::new(
        &realtime,
        Collaborators {
            chat_store: chat.clone(),
            recommendation_store: recommendations.clone(),
            embedder: embedder.clone(),
            notifier,
            presence: presence.clone(),
            authenticator: Arc::new(
                JwtAuthenticator::from_public_key_pem(TEST_PUBLIC_KEY).expect("test key"),
            ),
        },
    );

    TestApp {
        state,
        chat,
        recommendations,
        embedder,
        presence,
        notifications,
    }
}
