use crate::config::RealtimeConfig;
use crate::db::{ChatStore, RecommendationStore};
use crate::models::Role;
use crate::services::{
    ConversationRouter, EmbeddingService, JwtAuthenticator, NotificationSender, PresenceCache,
    PresenceScheduler, RecommendationEngine, Sender,
};
use crate::websocket::{ConnectionHandle, ConnectionRegistry};
use std::sync::Arc;

/// Shared handles for HTTP handlers and WebSocket sessions
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub router: Arc<ConversationRouter>,
    pub engine: Arc<RecommendationEngine>,
    pub scheduler: PresenceScheduler,
    pub presence: Arc<dyn PresenceCache>,
    pub authenticator: Arc<JwtAuthenticator>,
}

/// External collaborators the realtime core is built on
pub struct Collaborators {
    pub chat_store: Arc<dyn ChatStore>,
    pub recommendation_store: Arc<dyn RecommendationStore>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub notifier: Arc<dyn NotificationSender>,
    pub presence: Arc<dyn PresenceCache>,
    pub authenticator: Arc<JwtAuthenticator>,
}

impl AppState {
    pub fn new(realtime: &RealtimeConfig, deps: Collaborators) -> Self {
        let registry = ConnectionRegistry::new(realtime.heartbeat_interval());

        let router = Arc::new(ConversationRouter::new(
            deps.chat_store,
            registry.clone(),
            deps.notifier,
        ));

        let engine = Arc::new(RecommendationEngine::new(
            deps.recommendation_store,
            deps.embedder,
            realtime.recommendation_count,
        ));

        let scheduler = PresenceScheduler::new(
            registry.clone(),
            engine.clone(),
            deps.presence.clone(),
            realtime.presence_tick(),
        );

        Self {
            registry,
            router,
            engine,
            scheduler,
            presence: deps.presence,
            authenticator: deps.authenticator,
        }
    }

    /// Register a freshly opened transport, mark the user present and, for
    /// customers, start the presence job.
    ///
    /// A transport that closed before registration finished is detached
    /// again and `false` is returned; nothing else is started for it.
    pub async fn attach(&self, sender: &Sender, handle: ConnectionHandle) -> bool {
        let connection_id = handle.id();
        let connection = self
            .registry
            .register(sender.user_id, sender.role, handle)
            .await;

        if !connection.handle.is_open() {
            self.registry
                .remove_if_current(sender.user_id, connection_id)
                .await;
            tracing::info!(user_id = %sender.user_id, "transport closed during registration");
            return false;
        }

        if let Err(e) = self.presence.touch(sender.user_id).await {
            tracing::warn!(user_id = %sender.user_id, error = %e, "failed to set presence marker");
        }

        if sender.role == Role::Customer {
            self.scheduler.start(sender.user_id).await;
        }
        true
    }

    /// Stop every presence job, then close every connection
    pub async fn shutdown(&self) {
        self.scheduler.stop_all().await;
        self.registry.close_all().await;
    }
}
