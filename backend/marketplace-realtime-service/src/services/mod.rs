pub mod auth;
pub mod conversation_service;
pub mod embedding_client;
pub mod notification_sender;
pub mod presence_cache;
pub mod presence_scheduler;
pub mod recommendation_service;
pub mod vector_math;

pub use auth::JwtAuthenticator;
pub use conversation_service::{ConversationRouter, Delivery, InboundQueue, Sender};
pub use embedding_client::{EmbeddingService, HttpEmbeddingClient};
pub use notification_sender::{ConversationContext, EmailNotifier, NotificationSender};
pub use presence_cache::{PresenceCache, PresenceMarker, RedisPresenceCache};
pub use presence_scheduler::{PresenceScheduler, TickResult};
pub use recommendation_service::{RecommendationEngine, RecomputeOutcome, RecomputePath};
