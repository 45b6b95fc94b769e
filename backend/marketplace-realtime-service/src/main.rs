use actix_web::{web, App, HttpServer};
use marketplace_realtime_service::{
    config, db,
    db::{PgChatStore, PgRecommendationStore, PgUserDirectory},
    error::AppError,
    logging, metrics, routes,
    services::{EmailNotifier, HttpEmbeddingClient, JwtAuthenticator, RedisPresenceCache},
    state::{AppState, Collaborators},
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);
    tracing::info!(env = %cfg.app.env, port = cfg.app.port, "starting marketplace-realtime-service");

    let pool = db::init_pool(&cfg.database)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;

    let presence = RedisPresenceCache::connect(&cfg.redis)
        .await
        .map_err(|e| AppError::StartServer(format!("redis: {e}")))?;

    let authenticator = JwtAuthenticator::from_public_key_pem(&cfg.auth.jwt_public_key_pem)?;
    let embedder = HttpEmbeddingClient::new(&cfg.embedding)?;
    let notifier = EmailNotifier::new(&cfg.smtp, Arc::new(PgUserDirectory::new(pool.clone())))?;

    let state = AppState::new(
        &cfg.realtime,
        Collaborators {
            chat_store: Arc::new(PgChatStore::new(pool.clone())),
            recommendation_store: Arc::new(PgRecommendationStore::new(pool.clone())),
            embedder: Arc::new(embedder),
            notifier: Arc::new(notifier),
            presence: Arc::new(presence),
            authenticator: Arc::new(authenticator),
        },
    );

    let bind_addr = format!("0.0.0.0:{}", cfg.app.port);
    tracing::info!(%bind_addr, "HTTP and WebSocket server listening");

    let server_state = state.clone();
    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(metrics::MetricsMiddleware)
            .app_data(web::Data::new(server_state.clone()))
            .configure(routes::configure)
            .route("/metrics", web::get().to(metrics::serve_metrics))
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("server: {e}")))?;

    tracing::info!("server stopped, tearing down presence jobs and connections");
    state.shutdown().await;
    pool.close().await;
    Ok(())
}
