//! Integration Tests: HTTP surface
//!
//! Drives the actix app with in-memory collaborators.
//!
//! Coverage:
//! - Health endpoint
//! - WebSocket upgrade rejected without a valid token
//! - Presence introspection
//! - Ad hoc recompute and recommendation listing
//! - Metrics scrape sampling live state and counting rejected upgrades

mod common;

use actix_web::{http::StatusCode, test, web, App};
use chrono::{Duration, Utc};
use common::{connect, test_app, TEST_PRIVATE_KEY};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use marketplace_realtime_service::config::RealtimeConfig;
use marketplace_realtime_service::models::Role;
use marketplace_realtime_service::{metrics, routes};
use marketplace_realtime_service::services::auth::Claims;
use serde_json::Value;
use uuid::Uuid;

fn token_for(user_id: Uuid, role: Role) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        name: None,
        exp: (Utc::now() + Duration::hours(1)).timestamp(),
    };
    let key = EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY.as_bytes()).unwrap();
    encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap()
}

#[actix_web::test]
async fn health_returns_ok() {
    let app = test_app(RealtimeConfig::default());
    let service = test::init_service(
        App::new()
            .app_data(web::Data::new(app.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(&service, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await, web::Bytes::from_static(b"OK"));
}

#[actix_web::test]
async fn websocket_requires_valid_token() {
    let app = test_app(RealtimeConfig::default());
    let service = test::init_service(
        App::new()
            .app_data(web::Data::new(app.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let missing = test::call_service(&service, test::TestRequest::get().uri("/ws").to_request()).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let forged = test::call_service(
        &service,
        test::TestRequest::get()
            .uri("/ws?token=eyJhbGciOiJSUzI1NiJ9.e30.bad")
            .to_request(),
    )
    .await;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(forged).await;
    assert_eq!(body["code"], "UNAUTHORIZED");

    assert_eq!(app.state.registry.connection_count().await, 0);
}

#[actix_web::test]
async fn valid_token_reaches_the_handshake() {
    let app = test_app(RealtimeConfig::default());
    let service = test::init_service(
        App::new()
            .app_data(web::Data::new(app.state.clone()))
            .configure(routes::configure),
    )
    .await;

    // Authenticated, but not an upgrade request: the handshake itself fails
    let resp = test::call_service(
        &service,
        test::TestRequest::get()
            .uri("/ws")
            .insert_header((
                "Authorization",
                format!("Bearer {}", token_for(Uuid::new_v4(), Role::Customer)),
            ))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn presence_reports_connection_and_marker() {
    let app = test_app(RealtimeConfig::default());
    let user = Uuid::new_v4();
    let (_conn, _rx) = connect(&app.state.registry, user, Role::Customer).await;
    app.presence.mark_present(user);

    let service = test::init_service(
        App::new()
            .app_data(web::Data::new(app.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let body: Value = test::call_and_read_body_json(
        &service,
        test::TestRequest::get()
            .uri(&format!("/api/v1/presence/{user}"))
            .to_request(),
    )
    .await;

    assert_eq!(body["userId"], user.to_string());
    assert_eq!(body["connected"], true);
    assert_eq!(body["presenceMarker"], true);
    assert_eq!(body["presenceJob"], false);

    let stranger: Value = test::call_and_read_body_json(
        &service,
        test::TestRequest::get()
            .uri(&format!("/api/v1/presence/{}", Uuid::new_v4()))
            .to_request(),
    )
    .await;
    assert_eq!(stranger["connected"], false);
    assert_eq!(stranger["presenceMarker"], false);
}

#[actix_web::test]
async fn refresh_then_list_recommendations() {
    let app = test_app(RealtimeConfig::default());
    for _ in 0..5 {
        app.recommendations.add_product(true, None);
    }
    let customer = Uuid::new_v4();

    let service = test::init_service(
        App::new()
            .app_data(web::Data::new(app.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let outcome: Value = test::call_and_read_body_json(
        &service,
        test::TestRequest::post()
            .uri(&format!("/api/v1/recommendations/{customer}/refresh"))
            .to_request(),
    )
    .await;
    assert_eq!(outcome["outcome"], "replaced");
    assert_eq!(outcome["path"], "cold_start");
    assert_eq!(outcome["count"], 5);

    let rows: Value = test::call_and_read_body_json(
        &service,
        test::TestRequest::get()
            .uri(&format!("/api/v1/recommendations/{customer}"))
            .to_request(),
    )
    .await;
    assert_eq!(rows.as_array().map(Vec::len), Some(5));
    assert_eq!(rows[0]["customerId"], customer.to_string());
}

#[actix_web::test]
async fn refresh_failure_maps_to_error_status() {
    let app = test_app(RealtimeConfig::default());
    app.recommendations.fail_reads(true);

    let service = test::init_service(
        App::new()
            .app_data(web::Data::new(app.state.clone()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(
        &service,
        test::TestRequest::post()
            .uri(&format!("/api/v1/recommendations/{}/refresh", Uuid::new_v4()))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "DATABASE");
    assert_eq!(body["error"], "internal error, please retry");
}

#[actix_web::test]
async fn metrics_sample_live_state_and_count_rejected_upgrades() {
    let app = test_app(RealtimeConfig::default());
    let service = test::init_service(
        App::new()
            .wrap(metrics::MetricsMiddleware)
            .app_data(web::Data::new(app.state.clone()))
            .configure(routes::configure)
            .route("/metrics", web::get().to(metrics::serve_metrics)),
    )
    .await;

    let user = Uuid::new_v4();
    let (_conn, _rx) = connect(&app.state.registry, user, Role::Customer).await;
    assert!(app.state.scheduler.start(user).await);

    let rejected = test::call_service(&service, test::TestRequest::get().uri("/ws").to_request()).await;
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    let body = test::call_and_read_body(
        &service,
        test::TestRequest::get().uri("/metrics").to_request(),
    )
    .await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("marketplace_realtime_presence_jobs"));
    assert!(text.contains("marketplace_realtime_live_connections"));
    assert!(text.contains(r#"marketplace_realtime_ws_upgrades_total{result="rejected"}"#));

    app.state.shutdown().await;
}
