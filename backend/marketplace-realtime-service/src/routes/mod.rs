pub mod presence;
pub mod recommendations;
pub mod wsroute;

use actix_web::{get, web, HttpResponse};

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// Every route this service exposes, except `/metrics`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(wsroute::ws_handler)
        .service(
            web::scope("/api/v1")
                .service(presence::get_presence)
                .service(recommendations::refresh_recommendations)
                .service(recommendations::get_recommendations),
        );
}
