use crate::error::AppResult;
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse};
use uuid::Uuid;

/// Run a recompute cycle now, outside the presence schedule
#[post("/recommendations/{customer_id}/refresh")]
pub async fn refresh_recommendations(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let outcome = state.engine.recompute(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[get("/recommendations/{customer_id}")]
pub async fn get_recommendations(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let recommendations = state.engine.list(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(recommendations))
}
