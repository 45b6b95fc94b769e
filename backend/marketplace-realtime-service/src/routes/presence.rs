use crate::error::AppResult;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceView {
    pub user_id: Uuid,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub presence_job: bool,
    pub presence_marker: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Live connection, presence job and marker state of one user
#[get("/presence/{user_id}")]
pub async fn get_presence(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();

    let connection = state.registry.get(user_id).await;
    let marker = state.presence.get(user_id).await?;

    Ok(HttpResponse::Ok().json(PresenceView {
        user_id,
        connected: connection
            .as_ref()
            .map(|c| c.handle.is_open())
            .unwrap_or(false),
        connected_at: connection.as_ref().map(|c| c.connected_at),
        last_heartbeat_at: connection.as_ref().map(|c| c.last_heartbeat_at()),
        presence_job: state.scheduler.is_running(user_id).await,
        presence_marker: marker.is_some(),
        last_active_at: marker.and_then(|m| m.last_active_at),
    }))
}
