use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::session::WsSession;
use actix_web::{get, http::header, web, Error, HttpRequest, HttpResponse, ResponseError};
use actix_web_actors::ws;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Query-string token first, then `Authorization: Bearer`
fn extract_token(params: &WsParams, req: &HttpRequest) -> Option<String> {
    params
        .token
        .clone()
        .filter(|t| !t.is_empty())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .map(|s| s.trim().to_string())
                .filter(|t| !t.is_empty())
        })
}

/// Authenticate, then upgrade. Nothing is registered for a rejected token.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let Some(token) = extract_token(&query, &req) else {
        tracing::warn!("WebSocket connection rejected: no token provided");
        return Ok(AppError::Unauthorized.error_response());
    };

    let sender = match state.authenticator.authenticate(&token) {
        Ok(sender) => sender,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket connection rejected: invalid token");
            return Ok(e.error_response());
        }
    };

    tracing::debug!(user_id = %sender.user_id, role = %sender.role, "WebSocket authenticated");
    ws::start(WsSession::new(sender, state.get_ref().clone()), &req, stream)
}
