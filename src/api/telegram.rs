use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::{debug, warn};

use crate::messaging::Update;
use crate::payments::utils::secure_eq;
use crate::AppState;

pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// POST /telegram/webhook
///
/// Telegram redelivers anything that is not a 200, so malformed or
/// irrelevant updates are acknowledged and dropped.
pub async fn handle_telegram_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(expected) = state.telegram_secret.as_deref() {
        let supplied = headers
            .get(TELEGRAM_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !secure_eq(supplied.as_bytes(), expected.as_bytes()) {
            warn!("Rejected telegram update with bad secret token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "Unparseable telegram update");
            return StatusCode::OK;
        }
    };

    let update_id = update.update_id;
    match update.into_inbound() {
        Some(inbound) => {
            let bot = state.bot.clone();
            tokio::spawn(async move { bot.handle(inbound).await });
        }
        None => debug!(update_id, "Ignoring telegram update without text or callback"),
    }

    StatusCode::OK
}
