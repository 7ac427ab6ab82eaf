use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::{error, info, warn};

use crate::services::webhook_processor::{PaystackEvent, WebhookOutcome, WebhookProcessorError};
use crate::AppState;

/// POST /webhooks/paystack
///
/// Acknowledges a verified event immediately and applies it on a spawned
/// task; Paystack retries anything that is not a 200. A signed payload that
/// cannot be parsed is acknowledged and dropped.
pub async fn handle_paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get("x-paystack-signature")
        .and_then(|v| v.to_str().ok());

    if signature.is_none() {
        warn!("Missing paystack webhook signature");
        return (StatusCode::UNAUTHORIZED, "Missing signature").into_response();
    }

    if let Err(WebhookProcessorError::InvalidSignature) = state.webhooks.verify(&body, signature) {
        warn!("Invalid paystack webhook signature");
        return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
    }

    let event = match PaystackEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "Unusable paystack webhook payload, dropped");
            return ok_response();
        }
    };

    info!(event = event.kind(), "Received paystack webhook");
    let processor = state.webhooks.clone();
    tokio::spawn(async move {
        let kind = event.kind().to_string();
        match processor.process(event).await {
            Ok(WebhookOutcome::Ignored) => {}
            Ok(outcome) => info!(event = %kind, outcome = ?outcome, "Webhook processed"),
            Err(e) => error!(event = %kind, error = %e, "Webhook processing failed"),
        }
    });

    ok_response()
}

fn ok_response() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}
