use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::error::AppError;
use crate::payments::utils::secure_eq;
use crate::workers::maturity_sweep::start_of_day;
use crate::AppState;

pub const SWEEP_TOKEN_HEADER: &str = "x-sweep-token";

/// GET|POST /cron/maturity-sweep
pub async fn trigger_maturity_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<JsonValue>, AppError> {
    if let Some(expected) = state.sweep_token.as_deref() {
        let supplied = headers
            .get(SWEEP_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !secure_eq(supplied.as_bytes(), expected.as_bytes()) {
            warn!("Rejected maturity sweep trigger with bad token");
            return Err(AppError::unauthorized("invalid sweep token"));
        }
    }

    let as_of = start_of_day(Utc::now());
    let report = state.sweep.run_sweep(as_of).await?;
    let processed = report.processed();
    info!(as_of = %as_of, processed, "Maturity sweep triggered");

    if processed == 0 {
        return Ok(Json(json!({
            "status": "ok",
            "processed": 0,
            "message": "no matured investments found",
        })));
    }

    Ok(Json(json!({
        "status": "ok",
        "processed": processed,
        "users": report.users,
        "paid_out": report.paid_out,
        "already_settled": report.already_settled,
        "plan_not_found": report.plan_not_found,
        "payout_errors": report.payout_errors,
    })))
}
