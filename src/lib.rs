pub mod api;
pub mod bot;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod messaging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use crate::bot::BotService;
use crate::cache::SessionStore;
use crate::config::BotConfig;
use crate::database::ledger_store::LedgerStore;
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::messaging::Messenger;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::payments::PaymentGateway;
use crate::services::{LedgerService, NotificationService, WebhookProcessor};
use crate::workers::MaturitySweep;

/// Collaborators the service is assembled from. `main` builds the real
/// ones; tests pass in-memory stores and recording fakes.
pub struct AppComponents {
    pub ledger_store: Arc<dyn LedgerStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub messenger: Arc<dyn Messenger>,
    pub bot: BotConfig,
    pub sweep_token: Option<String>,
    pub callback_url: Option<String>,
}

// Application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: LedgerService,
    pub webhooks: Arc<WebhookProcessor>,
    pub sweep: MaturitySweep,
    pub bot: Arc<BotService>,
    pub health_checker: HealthChecker,
    pub sweep_token: Option<String>,
    pub telegram_secret: Option<String>,
}

impl AppState {
    pub fn new(components: AppComponents) -> Self {
        let AppComponents {
            ledger_store,
            sessions,
            gateway,
            messenger,
            bot,
            sweep_token,
            callback_url,
        } = components;

        let ledger = LedgerService::new(ledger_store.clone());
        let notifications = NotificationService::new(messenger.clone());
        let telegram_secret = bot.webhook_secret.clone();

        Self {
            webhooks: Arc::new(WebhookProcessor::new(
                ledger.clone(),
                gateway.clone(),
                notifications.clone(),
            )),
            sweep: MaturitySweep::new(ledger.clone(), notifications),
            bot: Arc::new(BotService::new(
                ledger.clone(),
                gateway,
                messenger,
                sessions.clone(),
                bot,
                callback_url,
            )),
            health_checker: HealthChecker::new(ledger_store, sessions),
            ledger,
            sweep_token,
            telegram_secret,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route(
            "/webhooks/paystack",
            post(api::webhooks::handle_paystack_webhook),
        )
        .route(
            "/cron/maturity-sweep",
            get(api::sweep::trigger_maturity_sweep).post(api::sweep::trigger_maturity_sweep),
        )
        .route(
            "/telegram/webhook",
            post(api::telegram::handle_telegram_update),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

// Handlers
async fn root() -> &'static str {
    "Naira investment bot is running"
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health_checker.check_health().await;

    // Return 503 if the ledger is unreachable
    if health_status.status == HealthState::Unhealthy {
        error!("❌ Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        info!("✅ Health check passed");
        Ok(Json(health_status))
    }
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> &'static str {
    "OK"
}
