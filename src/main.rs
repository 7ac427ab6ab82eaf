use naira_invest_bot::cache::build_session_store;
use naira_invest_bot::config::AppConfig;
use naira_invest_bot::database::build_ledger_store;
use naira_invest_bot::logging::init_tracing;
use naira_invest_bot::messaging::TelegramClient;
use naira_invest_bot::payments::PaystackGateway;
use naira_invest_bot::workers::MaturitySweepWorker;
use naira_invest_bot::{build_router, AppComponents, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

const TELEGRAM_TIMEOUT: Duration = Duration::from_secs(15);

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bot = %config.bot.username,
        admins = config.bot.admin_ids.len(),
        transfers_enabled = config.paystack.allow_transfers,
        "🚀 Starting naira investment bot"
    );

    info!("📊 Initializing ledger store...");
    let ledger_store = build_ledger_store(&config.database).await.map_err(|e| {
        error!("Failed to initialize ledger store: {}", e);
        e
    })?;

    info!("🔄 Initializing session store...");
    let sessions = build_session_store(&config.cache).await.map_err(|e| {
        error!("Failed to initialize session store: {}", e);
        e
    })?;

    let gateway = Arc::new(PaystackGateway::new(config.paystack.clone())?);
    let messenger = Arc::new(TelegramClient::new(
        &config.bot.api_base,
        &config.bot.token,
        TELEGRAM_TIMEOUT,
    )?);

    let state = AppState::new(AppComponents {
        ledger_store,
        sessions,
        gateway,
        messenger,
        bot: config.bot.clone(),
        sweep_token: config.sweep.trigger_token.clone(),
        callback_url: config.paystack.callback_url.clone(),
    });

    if config.sweep.trigger_token.is_none() {
        warn!("SWEEP_TRIGGER_TOKEN not set; /cron/maturity-sweep is unauthenticated");
    }

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);

    let sweep_handle = if config.sweep.worker_enabled {
        info!(
            interval_secs = config.sweep.interval.as_secs(),
            "Starting maturity sweep worker"
        );
        let worker = MaturitySweepWorker::new(state.sweep.clone(), config.sweep.interval);
        Some(tokio::spawn(worker.run(worker_shutdown_rx)))
    } else {
        info!("Maturity sweep worker disabled (SWEEP_WORKER_ENABLED=false)");
        None
    };

    let app = build_router(state);
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = sweep_handle {
        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for maturity sweep worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
