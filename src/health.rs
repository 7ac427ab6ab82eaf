//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::cache::SessionStore;
use crate::database::ledger_store::LedgerStore;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the ledger and session stores
#[derive(Clone)]
pub struct HealthChecker {
    ledger: Arc<dyn LedgerStore>,
    sessions: Arc<dyn SessionStore>,
}

impl HealthChecker {
    pub fn new(ledger: Arc<dyn LedgerStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { ledger, sessions }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let ledger = probe("ledger", async {
            self.ledger.health_check().await.map_err(|e| e.to_string())
        })
        .await;
        let sessions = probe("sessions", async {
            self.sessions.health_check().await.map_err(|e| e.to_string())
        })
        .await;

        let overall_healthy = ledger.status == ComponentState::Up;
        // Losing sessions only interrupts conversations in progress.
        let sessions_up = sessions.status == ComponentState::Up;

        health_status.checks.insert("ledger".to_string(), ledger);
        health_status.checks.insert("sessions".to_string(), sessions);

        health_status.status = match (overall_healthy, sessions_up) {
            (true, true) => HealthState::Healthy,
            (true, false) => HealthState::Degraded,
            (false, _) => HealthState::Unhealthy,
        };

        health_status
    }
}

async fn probe<F>(component: &str, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), String>>,
{
    let start = Instant::now();
    match timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(())) => {
            let response_time = start.elapsed().as_millis();
            info!(component, "health check OK ({}ms)", response_time);
            ComponentHealth::up(Some(response_time))
        }
        Ok(Err(e)) => {
            error!(component, error = %e, "health check failed");
            ComponentHealth::down(Some(e))
        }
        Err(_) => {
            error!(component, "health check timed out");
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}
