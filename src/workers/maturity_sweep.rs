use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::database::ledger_store::{AppendOutcome, InvestmentUpdate};
use crate::database::models::{InvestmentStatus, UserId};
use crate::error::AppError;
use crate::services::investment_plans::find_plan;
use crate::services::ledger::{LedgerError, LedgerService};
use crate::services::notification::{NotificationService, NotificationType};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Only the initial query can fail a sweep; per-user failures are logged and
/// the sweep moves on.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<SweepError> for AppError {
    fn from(err: SweepError) -> Self {
        match err {
            SweepError::Ledger(e) => e.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub users: usize,
    pub paid_out: usize,
    /// Payout transaction already existed; only the investment status moved.
    pub already_settled: usize,
    pub plan_not_found: usize,
    pub payout_errors: usize,
}

impl SweepReport {
    pub fn processed(&self) -> usize {
        self.paid_out + self.already_settled + self.plan_not_found + self.payout_errors
    }
}

/// Midnight UTC of the day containing `now`, so every run on one day sees the
/// same set of matured investments.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
    DateTime::from_naive_utc_and_offset(midnight, Utc)
}

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MaturitySweep {
    ledger: LedgerService,
    notifications: NotificationService,
}

#[derive(Default)]
struct UserTally {
    paid_out: usize,
    already_settled: usize,
    plan_not_found: usize,
    payout_errors: usize,
    total_paid: Decimal,
}

impl MaturitySweep {
    pub fn new(ledger: LedgerService, notifications: NotificationService) -> Self {
        Self {
            ledger,
            notifications,
        }
    }

    pub async fn run_sweep(&self, as_of: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        let user_ids = self.ledger.users_with_matured_investments(as_of).await?;
        let mut report = SweepReport {
            users: user_ids.len(),
            ..Default::default()
        };
        if user_ids.is_empty() {
            info!(as_of = %as_of, "maturity sweep found no matured investments");
            return Ok(report);
        }

        for user_id in user_ids {
            match self.sweep_user(user_id, as_of).await {
                Ok(tally) => {
                    report.paid_out += tally.paid_out;
                    report.already_settled += tally.already_settled;
                    report.plan_not_found += tally.plan_not_found;
                    report.payout_errors += tally.payout_errors;
                }
                Err(e) => {
                    error!(user_id, error = %e, "maturity sweep failed for user");
                }
            }
        }

        info!(
            as_of = %as_of,
            users = report.users,
            paid_out = report.paid_out,
            already_settled = report.already_settled,
            plan_not_found = report.plan_not_found,
            payout_errors = report.payout_errors,
            "maturity sweep finished"
        );
        Ok(report)
    }

    async fn sweep_user(&self, user_id: UserId, as_of: DateTime<Utc>) -> Result<UserTally, LedgerError> {
        let Some(user) = self.ledger.get_user(user_id).await? else {
            return Ok(UserTally::default());
        };

        let mut tally = UserTally::default();
        let mut updates = Vec::new();

        for investment in user.investments.iter().filter(|i| i.is_due(as_of)) {
            let Some(plan) = find_plan(&investment.plan_id) else {
                warn!(
                    user_id,
                    reference = %investment.reference,
                    plan_id = %investment.plan_id,
                    "matured investment references an unknown plan"
                );
                tally.plan_not_found += 1;
                updates.push(InvestmentUpdate {
                    reference: investment.reference.clone(),
                    status: InvestmentStatus::PlanNotFound,
                    payout_reference: None,
                    last_error: Some(format!("plan {} not found", investment.plan_id)),
                });
                continue;
            };

            let recomputed = plan.projected_return(investment.principal);
            if recomputed != investment.projected_return {
                warn!(
                    reference = %investment.reference,
                    stored = %investment.projected_return,
                    recomputed = %recomputed,
                    "projected return differs from plan formula, paying stored amount"
                );
            }

            match self.ledger.pay_out_investment(user_id, investment).await {
                Ok(outcome) => {
                    let payout_reference = crate::services::reference::payout_reference(
                        &investment.reference,
                    );
                    match outcome {
                        AppendOutcome::Inserted(_) => {
                            tally.paid_out += 1;
                            tally.total_paid += investment.projected_return;
                        }
                        AppendOutcome::Duplicate(_) => {
                            info!(
                                reference = %investment.reference,
                                "payout already recorded, marking investment paid out"
                            );
                            tally.already_settled += 1;
                        }
                    }
                    updates.push(InvestmentUpdate {
                        reference: investment.reference.clone(),
                        status: InvestmentStatus::PaidOut,
                        payout_reference: Some(payout_reference),
                        last_error: None,
                    });
                }
                Err(e) => {
                    error!(
                        user_id,
                        reference = %investment.reference,
                        error = %e,
                        "investment payout failed"
                    );
                    tally.payout_errors += 1;
                    updates.push(InvestmentUpdate {
                        reference: investment.reference.clone(),
                        status: InvestmentStatus::PayoutError,
                        payout_reference: None,
                        last_error: Some(e.to_string()),
                    });
                }
            }
        }

        if updates.is_empty() {
            return Ok(tally);
        }
        let user = self.ledger.update_investments(user_id, &updates).await?;

        if tally.paid_out > 0 {
            self.notifications
                .send_notification(
                    user_id,
                    NotificationType::InvestmentsMatured {
                        count: tally.paid_out,
                        total: tally.total_paid,
                        balance: user.balance,
                    },
                )
                .await;
        }
        if tally.payout_errors > 0 {
            self.notifications
                .send_notification(
                    user_id,
                    NotificationType::InvestmentPayoutDelayed {
                        count: tally.payout_errors,
                    },
                )
                .await;
        }
        Ok(tally)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct MaturitySweepWorker {
    sweep: MaturitySweep,
    interval: Duration,
}

impl MaturitySweepWorker {
    pub fn new(sweep: MaturitySweep, interval: Duration) -> Self {
        Self { sweep, interval }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "maturity sweep worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("maturity sweep worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    let as_of = start_of_day(Utc::now());
                    if let Err(e) = self.sweep.run_sweep(as_of).await {
                        warn!(error = %e, "maturity sweep cycle failed");
                    }
                }
            }
        }

        info!("maturity sweep worker stopped");
    }
}
