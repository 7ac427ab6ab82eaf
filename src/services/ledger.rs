//! Balance & transaction engine.
//!
//! Every money movement in the bot goes through [`LedgerService`]: user
//! commands, admin actions, payment webhooks and the maturity sweep. Effects
//! that originate from an asynchronous event are keyed by a stable reference
//! and applied at most once, relying on the store's duplicate-reference guard
//! and terminal-status guard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::database::error::StoreError;
use crate::database::ledger_store::{
    AppendOutcome, BalanceEffect, InvestmentUpdate, LedgerStore, OwnedTransaction,
    ReferrerSummary, TransitionOutcome, TransitionRequest,
};
use crate::database::models::{
    BankProfile, Investment, InvestmentStatus, NewUser, Transaction, TransactionKind,
    TransactionStatus, User, UserId,
};
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::payments::banks::validate_account_number;
use crate::services::investment_plans::find_plan;
use crate::services::reference::{self, ReferenceGenerator};

pub const WELCOME_BONUS: Decimal = Decimal::from_parts(200, 0, 0, false, 0);
pub const MIN_DEPOSIT: Decimal = Decimal::from_parts(1_000, 0, 0, false, 0);
pub const MIN_WITHDRAWAL: Decimal = Decimal::from_parts(1_500, 0, 0, false, 0);
/// Largest value a NUMERIC(18, 2) column holds: 9,999,999,999,999,999.99.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_808_348_671, 232_830_643, 0, false, 2);

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: String },

    #[error("bank profile is missing {0}")]
    IncompleteBankProfile(&'static str),

    #[error("invalid account number {account_number}: {reason}")]
    InvalidAccountNumber {
        account_number: String,
        reason: String,
    },

    #[error("no bank account linked")]
    NoBankProfile,

    #[error("investment plan {0} not found")]
    PlanNotFound(String),

    #[error("amount {amount} outside plan limits {min}-{max}")]
    OutsidePlanLimits {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("transaction {reference} is {status}")]
    NotActionable {
        reference: String,
        status: TransactionStatus,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

fn ensure_storable(amount: Decimal) -> LedgerResult<()> {
    if amount > MAX_AMOUNT {
        return Err(LedgerError::InvalidAmount {
            amount,
            reason: format!("maximum amount is {}", MAX_AMOUNT),
        });
    }
    Ok(())
}

impl LedgerError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount { .. }
                | LedgerError::IncompleteBankProfile(_)
                | LedgerError::InvalidAccountNumber { .. }
                | LedgerError::OutsidePlanLimits { .. }
                | LedgerError::Store(StoreError::InsufficientBalance { .. })
                | LedgerError::Store(StoreError::AmountOutOfRange(_))
        )
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let kind = match err {
            LedgerError::Store(store) => return store.into(),
            LedgerError::InvalidAmount { amount, reason } => {
                AppErrorKind::Validation(ValidationError::InvalidAmount {
                    amount: amount.to_string(),
                    reason,
                })
            }
            LedgerError::IncompleteBankProfile(field) => {
                AppErrorKind::Validation(ValidationError::MissingField {
                    field: field.to_string(),
                })
            }
            LedgerError::InvalidAccountNumber {
                account_number,
                reason,
            } => AppErrorKind::Validation(ValidationError::InvalidAccountNumber {
                account_number,
                reason,
            }),
            LedgerError::NoBankProfile => AppErrorKind::Validation(ValidationError::MissingField {
                field: "bank_profile".to_string(),
            }),
            LedgerError::PlanNotFound(plan_id) => {
                AppErrorKind::Domain(DomainError::PlanNotFound { plan_id })
            }
            LedgerError::OutsidePlanLimits { min, max, .. } => {
                AppErrorKind::Validation(ValidationError::OutOfRange {
                    field: "amount".to_string(),
                    min: Some(min.to_string()),
                    max: Some(max.to_string()),
                })
            }
            LedgerError::NotActionable { reference, status } => {
                AppErrorKind::Domain(DomainError::InvalidTransition {
                    reference,
                    from: status.to_string(),
                    to: "requested".to_string(),
                })
            }
        };
        AppError::new(kind)
    }
}

// ----------------------------------------------------------------------------
// Referral hook
// ----------------------------------------------------------------------------

/// Decides the bonus owed to a referrer when a referred user's deposit is
/// credited for the first time.
pub trait ReferralBonusPolicy: Send + Sync {
    fn bonus_for(&self, referee: &User, deposit_amount: Decimal) -> Option<Decimal>;
}

/// No bonus rule has been agreed yet.
pub struct NoReferralBonus;

impl ReferralBonusPolicy for NoReferralBonus {
    fn bonus_for(&self, _referee: &User, _deposit_amount: Decimal) -> Option<Decimal> {
        None
    }
}

// ----------------------------------------------------------------------------
// Inputs / outputs
// ----------------------------------------------------------------------------

/// Raw bank details collected from the user, before validation.
#[derive(Debug, Clone, Default)]
pub struct BankProfileInput {
    pub account_number: Option<String>,
    pub bank_code: Option<String>,
    pub bank_name: Option<String>,
    pub account_name: Option<String>,
    pub recipient_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalMode {
    /// Paystack transfer is initiated straight away.
    Automatic,
    /// An operator pays out by hand and approves or declines.
    ManualReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAdjustment {
    Add,
    Remove,
}

#[derive(Debug, Clone)]
pub enum DepositCredit {
    /// First time this reference was credited.
    Credited { user: User, amount: Decimal },
    AlreadyCredited { user: User },
    /// The deposit sits in another terminal status.
    Rejected { user: User, status: TransactionStatus },
}

impl DepositCredit {
    pub fn user(&self) -> &User {
        match self {
            DepositCredit::Credited { user, .. }
            | DepositCredit::AlreadyCredited { user }
            | DepositCredit::Rejected { user, .. } => user,
        }
    }
}

// ----------------------------------------------------------------------------
// Service
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    referral_policy: Arc<dyn ReferralBonusPolicy>,
    references: &'static ReferenceGenerator,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            referral_policy: Arc::new(NoReferralBonus),
            references: ReferenceGenerator::global(),
        }
    }

    pub fn with_referral_policy(mut self, policy: Arc<dyn ReferralBonusPolicy>) -> Self {
        self.referral_policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn new_reference(&self, kind_label: &str, user_id: UserId) -> String {
        self.references.generate(kind_label, user_id, Utc::now())
    }

    pub async fn get_user(&self, user_id: UserId) -> LedgerResult<Option<User>> {
        Ok(self.store.get_user(user_id).await?)
    }

    pub async fn require_user(&self, user_id: UserId) -> LedgerResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(LedgerError::Store(StoreError::UserNotFound(user_id)))
    }

    /// Existing user, or a new one with zero balance. A referrer is kept only
    /// when it exists and is not the user themself.
    pub async fn get_or_create_user(
        &self,
        user_id: UserId,
        first_name: Option<String>,
        username: Option<String>,
        referrer: Option<UserId>,
    ) -> LedgerResult<User> {
        if let Some(user) = self.store.get_user(user_id).await? {
            return Ok(user);
        }

        let referrer_id = match referrer {
            Some(r) if r == user_id => {
                info!(user_id = user_id, "ignoring self-referral");
                None
            }
            Some(r) => {
                if self.store.get_user(r).await?.is_some() {
                    Some(r)
                } else {
                    info!(user_id = user_id, referrer = r, "referrer does not exist");
                    None
                }
            }
            None => None,
        };

        match self
            .store
            .insert_user(NewUser {
                telegram_id: user_id,
                first_name,
                username,
                referrer_id,
            })
            .await
        {
            Ok(user) => {
                info!(user_id = user_id, referrer = ?referrer_id, "user created");
                Ok(user)
            }
            Err(StoreError::Conflict(_)) => {
                debug!(user_id = user_id, "lost create race, reading existing user");
                self.require_user(user_id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic increment; a debit that would overdraw fails with insufficient balance.
    pub async fn adjust_balance(&self, user_id: UserId, delta: Decimal) -> LedgerResult<User> {
        Ok(self.store.adjust_balance(user_id, delta).await?)
    }

    /// Append a record without touching the balance. A reference that already
    /// exists is logged and ignored.
    pub async fn record_transaction(
        &self,
        user_id: UserId,
        kind: TransactionKind,
        amount: Decimal,
        status: TransactionStatus,
        reference: &str,
        metadata: JsonValue,
    ) -> LedgerResult<AppendOutcome> {
        let txn = Transaction::new(kind, amount, status, reference, metadata);
        self.record_transaction_with_balance(user_id, txn, Decimal::ZERO)
            .await
    }

    /// Append a record and move the balance in one atomic step.
    pub async fn record_transaction_with_balance(
        &self,
        user_id: UserId,
        transaction: Transaction,
        balance_delta: Decimal,
    ) -> LedgerResult<AppendOutcome> {
        let reference = transaction.reference.clone();
        let outcome = self
            .store
            .append_transaction(user_id, transaction, balance_delta)
            .await?;
        if !outcome.inserted() {
            info!(
                user_id = user_id,
                reference = %reference,
                "duplicate transaction reference ignored"
            );
        }
        Ok(outcome)
    }

    /// Status change only; the balance is left alone.
    pub async fn transition_transaction(
        &self,
        reference: &str,
        new_status: TransactionStatus,
        identity_hint: Option<UserId>,
        metadata_patch: JsonValue,
    ) -> LedgerResult<TransitionOutcome> {
        self.transition_with_effect(TransitionRequest {
            reference: reference.to_string(),
            identity_hint,
            new_status,
            metadata_patch,
            effect: BalanceEffect::None,
        })
        .await
    }

    pub async fn transition_with_effect(
        &self,
        request: TransitionRequest,
    ) -> LedgerResult<TransitionOutcome> {
        let reference = request.reference.clone();
        let target = request.new_status;
        let outcome = self.store.transition_transaction(request).await?;
        match &outcome {
            TransitionOutcome::Applied { previous, .. } => info!(
                reference = %reference,
                from = %previous,
                to = %target,
                "transaction transitioned"
            ),
            TransitionOutcome::AlreadyInState { .. } => info!(
                reference = %reference,
                status = %target,
                "transaction already in requested status, skipping"
            ),
            TransitionOutcome::Rejected { transaction, .. } => warn!(
                reference = %reference,
                current = %transaction.status,
                requested = %target,
                "transaction is terminal, transition skipped"
            ),
        }
        Ok(outcome)
    }

    /// Replace the bank profile wholesale. Any missing required field rejects
    /// the whole input.
    pub async fn save_bank_profile(
        &self,
        user_id: UserId,
        input: BankProfileInput,
    ) -> LedgerResult<User> {
        let profile = validate_bank_profile(input)?;
        let user = self
            .store
            .replace_bank_profile(user_id, Some(profile))
            .await?;
        info!(user_id = user_id, "bank profile saved");
        Ok(user)
    }

    pub async fn clear_bank_profile(&self, user_id: UserId) -> LedgerResult<User> {
        Ok(self.store.replace_bank_profile(user_id, None).await?)
    }

    /// Remove the user and everything they own. Irreversible.
    pub async fn delete_user(&self, user_id: UserId) -> LedgerResult<bool> {
        let removed = self.store.delete_user(user_id).await?;
        if removed {
            warn!(user_id = user_id, "user aggregate deleted");
        }
        Ok(removed)
    }

    /// Credit the one-off welcome bonus. `None` when it was already claimed.
    pub async fn claim_welcome_bonus(&self, user_id: UserId) -> LedgerResult<Option<User>> {
        let txn = Transaction::new(
            TransactionKind::Deposit,
            WELCOME_BONUS,
            TransactionStatus::Completed,
            reference::welcome_bonus_reference(user_id),
            json!({"source": "welcome_bonus"}),
        );
        let claimed = self.store.claim_welcome_bonus(user_id, txn).await?;
        if claimed.is_some() {
            info!(user_id = user_id, amount = %WELCOME_BONUS, "welcome bonus credited");
        }
        Ok(claimed)
    }

    // ------------------------------------------------------------------
    // Deposits
    // ------------------------------------------------------------------

    /// Record a deposit the user is about to pay for.
    pub async fn record_pending_deposit(
        &self,
        user_id: UserId,
        reference: &str,
        amount: Decimal,
        metadata: JsonValue,
    ) -> LedgerResult<AppendOutcome> {
        if amount < MIN_DEPOSIT {
            return Err(LedgerError::InvalidAmount {
                amount,
                reason: format!("minimum deposit is {}", MIN_DEPOSIT),
            });
        }
        ensure_storable(amount)?;
        self.record_transaction(
            user_id,
            TransactionKind::Deposit,
            amount,
            TransactionStatus::Pending,
            reference,
            metadata,
        )
        .await
    }

    /// Credit a provider-confirmed deposit at most once. A reference the
    /// ledger has never seen is recorded as completed with the credit in the
    /// same step.
    pub async fn credit_deposit(
        &self,
        user_id: UserId,
        reference: &str,
        amount: Decimal,
        metadata_patch: JsonValue,
    ) -> LedgerResult<DepositCredit> {
        let request = TransitionRequest {
            reference: reference.to_string(),
            identity_hint: Some(user_id),
            new_status: TransactionStatus::Completed,
            metadata_patch: metadata_patch.clone(),
            effect: BalanceEffect::Credit(amount),
        };

        let outcome = match self.transition_with_effect(request.clone()).await {
            Ok(outcome) => outcome,
            Err(LedgerError::Store(StoreError::TransactionNotFound(_))) => {
                info!(
                    user_id = user_id,
                    reference = %reference,
                    "deposit not recorded locally, creating as completed"
                );
                let txn = Transaction::new(
                    TransactionKind::Deposit,
                    amount,
                    TransactionStatus::Completed,
                    reference,
                    metadata_patch,
                );
                match self
                    .record_transaction_with_balance(user_id, txn, amount)
                    .await?
                {
                    AppendOutcome::Inserted(user) => {
                        self.apply_referral_bonus(&user, reference, amount).await;
                        return Ok(DepositCredit::Credited { user, amount });
                    }
                    // Recorded concurrently by another writer; go through the guard.
                    AppendOutcome::Duplicate(_) => self.transition_with_effect(request).await?,
                }
            }
            Err(e) => return Err(e),
        };

        Ok(match outcome {
            TransitionOutcome::Applied {
                user, transaction, ..
            } => {
                if transaction.amount != amount {
                    warn!(
                        reference = %reference,
                        recorded = %transaction.amount,
                        confirmed = %amount,
                        "provider amount differs from recorded deposit, crediting provider amount"
                    );
                }
                self.apply_referral_bonus(&user, reference, amount).await;
                DepositCredit::Credited { user, amount }
            }
            TransitionOutcome::AlreadyInState { user, .. } => {
                DepositCredit::AlreadyCredited { user }
            }
            TransitionOutcome::Rejected { user, transaction } => DepositCredit::Rejected {
                user,
                status: transaction.status,
            },
        })
    }

    /// Mark a deposit failed without any balance change.
    pub async fn fail_deposit(
        &self,
        reference: &str,
        identity_hint: Option<UserId>,
        reason: &str,
    ) -> LedgerResult<TransitionOutcome> {
        self.transition_transaction(
            reference,
            TransactionStatus::Failed,
            identity_hint,
            json!({"failure_reason": reason}),
        )
        .await
    }

    async fn apply_referral_bonus(&self, referee: &User, deposit_reference: &str, amount: Decimal) {
        let Some(referrer_id) = referee.referrer_id else {
            return;
        };
        let Some(bonus) = self.referral_policy.bonus_for(referee, amount) else {
            return;
        };
        if bonus <= Decimal::ZERO {
            return;
        }

        let txn = Transaction::new(
            TransactionKind::ReferralBonus,
            bonus,
            TransactionStatus::Completed,
            reference::referral_reference(deposit_reference),
            json!({"referee_id": referee.telegram_id, "deposit_reference": deposit_reference}),
        );
        match self
            .record_transaction_with_balance(referrer_id, txn, bonus)
            .await
        {
            Ok(AppendOutcome::Inserted(_)) => info!(
                referrer_id = referrer_id,
                referee_id = referee.telegram_id,
                bonus = %bonus,
                "referral bonus credited"
            ),
            Ok(AppendOutcome::Duplicate(_)) => {}
            Err(e) => warn!(
                referrer_id = referrer_id,
                error = %e,
                "referral bonus could not be credited"
            ),
        }
    }

    // ------------------------------------------------------------------
    // Withdrawals
    // ------------------------------------------------------------------

    /// Debit the balance and record the pending withdrawal atomically.
    pub async fn begin_withdrawal(
        &self,
        user_id: UserId,
        amount: Decimal,
        mode: WithdrawalMode,
    ) -> LedgerResult<(User, Transaction)> {
        if amount < MIN_WITHDRAWAL {
            return Err(LedgerError::InvalidAmount {
                amount,
                reason: format!("minimum withdrawal is {}", MIN_WITHDRAWAL),
            });
        }
        ensure_storable(amount)?;
        let user = self.require_user(user_id).await?;
        let profile = user.bank_profile.as_ref().ok_or(LedgerError::NoBankProfile)?;
        if amount > user.balance {
            return Err(StoreError::InsufficientBalance {
                available: user.balance,
                required: amount,
            }
            .into());
        }

        let status = match mode {
            WithdrawalMode::Automatic => TransactionStatus::Pending,
            WithdrawalMode::ManualReview => TransactionStatus::PendingManualReview,
        };
        let reference = self.new_reference(TransactionKind::Withdrawal.as_str(), user_id);
        let txn = Transaction::new(
            TransactionKind::Withdrawal,
            amount,
            status,
            reference.clone(),
            json!({
                "account_number": profile.account_number,
                "bank_code": profile.bank_code,
                "bank_name": profile.bank_name,
                "account_name": profile.account_name,
            }),
        );

        let user = match self
            .record_transaction_with_balance(user_id, txn, -amount)
            .await?
        {
            AppendOutcome::Inserted(user) => user,
            AppendOutcome::Duplicate(_) => {
                return Err(LedgerError::Store(StoreError::Corrupt(format!(
                    "generated reference {} already exists",
                    reference
                ))))
            }
        };
        let txn = user
            .transaction(&reference)
            .cloned()
            .ok_or_else(|| LedgerError::Store(StoreError::TransactionNotFound(reference.clone())))?;
        info!(user_id = user_id, reference = %reference, amount = %amount, status = %status, "withdrawal initiated");
        Ok((user, txn))
    }

    /// Provider confirmed the transfer. The debit already happened.
    pub async fn complete_withdrawal(
        &self,
        reference: &str,
        identity_hint: Option<UserId>,
        metadata_patch: JsonValue,
    ) -> LedgerResult<TransitionOutcome> {
        self.transition_transaction(
            reference,
            TransactionStatus::Completed,
            identity_hint,
            metadata_patch,
        )
        .await
    }

    /// Mark the withdrawal failed and refund it, once.
    pub async fn fail_withdrawal(
        &self,
        reference: &str,
        identity_hint: Option<UserId>,
        reason: &str,
    ) -> LedgerResult<TransitionOutcome> {
        self.transition_with_effect(TransitionRequest {
            reference: reference.to_string(),
            identity_hint,
            new_status: TransactionStatus::Failed,
            metadata_patch: json!({"failure_reason": reason}),
            effect: BalanceEffect::RefundStoredAmount,
        })
        .await
    }

    pub async fn pending_manual_withdrawals(&self) -> LedgerResult<Vec<OwnedTransaction>> {
        Ok(self
            .store
            .transactions_with_status(
                TransactionKind::Withdrawal,
                TransactionStatus::PendingManualReview,
            )
            .await?)
    }

    pub async fn approve_withdrawal(
        &self,
        reference: &str,
        admin_id: UserId,
    ) -> LedgerResult<TransitionOutcome> {
        let outcome = self
            .transition_transaction(
                reference,
                TransactionStatus::Completed,
                reference::owner_of(reference),
                json!({"approved_by": admin_id, "approved_at": Utc::now()}),
            )
            .await?;
        require_applied(outcome)
    }

    /// Decline a manual withdrawal and refund its amount exactly once.
    pub async fn decline_withdrawal(
        &self,
        reference: &str,
        admin_id: UserId,
        reason: &str,
    ) -> LedgerResult<TransitionOutcome> {
        let outcome = self
            .transition_with_effect(TransitionRequest {
                reference: reference.to_string(),
                identity_hint: reference::owner_of(reference),
                new_status: TransactionStatus::Declined,
                metadata_patch: json!({
                    "declined_by": admin_id,
                    "decline_reason": reason,
                    "declined_at": Utc::now(),
                }),
                effect: BalanceEffect::RefundStoredAmount,
            })
            .await?;
        require_applied(outcome)
    }

    // ------------------------------------------------------------------
    // Admin balance changes
    // ------------------------------------------------------------------

    /// Admin credit or debit, recorded as a completed deposit or withdrawal.
    pub async fn admin_adjust(
        &self,
        admin_id: UserId,
        target: UserId,
        amount: Decimal,
        direction: AdminAdjustment,
    ) -> LedgerResult<User> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount,
                reason: "amount must be positive".to_string(),
            });
        }
        ensure_storable(amount)?;
        let (kind, source, delta) = match direction {
            AdminAdjustment::Add => (TransactionKind::Deposit, "admin_add", amount),
            AdminAdjustment::Remove => (TransactionKind::Withdrawal, "admin_remove", -amount),
        };
        let reference = self.new_reference(kind.as_str(), target);
        let txn = Transaction::new(
            kind,
            amount,
            TransactionStatus::Completed,
            reference.clone(),
            json!({"source": source, "admin_id": admin_id}),
        );
        let outcome = self
            .record_transaction_with_balance(target, txn, delta)
            .await?;
        info!(
            admin_id = admin_id,
            target = target,
            amount = %amount,
            source = source,
            reference = %reference,
            "admin balance adjustment"
        );
        Ok(outcome.user().clone())
    }

    // ------------------------------------------------------------------
    // Investments
    // ------------------------------------------------------------------

    /// Debit the principal and open an active investment in one step.
    pub async fn open_investment(
        &self,
        user_id: UserId,
        plan_id: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> LedgerResult<(User, Investment)> {
        let plan = find_plan(plan_id).ok_or_else(|| LedgerError::PlanNotFound(plan_id.to_string()))?;
        if !plan.accepts(amount) {
            return Err(LedgerError::OutsidePlanLimits {
                amount,
                min: plan.min_amount,
                max: plan.max_amount,
            });
        }

        let reference = self
            .references
            .generate(TransactionKind::Investment.as_str(), user_id, now);
        let investment = Investment {
            reference: reference.clone(),
            plan_id: plan.id.to_string(),
            principal: amount,
            start_date: now,
            maturity_date: plan.maturity_date(now),
            projected_return: plan.projected_return(amount),
            status: InvestmentStatus::Active,
            payout_reference: None,
            last_error: None,
        };
        let txn = Transaction::new(
            TransactionKind::Investment,
            -amount,
            TransactionStatus::Completed,
            reference.clone(),
            json!({
                "plan_id": plan.id,
                "plan_name": plan.name,
                "projected_return": investment.projected_return,
                "maturity_date": investment.maturity_date,
            }),
        );

        let user = self
            .store
            .open_investment(user_id, investment.clone(), txn)
            .await?;
        info!(
            user_id = user_id,
            reference = %reference,
            plan = plan.id,
            principal = %amount,
            projected_return = %investment.projected_return,
            "investment opened"
        );
        Ok((user, investment))
    }

    /// Record the payout for a matured investment. The derived payout
    /// reference makes repeated calls for the same investment harmless.
    pub async fn pay_out_investment(
        &self,
        user_id: UserId,
        investment: &Investment,
    ) -> LedgerResult<AppendOutcome> {
        let txn = Transaction::new(
            TransactionKind::InvestmentPayout,
            investment.projected_return,
            TransactionStatus::Completed,
            reference::payout_reference(&investment.reference),
            json!({
                "investment_reference": investment.reference,
                "plan_id": investment.plan_id,
                "principal": investment.principal,
            }),
        );
        self.record_transaction_with_balance(user_id, txn, investment.projected_return)
            .await
    }

    pub async fn users_with_matured_investments(
        &self,
        as_of: DateTime<Utc>,
    ) -> LedgerResult<Vec<UserId>> {
        Ok(self.store.users_with_matured_investments(as_of).await?)
    }

    pub async fn update_investments(
        &self,
        user_id: UserId,
        updates: &[InvestmentUpdate],
    ) -> LedgerResult<User> {
        Ok(self.store.update_investments(user_id, updates).await?)
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub async fn top_referrers(&self, limit: usize) -> LedgerResult<Vec<ReferrerSummary>> {
        Ok(self.store.top_referrers(limit).await?)
    }

    pub async fn list_user_ids(&self) -> LedgerResult<Vec<UserId>> {
        Ok(self.store.list_user_ids().await?)
    }

    pub async fn find_owner_of_reference(&self, reference: &str) -> LedgerResult<Option<UserId>> {
        Ok(self.store.find_owner_of_reference(reference).await?)
    }
}

fn require_applied(outcome: TransitionOutcome) -> LedgerResult<TransitionOutcome> {
    match outcome {
        TransitionOutcome::Applied { .. } => Ok(outcome),
        TransitionOutcome::AlreadyInState { transaction, .. }
        | TransitionOutcome::Rejected { transaction, .. } => Err(LedgerError::NotActionable {
            reference: transaction.reference,
            status: transaction.status,
        }),
    }
}

fn required(value: Option<String>, field: &'static str) -> LedgerResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(LedgerError::IncompleteBankProfile(field))
}

pub fn validate_bank_profile(input: BankProfileInput) -> LedgerResult<BankProfile> {
    let account_number = required(input.account_number, "account_number")?;
    let bank_code = required(input.bank_code, "bank_code")?;
    let bank_name = required(input.bank_name, "bank_name")?;
    let account_name = required(input.account_name, "account_name")?;

    validate_account_number(&account_number, &bank_code).map_err(|reason| {
        LedgerError::InvalidAccountNumber {
            account_number: account_number.clone(),
            reason,
        }
    })?;

    Ok(BankProfile {
        account_number,
        bank_code,
        bank_name,
        account_name,
        recipient_code: input
            .recipient_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
    })
}
