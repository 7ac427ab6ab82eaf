//! Persistence contract for the ledger.
//!
//! Every method is one atomic unit against a single user aggregate: an
//! implementation must never expose a state where a balance change has been
//! applied without the transaction record that justifies it, or the reverse.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use super::error::StoreResult;
use super::models::{
    BankProfile, Investment, InvestmentStatus, NewUser, Transaction, TransactionKind,
    TransactionStatus, User, UserId,
};

#[derive(Debug, Clone)]
pub enum AppendOutcome {
    Inserted(User),
    /// Reference already recorded; nothing was written.
    Duplicate(User),
}

impl AppendOutcome {
    pub fn user(&self) -> &User {
        match self {
            AppendOutcome::Inserted(user) | AppendOutcome::Duplicate(user) => user,
        }
    }

    pub fn inserted(&self) -> bool {
        matches!(self, AppendOutcome::Inserted(_))
    }
}

/// Balance change applied together with a status transition, and only when
/// the transition itself applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BalanceEffect {
    None,
    Credit(Decimal),
    /// Return the transaction's own amount to the balance.
    RefundStoredAmount,
}

impl BalanceEffect {
    pub fn delta_for(&self, transaction: &Transaction) -> Decimal {
        match self {
            BalanceEffect::None => Decimal::ZERO,
            BalanceEffect::Credit(amount) => *amount,
            BalanceEffect::RefundStoredAmount => transaction.amount.abs(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub reference: String,
    pub identity_hint: Option<UserId>,
    pub new_status: TransactionStatus,
    pub metadata_patch: JsonValue,
    pub effect: BalanceEffect,
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied {
        user: User,
        previous: TransactionStatus,
        transaction: Transaction,
    },
    AlreadyInState {
        user: User,
        transaction: Transaction,
    },
    /// Transaction is in a terminal status different from the target.
    Rejected {
        user: User,
        transaction: Transaction,
    },
}

impl TransitionOutcome {
    pub fn user(&self) -> &User {
        match self {
            TransitionOutcome::Applied { user, .. }
            | TransitionOutcome::AlreadyInState { user, .. }
            | TransitionOutcome::Rejected { user, .. } => user,
        }
    }

    pub fn transaction(&self) -> &Transaction {
        match self {
            TransitionOutcome::Applied { transaction, .. }
            | TransitionOutcome::AlreadyInState { transaction, .. }
            | TransitionOutcome::Rejected { transaction, .. } => transaction,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone)]
pub struct InvestmentUpdate {
    pub reference: String,
    pub status: InvestmentStatus,
    pub payout_reference: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OwnedTransaction {
    pub user_id: UserId,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferrerSummary {
    pub telegram_id: UserId,
    pub first_name: Option<String>,
    pub username: Option<String>,
    pub referral_count: i64,
    pub referral_bonus_earned: Decimal,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<User>>;

    /// Fails with `StoreError::Conflict` when the identity already exists.
    async fn insert_user(&self, new_user: NewUser) -> StoreResult<User>;

    /// Atomic increment. A result below zero fails with `InsufficientBalance`.
    async fn adjust_balance(&self, user_id: UserId, delta: Decimal) -> StoreResult<User>;

    /// Insert `transaction` unless its reference already exists anywhere in the
    /// ledger; on insert also apply `balance_delta` (guarded against overdraft).
    /// Referral bonus inserts also raise the owner's cumulative bonus.
    async fn append_transaction(
        &self,
        user_id: UserId,
        transaction: Transaction,
        balance_delta: Decimal,
    ) -> StoreResult<AppendOutcome>;

    /// Fails with `TransactionNotFound` when no transaction matches.
    async fn transition_transaction(
        &self,
        request: TransitionRequest,
    ) -> StoreResult<TransitionOutcome>;

    /// Debit the principal, add the investment and its transaction.
    async fn open_investment(
        &self,
        user_id: UserId,
        investment: Investment,
        transaction: Transaction,
    ) -> StoreResult<User>;

    /// Credit and flag the welcome bonus; `None` when already claimed.
    async fn claim_welcome_bonus(
        &self,
        user_id: UserId,
        transaction: Transaction,
    ) -> StoreResult<Option<User>>;

    async fn replace_bank_profile(
        &self,
        user_id: UserId,
        profile: Option<BankProfile>,
    ) -> StoreResult<User>;

    async fn find_owner_of_reference(&self, reference: &str) -> StoreResult<Option<UserId>>;

    /// Users owning an investment awaiting payout with `maturity_date <= as_of`.
    async fn users_with_matured_investments(
        &self,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Vec<UserId>>;

    /// Persist status changes for several of one user's investments together.
    async fn update_investments(
        &self,
        user_id: UserId,
        updates: &[InvestmentUpdate],
    ) -> StoreResult<User>;

    async fn transactions_with_status(
        &self,
        kind: TransactionKind,
        status: TransactionStatus,
    ) -> StoreResult<Vec<OwnedTransaction>>;

    async fn top_referrers(&self, limit: usize) -> StoreResult<Vec<ReferrerSummary>>;

    async fn list_user_ids(&self) -> StoreResult<Vec<UserId>>;

    /// Returns whether a user was removed.
    async fn delete_user(&self, user_id: UserId) -> StoreResult<bool>;

    async fn health_check(&self) -> StoreResult<()>;
}
