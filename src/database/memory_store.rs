//! Process-local ledger store.
//!
//! Used when no `DATABASE_URL` is configured and by the test suites. One lock
//! guards every aggregate, so each trait method is trivially atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::error::{StoreError, StoreResult};
use super::ledger_store::{
    AppendOutcome, InvestmentUpdate, LedgerStore, OwnedTransaction, ReferrerSummary,
    TransitionOutcome, TransitionRequest,
};
use super::models::{
    merge_metadata, BankProfile, Investment, NewUser, Transaction, TransactionKind,
    TransactionStatus, TransitionDecision, User, UserId,
};

#[derive(Default)]
struct Ledger {
    users: HashMap<UserId, User>,
    /// reference -> owner, spanning every user
    references: HashMap<String, UserId>,
}

impl Ledger {
    fn user_mut(&mut self, user_id: UserId) -> StoreResult<&mut User> {
        self.users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))
    }

    fn resolve_owner(&self, reference: &str, hint: Option<UserId>) -> Option<UserId> {
        if let Some(hint) = hint {
            let owns = self
                .users
                .get(&hint)
                .map(|u| u.transaction(reference).is_some())
                .unwrap_or(false);
            if owns {
                return Some(hint);
            }
        }
        self.references.get(reference).copied()
    }
}

fn apply_delta(user: &mut User, delta: Decimal) -> StoreResult<()> {
    let next = user
        .balance
        .checked_add(delta)
        .ok_or(StoreError::AmountOutOfRange(delta))?;
    if next < Decimal::ZERO {
        return Err(StoreError::InsufficientBalance {
            available: user.balance,
            required: -delta,
        });
    }
    user.balance = next;
    Ok(())
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<Ledger>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn insert_user(&self, new_user: NewUser) -> StoreResult<User> {
        let mut ledger = self.inner.write().await;
        if ledger.users.contains_key(&new_user.telegram_id) {
            return Err(StoreError::Conflict(new_user.telegram_id));
        }
        let user = User::new(new_user);
        ledger.users.insert(user.telegram_id, user.clone());
        Ok(user)
    }

    async fn adjust_balance(&self, user_id: UserId, delta: Decimal) -> StoreResult<User> {
        let mut ledger = self.inner.write().await;
        let user = ledger.user_mut(user_id)?;
        apply_delta(user, delta)?;
        Ok(user.clone())
    }

    async fn append_transaction(
        &self,
        user_id: UserId,
        transaction: Transaction,
        balance_delta: Decimal,
    ) -> StoreResult<AppendOutcome> {
        let mut ledger = self.inner.write().await;
        if ledger.references.contains_key(&transaction.reference) {
            let user = ledger.user_mut(user_id)?;
            return Ok(AppendOutcome::Duplicate(user.clone()));
        }

        let reference = transaction.reference.clone();
        let user = ledger.user_mut(user_id)?;
        apply_delta(user, balance_delta)?;
        if transaction.kind == TransactionKind::ReferralBonus {
            user.referral_bonus_earned += transaction.amount;
        }
        user.transactions.push(transaction);
        let snapshot = user.clone();
        ledger.references.insert(reference, user_id);
        Ok(AppendOutcome::Inserted(snapshot))
    }

    async fn transition_transaction(
        &self,
        request: TransitionRequest,
    ) -> StoreResult<TransitionOutcome> {
        let mut ledger = self.inner.write().await;
        let owner = ledger
            .resolve_owner(&request.reference, request.identity_hint)
            .ok_or_else(|| StoreError::TransactionNotFound(request.reference.clone()))?;
        let user = ledger.user_mut(owner)?;

        let index = user
            .transactions
            .iter()
            .position(|t| t.reference == request.reference)
            .ok_or_else(|| StoreError::TransactionNotFound(request.reference.clone()))?;

        let current = user.transactions[index].status;
        match current.transition_to(request.new_status) {
            TransitionDecision::AlreadyInState => Ok(TransitionOutcome::AlreadyInState {
                transaction: user.transactions[index].clone(),
                user: user.clone(),
            }),
            TransitionDecision::Reject => Ok(TransitionOutcome::Rejected {
                transaction: user.transactions[index].clone(),
                user: user.clone(),
            }),
            TransitionDecision::Apply => {
                let delta = request.effect.delta_for(&user.transactions[index]);
                apply_delta(user, delta)?;

                let txn = &mut user.transactions[index];
                txn.status = request.new_status;
                merge_metadata(&mut txn.metadata, &request.metadata_patch);
                txn.updated_at = Utc::now();

                Ok(TransitionOutcome::Applied {
                    previous: current,
                    transaction: user.transactions[index].clone(),
                    user: user.clone(),
                })
            }
        }
    }

    async fn open_investment(
        &self,
        user_id: UserId,
        investment: Investment,
        transaction: Transaction,
    ) -> StoreResult<User> {
        let mut ledger = self.inner.write().await;
        let reference = transaction.reference.clone();
        let user = ledger.user_mut(user_id)?;
        apply_delta(user, -investment.principal)?;
        user.investments.push(investment);
        user.transactions.push(transaction);
        let snapshot = user.clone();
        ledger.references.insert(reference, user_id);
        Ok(snapshot)
    }

    async fn claim_welcome_bonus(
        &self,
        user_id: UserId,
        transaction: Transaction,
    ) -> StoreResult<Option<User>> {
        let mut ledger = self.inner.write().await;
        let reference = transaction.reference.clone();
        let user = ledger.user_mut(user_id)?;
        if user.welcome_bonus_claimed {
            return Ok(None);
        }
        user.welcome_bonus_claimed = true;
        user.balance += transaction.amount;
        user.transactions.push(transaction);
        let snapshot = user.clone();
        ledger.references.insert(reference, user_id);
        Ok(Some(snapshot))
    }

    async fn replace_bank_profile(
        &self,
        user_id: UserId,
        profile: Option<BankProfile>,
    ) -> StoreResult<User> {
        let mut ledger = self.inner.write().await;
        let user = ledger.user_mut(user_id)?;
        user.bank_profile = profile;
        Ok(user.clone())
    }

    async fn find_owner_of_reference(&self, reference: &str) -> StoreResult<Option<UserId>> {
        Ok(self.inner.read().await.references.get(reference).copied())
    }

    async fn users_with_matured_investments(
        &self,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Vec<UserId>> {
        let ledger = self.inner.read().await;
        let mut ids: Vec<UserId> = ledger
            .users
            .values()
            .filter(|u| u.investments.iter().any(|i| i.is_due(as_of)))
            .map(|u| u.telegram_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn update_investments(
        &self,
        user_id: UserId,
        updates: &[InvestmentUpdate],
    ) -> StoreResult<User> {
        let mut ledger = self.inner.write().await;
        let user = ledger.user_mut(user_id)?;
        for update in updates {
            if let Some(inv) = user
                .investments
                .iter_mut()
                .find(|i| i.reference == update.reference)
            {
                inv.status = update.status;
                if update.payout_reference.is_some() {
                    inv.payout_reference = update.payout_reference.clone();
                }
                inv.last_error = update.last_error.clone();
            }
        }
        Ok(user.clone())
    }

    async fn transactions_with_status(
        &self,
        kind: TransactionKind,
        status: TransactionStatus,
    ) -> StoreResult<Vec<OwnedTransaction>> {
        let ledger = self.inner.read().await;
        let mut found: Vec<OwnedTransaction> = ledger
            .users
            .values()
            .flat_map(|u| {
                u.transactions
                    .iter()
                    .filter(|t| t.kind == kind && t.status == status)
                    .map(|t| OwnedTransaction {
                        user_id: u.telegram_id,
                        transaction: t.clone(),
                    })
            })
            .collect();
        found.sort_by_key(|o| o.transaction.created_at);
        Ok(found)
    }

    async fn top_referrers(&self, limit: usize) -> StoreResult<Vec<ReferrerSummary>> {
        let ledger = self.inner.read().await;
        let mut counts: HashMap<UserId, i64> = HashMap::new();
        for user in ledger.users.values() {
            if let Some(referrer) = user.referrer_id {
                *counts.entry(referrer).or_default() += 1;
            }
        }

        let mut summaries: Vec<ReferrerSummary> = counts
            .into_iter()
            .filter_map(|(id, count)| {
                ledger.users.get(&id).map(|u| ReferrerSummary {
                    telegram_id: id,
                    first_name: u.first_name.clone(),
                    username: u.username.clone(),
                    referral_count: count,
                    referral_bonus_earned: u.referral_bonus_earned,
                })
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.referral_count
                .cmp(&a.referral_count)
                .then(a.telegram_id.cmp(&b.telegram_id))
        });
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn list_user_ids(&self) -> StoreResult<Vec<UserId>> {
        let mut ids: Vec<UserId> = self.inner.read().await.users.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn delete_user(&self, user_id: UserId) -> StoreResult<bool> {
        let mut ledger = self.inner.write().await;
        let removed = ledger.users.remove(&user_id).is_some();
        if removed {
            ledger.references.retain(|_, owner| *owner != user_id);
        }
        Ok(removed)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
