//! Postgres-backed ledger store.
//!
//! Each mutating method runs in one database transaction and takes the
//! owning user row `FOR UPDATE` before touching its transactions, so lock
//! order is always user then transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::warn;

use super::error::{StoreError, StoreResult};
use super::ledger_store::{
    AppendOutcome, InvestmentUpdate, LedgerStore, OwnedTransaction, ReferrerSummary,
    TransitionOutcome, TransitionRequest,
};
use super::models::{
    normalize_metadata, BankProfile, Investment, NewUser, Transaction, TransactionKind,
    TransactionStatus, TransitionDecision, User, UserId,
};

// ----------------------------------------------------------------------------
// Rows
// ----------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct UserRow {
    telegram_id: i64,
    first_name: Option<String>,
    username: Option<String>,
    balance: Decimal,
    referrer_id: Option<i64>,
    referral_bonus_earned: Decimal,
    welcome_bonus_claimed: bool,
    bank_account_number: Option<String>,
    bank_code: Option<String>,
    bank_name: Option<String>,
    bank_account_name: Option<String>,
    recipient_code: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    user_id: i64,
    reference: String,
    kind: String,
    amount: Decimal,
    status: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct InvestmentRow {
    reference: String,
    plan_id: String,
    principal: Decimal,
    start_date: DateTime<Utc>,
    maturity_date: DateTime<Utc>,
    projected_return: Decimal,
    status: String,
    payout_reference: Option<String>,
    last_error: Option<String>,
}

impl TransactionRow {
    fn into_model(self) -> StoreResult<Transaction> {
        Ok(Transaction {
            reference: self.reference,
            kind: self.kind.parse().map_err(StoreError::Corrupt)?,
            amount: self.amount,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            metadata: normalize_metadata(self.metadata),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl InvestmentRow {
    fn into_model(self) -> StoreResult<Investment> {
        Ok(Investment {
            reference: self.reference,
            plan_id: self.plan_id,
            principal: self.principal,
            start_date: self.start_date,
            maturity_date: self.maturity_date,
            projected_return: self.projected_return,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            payout_reference: self.payout_reference,
            last_error: self.last_error,
        })
    }
}

impl UserRow {
    fn bank_profile(&self) -> Option<BankProfile> {
        match (
            &self.bank_account_number,
            &self.bank_code,
            &self.bank_name,
            &self.bank_account_name,
        ) {
            (Some(account_number), Some(bank_code), Some(bank_name), Some(account_name)) => {
                Some(BankProfile {
                    account_number: account_number.clone(),
                    bank_code: bank_code.clone(),
                    bank_name: bank_name.clone(),
                    account_name: account_name.clone(),
                    recipient_code: self.recipient_code.clone(),
                })
            }
            _ => None,
        }
    }
}

const USER_COLUMNS: &str = "telegram_id, first_name, username, balance, referrer_id, \
     referral_bonus_earned, welcome_bonus_claimed, bank_account_number, bank_code, \
     bank_name, bank_account_name, recipient_code, created_at";

const TRANSACTION_COLUMNS: &str =
    "user_id, reference, kind, amount, status, metadata, created_at, updated_at";

// ----------------------------------------------------------------------------
// Helpers shared by pool and transaction paths
// ----------------------------------------------------------------------------

async fn load_user(conn: &mut PgConnection, user_id: UserId) -> StoreResult<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users WHERE telegram_id = $1",
        USER_COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(StoreError::from_sqlx)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let transactions = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {} FROM transactions WHERE user_id = $1 ORDER BY created_at, reference",
        TRANSACTION_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(StoreError::from_sqlx)?
    .into_iter()
    .map(TransactionRow::into_model)
    .collect::<StoreResult<Vec<_>>>()?;

    let investments = sqlx::query_as::<_, InvestmentRow>(
        "SELECT reference, plan_id, principal, start_date, maturity_date, projected_return, \
         status, payout_reference, last_error \
         FROM investments WHERE user_id = $1 ORDER BY start_date, reference",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(StoreError::from_sqlx)?
    .into_iter()
    .map(InvestmentRow::into_model)
    .collect::<StoreResult<Vec<_>>>()?;

    Ok(Some(User {
        bank_profile: row.bank_profile(),
        telegram_id: row.telegram_id,
        first_name: row.first_name,
        username: row.username,
        balance: row.balance,
        referrer_id: row.referrer_id,
        referral_bonus_earned: row.referral_bonus_earned,
        welcome_bonus_claimed: row.welcome_bonus_claimed,
        created_at: row.created_at,
        transactions,
        investments,
    }))
}

async fn require_user(conn: &mut PgConnection, user_id: UserId) -> StoreResult<User> {
    load_user(conn, user_id)
        .await?
        .ok_or(StoreError::UserNotFound(user_id))
}

/// Lock the user row and return its balance.
async fn lock_balance(conn: &mut PgConnection, user_id: UserId) -> StoreResult<Decimal> {
    sqlx::query_scalar::<_, Decimal>(
        "SELECT balance FROM users WHERE telegram_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(StoreError::from_sqlx)?
    .ok_or(StoreError::UserNotFound(user_id))
}

fn guard_delta(balance: Decimal, delta: Decimal) -> StoreResult<()> {
    if balance + delta < Decimal::ZERO {
        return Err(StoreError::InsufficientBalance {
            available: balance,
            required: -delta,
        });
    }
    Ok(())
}

async fn add_to_balance(
    conn: &mut PgConnection,
    user_id: UserId,
    delta: Decimal,
) -> StoreResult<()> {
    if delta.is_zero() {
        return Ok(());
    }
    sqlx::query("UPDATE users SET balance = balance + $2 WHERE telegram_id = $1")
        .bind(user_id)
        .bind(delta)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::from_sqlx)?;
    Ok(())
}

/// Returns false when the reference already exists.
async fn insert_transaction(
    conn: &mut PgConnection,
    user_id: UserId,
    txn: &Transaction,
) -> StoreResult<bool> {
    let result = sqlx::query(
        "INSERT INTO transactions \
         (reference, user_id, kind, amount, status, metadata, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (reference) DO NOTHING",
    )
    .bind(&txn.reference)
    .bind(user_id)
    .bind(txn.kind.as_str())
    .bind(txn.amount)
    .bind(txn.status.as_str())
    .bind(&txn.metadata)
    .bind(txn.created_at)
    .bind(txn.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(StoreError::from_sqlx)?;
    Ok(result.rows_affected() == 1)
}

// ----------------------------------------------------------------------------
// Store
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<sqlx::pool::PoolConnection<sqlx::Postgres>> {
        self.pool.acquire().await.map_err(StoreError::from_sqlx)
    }

    async fn begin(&self) -> StoreResult<sqlx::Transaction<'static, sqlx::Postgres>> {
        self.pool.begin().await.map_err(StoreError::from_sqlx)
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let mut conn = self.conn().await?;
        load_user(&mut conn, user_id).await
    }

    async fn insert_user(&self, new_user: NewUser) -> StoreResult<User> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            "INSERT INTO users (telegram_id, first_name, username, referrer_id) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (telegram_id) DO NOTHING",
        )
        .bind(new_user.telegram_id)
        .bind(&new_user.first_name)
        .bind(&new_user.username)
        .bind(new_user.referrer_id)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(new_user.telegram_id));
        }
        let user = require_user(&mut tx, new_user.telegram_id).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(user)
    }

    async fn adjust_balance(&self, user_id: UserId, delta: Decimal) -> StoreResult<User> {
        let mut tx = self.begin().await?;
        let balance = lock_balance(&mut tx, user_id).await?;
        guard_delta(balance, delta)?;
        add_to_balance(&mut tx, user_id, delta).await?;
        let user = require_user(&mut tx, user_id).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(user)
    }

    async fn append_transaction(
        &self,
        user_id: UserId,
        transaction: Transaction,
        balance_delta: Decimal,
    ) -> StoreResult<AppendOutcome> {
        let mut tx = self.begin().await?;
        let balance = lock_balance(&mut tx, user_id).await?;

        if !insert_transaction(&mut tx, user_id, &transaction).await? {
            let user = require_user(&mut tx, user_id).await?;
            tx.rollback().await.map_err(StoreError::from_sqlx)?;
            return Ok(AppendOutcome::Duplicate(user));
        }

        guard_delta(balance, balance_delta)?;
        add_to_balance(&mut tx, user_id, balance_delta).await?;
        if transaction.kind == TransactionKind::ReferralBonus {
            sqlx::query(
                "UPDATE users SET referral_bonus_earned = referral_bonus_earned + $2 \
                 WHERE telegram_id = $1",
            )
            .bind(user_id)
            .bind(transaction.amount)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        }

        let user = require_user(&mut tx, user_id).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(AppendOutcome::Inserted(user))
    }

    async fn transition_transaction(
        &self,
        request: TransitionRequest,
    ) -> StoreResult<TransitionOutcome> {
        let mut tx = self.begin().await?;

        let owner = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM transactions WHERE reference = $1",
        )
        .bind(&request.reference)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?
        .ok_or_else(|| StoreError::TransactionNotFound(request.reference.clone()))?;

        if let Some(hint) = request.identity_hint {
            if hint != owner {
                warn!(
                    reference = %request.reference,
                    hint = hint,
                    owner = owner,
                    "identity hint does not own reference, using recorded owner"
                );
            }
        }

        let balance = lock_balance(&mut tx, owner).await?;
        let current = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE reference = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(&request.reference)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?
        .into_model()?;

        let decision = current.status.transition_to(request.new_status);
        if decision != TransitionDecision::Apply {
            let user = require_user(&mut tx, owner).await?;
            tx.rollback().await.map_err(StoreError::from_sqlx)?;
            return Ok(match decision {
                TransitionDecision::AlreadyInState => TransitionOutcome::AlreadyInState {
                    user,
                    transaction: current,
                },
                _ => TransitionOutcome::Rejected {
                    user,
                    transaction: current,
                },
            });
        }

        let delta = request.effect.delta_for(&current);
        guard_delta(balance, delta)?;

        let updated = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE transactions SET status = $2, metadata = metadata || $3, updated_at = NOW() \
             WHERE reference = $1 RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(&request.reference)
        .bind(request.new_status.as_str())
        .bind(normalize_metadata(request.metadata_patch.clone()))
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?
        .into_model()?;

        add_to_balance(&mut tx, owner, delta).await?;
        let user = require_user(&mut tx, owner).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;

        Ok(TransitionOutcome::Applied {
            user,
            previous: current.status,
            transaction: updated,
        })
    }

    async fn open_investment(
        &self,
        user_id: UserId,
        investment: Investment,
        transaction: Transaction,
    ) -> StoreResult<User> {
        let mut tx = self.begin().await?;
        let balance = lock_balance(&mut tx, user_id).await?;
        guard_delta(balance, -investment.principal)?;
        add_to_balance(&mut tx, user_id, -investment.principal).await?;

        sqlx::query(
            "INSERT INTO investments \
             (reference, user_id, plan_id, principal, start_date, maturity_date, \
              projected_return, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&investment.reference)
        .bind(user_id)
        .bind(&investment.plan_id)
        .bind(investment.principal)
        .bind(investment.start_date)
        .bind(investment.maturity_date)
        .bind(investment.projected_return)
        .bind(investment.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        if !insert_transaction(&mut tx, user_id, &transaction).await? {
            return Err(StoreError::Corrupt(format!(
                "investment reference {} already recorded",
                transaction.reference
            )));
        }

        let user = require_user(&mut tx, user_id).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(user)
    }

    async fn claim_welcome_bonus(
        &self,
        user_id: UserId,
        transaction: Transaction,
    ) -> StoreResult<Option<User>> {
        let mut tx = self.begin().await?;
        lock_balance(&mut tx, user_id).await?;

        let result = sqlx::query(
            "UPDATE users SET welcome_bonus_claimed = TRUE, balance = balance + $2 \
             WHERE telegram_id = $1 AND NOT welcome_bonus_claimed",
        )
        .bind(user_id)
        .bind(transaction.amount)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(StoreError::from_sqlx)?;
            return Ok(None);
        }

        insert_transaction(&mut tx, user_id, &transaction).await?;
        let user = require_user(&mut tx, user_id).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(Some(user))
    }

    async fn replace_bank_profile(
        &self,
        user_id: UserId,
        profile: Option<BankProfile>,
    ) -> StoreResult<User> {
        let mut tx = self.begin().await?;
        lock_balance(&mut tx, user_id).await?;

        let profile = profile.as_ref();
        sqlx::query(
            "UPDATE users SET bank_account_number = $2, bank_code = $3, bank_name = $4, \
             bank_account_name = $5, recipient_code = $6 WHERE telegram_id = $1",
        )
        .bind(user_id)
        .bind(profile.map(|p| p.account_number.as_str()))
        .bind(profile.map(|p| p.bank_code.as_str()))
        .bind(profile.map(|p| p.bank_name.as_str()))
        .bind(profile.map(|p| p.account_name.as_str()))
        .bind(profile.and_then(|p| p.recipient_code.as_deref()))
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        let user = require_user(&mut tx, user_id).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(user)
    }

    async fn find_owner_of_reference(&self, reference: &str) -> StoreResult<Option<UserId>> {
        sqlx::query_scalar::<_, i64>("SELECT user_id FROM transactions WHERE reference = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn users_with_matured_investments(
        &self,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Vec<UserId>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT user_id FROM investments \
             WHERE status IN ('active', 'payout_error') AND maturity_date <= $1 \
             ORDER BY user_id",
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn update_investments(
        &self,
        user_id: UserId,
        updates: &[InvestmentUpdate],
    ) -> StoreResult<User> {
        let mut tx = self.begin().await?;
        lock_balance(&mut tx, user_id).await?;

        for update in updates {
            sqlx::query(
                "UPDATE investments SET status = $3, \
                 payout_reference = COALESCE($4, payout_reference), last_error = $5 \
                 WHERE reference = $1 AND user_id = $2",
            )
            .bind(&update.reference)
            .bind(user_id)
            .bind(update.status.as_str())
            .bind(update.payout_reference.as_deref())
            .bind(update.last_error.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        }

        let user = require_user(&mut tx, user_id).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(user)
    }

    async fn transactions_with_status(
        &self,
        kind: TransactionKind,
        status: TransactionStatus,
    ) -> StoreResult<Vec<OwnedTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE kind = $1 AND status = $2 ORDER BY created_at",
            TRANSACTION_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.into_iter()
            .map(|row| {
                let user_id = row.user_id;
                row.into_model().map(|transaction| OwnedTransaction {
                    user_id,
                    transaction,
                })
            })
            .collect()
    }

    async fn top_referrers(&self, limit: usize) -> StoreResult<Vec<ReferrerSummary>> {
        let rows = sqlx::query_as::<_, (i64, Option<String>, Option<String>, i64, Decimal)>(
            "SELECT r.telegram_id, r.first_name, r.username, COUNT(u.telegram_id), \
                    r.referral_bonus_earned \
             FROM users u JOIN users r ON u.referrer_id = r.telegram_id \
             GROUP BY r.telegram_id \
             ORDER BY COUNT(u.telegram_id) DESC, r.telegram_id \
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(rows
            .into_iter()
            .map(
                |(telegram_id, first_name, username, referral_count, referral_bonus_earned)| {
                    ReferrerSummary {
                        telegram_id,
                        first_name,
                        username,
                        referral_count,
                        referral_bonus_earned,
                    }
                },
            )
            .collect())
    }

    async fn list_user_ids(&self) -> StoreResult<Vec<UserId>> {
        sqlx::query_scalar::<_, i64>("SELECT telegram_id FROM users ORDER BY telegram_id")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn delete_user(&self, user_id: UserId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE telegram_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }
}
