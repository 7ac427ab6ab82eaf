//! Ledger domain records: the User aggregate and the Transactions and
//! Investments it owns.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

/// Telegram user id; doubles as the private chat id.
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Investment,
    InvestmentPayout,
    ReferralBonus,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Investment => "investment",
            TransactionKind::InvestmentPayout => "investment_payout",
            TransactionKind::ReferralBonus => "referral_bonus",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    PendingManualReview,
    Declined,
}

/// What to do when asked to move a transaction into a new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    Apply,
    /// Same status re-delivered; nothing to do.
    AlreadyInState,
    /// Current status is terminal.
    Reject,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::PendingManualReview => "pending_manual_review",
            TransactionStatus::Declined => "declined",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Declined
        )
    }

    pub fn transition_to(&self, target: TransactionStatus) -> TransitionDecision {
        if *self == target {
            TransitionDecision::AlreadyInState
        } else if self.is_terminal() {
            TransitionDecision::Reject
        } else {
            TransitionDecision::Apply
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Active,
    PaidOut,
    PlanNotFound,
    PayoutError,
    Cancelled,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentStatus::Active => "active",
            InvestmentStatus::PaidOut => "paid_out",
            InvestmentStatus::PlanNotFound => "plan_not_found",
            InvestmentStatus::PayoutError => "payout_error",
            InvestmentStatus::Cancelled => "cancelled",
        }
    }

    /// `payout_error` stays eligible so the next sweep retries it.
    pub fn awaits_payout(&self) -> bool {
        matches!(self, InvestmentStatus::Active | InvestmentStatus::PayoutError)
    }
}

macro_rules! impl_status_text {
    ($ty:ty, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| format!("unknown {}: {}", stringify!($ty), s))
            }
        }
    };
}

impl_status_text!(
    TransactionKind,
    [
        TransactionKind::Deposit,
        TransactionKind::Withdrawal,
        TransactionKind::Investment,
        TransactionKind::InvestmentPayout,
        TransactionKind::ReferralBonus,
    ]
);
impl_status_text!(
    TransactionStatus,
    [
        TransactionStatus::Pending,
        TransactionStatus::Completed,
        TransactionStatus::Failed,
        TransactionStatus::PendingManualReview,
        TransactionStatus::Declined,
    ]
);
impl_status_text!(
    InvestmentStatus,
    [
        InvestmentStatus::Active,
        InvestmentStatus::PaidOut,
        InvestmentStatus::PlanNotFound,
        InvestmentStatus::PayoutError,
        InvestmentStatus::Cancelled,
    ]
);

/// A money movement owned by one user.
///
/// Amounts are positive except for `investment`, which records the principal
/// leaving the balance as a negative number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub reference: String,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        kind: TransactionKind,
        amount: Decimal,
        status: TransactionStatus,
        reference: impl Into<String>,
        metadata: JsonValue,
    ) -> Self {
        let now = Utc::now();
        Self {
            reference: reference.into(),
            kind,
            amount,
            status,
            metadata: normalize_metadata(metadata),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub reference: String,
    pub plan_id: String,
    pub principal: Decimal,
    pub start_date: DateTime<Utc>,
    pub maturity_date: DateTime<Utc>,
    pub projected_return: Decimal,
    pub status: InvestmentStatus,
    pub payout_reference: Option<String>,
    pub last_error: Option<String>,
}

impl Investment {
    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.status.awaits_payout() && self.maturity_date <= as_of
    }
}

/// Verified withdrawal destination. Stored whole or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankProfile {
    pub account_number: String,
    pub bank_code: String,
    pub bank_name: String,
    pub account_name: String,
    /// Provider transfer-recipient handle; absent when transfers are manual.
    pub recipient_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub telegram_id: UserId,
    pub first_name: Option<String>,
    pub username: Option<String>,
    pub balance: Decimal,
    pub bank_profile: Option<BankProfile>,
    pub referrer_id: Option<UserId>,
    pub referral_bonus_earned: Decimal,
    pub welcome_bonus_claimed: bool,
    pub created_at: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
    pub investments: Vec<Investment>,
}

impl User {
    pub fn new(new_user: NewUser) -> Self {
        Self {
            telegram_id: new_user.telegram_id,
            first_name: new_user.first_name,
            username: new_user.username,
            balance: Decimal::ZERO,
            bank_profile: None,
            referrer_id: new_user.referrer_id,
            referral_bonus_earned: Decimal::ZERO,
            welcome_bonus_claimed: false,
            created_at: Utc::now(),
            transactions: Vec::new(),
            investments: Vec::new(),
        }
    }

    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| self.telegram_id.to_string())
    }

    pub fn transaction(&self, reference: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.reference == reference)
    }

    pub fn investment(&self, reference: &str) -> Option<&Investment> {
        self.investments.iter().find(|i| i.reference == reference)
    }

    pub fn pending_deposits(&self) -> Decimal {
        self.transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::Deposit && t.status == TransactionStatus::Pending)
            .map(|t| t.amount)
            .sum()
    }

    pub fn active_investments(&self) -> impl Iterator<Item = &Investment> {
        self.investments
            .iter()
            .filter(|i| i.status == InvestmentStatus::Active)
    }
}

/// Fields supplied when a user first interacts with the bot.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub telegram_id: UserId,
    pub first_name: Option<String>,
    pub username: Option<String>,
    pub referrer_id: Option<UserId>,
}

/// Coerce metadata into a JSON object so patches can always be merged.
pub fn normalize_metadata(metadata: JsonValue) -> JsonValue {
    match metadata {
        JsonValue::Object(_) => metadata,
        JsonValue::Null => JsonValue::Object(Map::new()),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            JsonValue::Object(map)
        }
    }
}

/// Shallow merge, right side wins (same semantics as Postgres `jsonb || jsonb`).
pub fn merge_metadata(target: &mut JsonValue, patch: &JsonValue) {
    if !target.is_object() {
        *target = normalize_metadata(std::mem::take(target));
    }
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (k, v) in patch {
            target.insert(k.clone(), v.clone());
        }
    }
}
