//! Transaction and investment references.
//!
//! Format: `<KIND>-<user id>-<unix millis>`, where `KIND` is the first three
//! letters of the kind label upper-cased (`DEP`, `WIT`, `INV`). Derived
//! references tie follow-up records to the record that caused them.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

use crate::database::models::UserId;

pub struct ReferenceGenerator {
    last_millis: AtomicI64,
}

static PROCESS_GENERATOR: ReferenceGenerator = ReferenceGenerator::new();

impl ReferenceGenerator {
    pub const fn new() -> Self {
        Self {
            last_millis: AtomicI64::new(0),
        }
    }

    /// Process-wide generator shared by every flow.
    pub fn global() -> &'static ReferenceGenerator {
        &PROCESS_GENERATOR
    }

    /// Two calls in the same millisecond get consecutive timestamps.
    pub fn generate(&self, kind_label: &str, user_id: UserId, now: DateTime<Utc>) -> String {
        let wanted = now.timestamp_millis();
        let stamp = match self
            .last_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wanted.max(last + 1))
            }) {
            Ok(last) | Err(last) => wanted.max(last + 1),
        };
        format!("{}-{}-{}", kind_prefix(kind_label), user_id, stamp)
    }
}

impl Default for ReferenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_prefix(kind_label: &str) -> String {
    kind_label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(3)
        .collect::<String>()
        .to_uppercase()
}

/// Owner encoded in a generated reference, if it parses.
pub fn owner_of(reference: &str) -> Option<UserId> {
    let mut parts = reference.splitn(3, '-');
    let kind = parts.next()?;
    if kind.is_empty()
        || kind.len() > 3
        || !kind.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return None;
    }
    let owner = parts.next()?;
    parts.next()?;
    owner.parse().ok()
}

pub fn payout_reference(investment_reference: &str) -> String {
    format!("payout_{}", investment_reference)
}

pub fn welcome_bonus_reference(user_id: UserId) -> String {
    format!("welcome_bonus_{}", user_id)
}

pub fn referral_reference(deposit_reference: &str) -> String {
    format!("referral_{}", deposit_reference)
}
