use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::payments::error::PaymentError;

/// Kobo per naira.
pub const MINOR_UNIT_FACTOR: i64 = 100;

/// Naira to kobo. Fractions of a kobo are rejected.
pub fn to_minor_units(amount: Decimal) -> Result<i64, PaymentError> {
    let minor = amount
        .checked_mul(Decimal::from(MINOR_UNIT_FACTOR))
        .ok_or_else(|| PaymentError::ValidationError {
            message: format!("amount {} is out of range", amount),
            field: Some("amount".to_string()),
        })?;
    if minor.fract() != Decimal::ZERO {
        return Err(PaymentError::ValidationError {
            message: format!("amount {} has more than two decimal places", amount),
            field: Some("amount".to_string()),
        });
    }
    minor.to_i64().ok_or_else(|| PaymentError::ValidationError {
        message: format!("amount {} is out of range", amount),
        field: Some("amount".to_string()),
    })
}

/// Kobo to naira.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Success,
    Pending,
    Failed,
    Abandoned,
    Reversed,
    Unknown,
}

impl ChargeStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "success" => ChargeStatus::Success,
            "pending" | "ongoing" | "processing" => ChargeStatus::Pending,
            "failed" => ChargeStatus::Failed,
            "abandoned" => ChargeStatus::Abandoned,
            "reversed" => ChargeStatus::Reversed,
            _ => ChargeStatus::Unknown,
        }
    }

    /// The charge will never succeed.
    pub fn is_final_failure(&self) -> bool {
        matches!(
            self,
            ChargeStatus::Failed | ChargeStatus::Abandoned | ChargeStatus::Reversed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Success,
    Pending,
    Otp,
    Failed,
    Reversed,
    Unknown,
}

impl TransferStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "success" => TransferStatus::Success,
            "pending" | "received" | "processing" => TransferStatus::Pending,
            "otp" => TransferStatus::Otp,
            "failed" | "abandoned" | "blocked" | "rejected" => TransferStatus::Failed,
            "reversed" => TransferStatus::Reversed,
            _ => TransferStatus::Unknown,
        }
    }

    /// Provider refused the transfer outright.
    pub fn is_rejected(&self) -> bool {
        matches!(self, TransferStatus::Failed | TransferStatus::Reversed)
    }
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub email: String,
    pub amount: Decimal,
    pub reference: String,
    pub callback_url: Option<String>,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeSession {
    pub reference: String,
    pub authorization_url: String,
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeVerification {
    pub reference: String,
    pub status: ChargeStatus,
    /// Canonical amount in naira.
    pub amount: Decimal,
    pub channel: Option<String>,
    pub gateway_response: Option<String>,
    pub paid_at: Option<String>,
}

impl ChargeVerification {
    pub fn succeeded(&self) -> bool {
        self.status == ChargeStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAccount {
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, Clone)]
pub struct RecipientRequest {
    pub name: String,
    pub account_number: String,
    pub bank_code: String,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub recipient_code: String,
    pub amount: Decimal,
    pub reference: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferReceipt {
    pub reference: String,
    pub transfer_code: Option<String>,
    pub status: TransferStatus,
}
