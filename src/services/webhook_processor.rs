//! Paystack event reconciliation.
//!
//! Events are verified against the raw body, parsed into a closed set of
//! kinds and applied to the ledger through the status-transition guard, so a
//! redelivered event never moves money twice.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::error::StoreError;
use crate::database::ledger_store::TransitionOutcome;
use crate::database::models::{TransactionStatus, UserId};
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::payments::error::PaymentError;
use crate::payments::provider::PaymentGateway;
use crate::services::ledger::{DepositCredit, LedgerError, LedgerService};
use crate::services::notification::{NotificationService, NotificationType};
use crate::services::reference;

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("No user could be resolved for reference {0}")]
    UnknownOwner(String),

    #[error("Charge verification failed: {0}")]
    Verification(#[from] PaymentError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        match err {
            WebhookProcessorError::InvalidSignature => {
                AppError::unauthorized("invalid webhook signature")
            }
            WebhookProcessorError::MalformedPayload(message) => {
                AppError::new(AppErrorKind::Validation(
                    crate::error::ValidationError::MissingField { field: message },
                ))
            }
            WebhookProcessorError::UnknownOwner(reference) => {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    reference,
                }))
            }
            WebhookProcessorError::Verification(e) => e.into(),
            WebhookProcessorError::Ledger(e) => e.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeEventData {
    pub reference: String,
    pub amount_minor: Option<i64>,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferEventData {
    pub reference: String,
    pub amount_minor: Option<i64>,
    pub transfer_code: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaystackEvent {
    ChargeSuccess(ChargeEventData),
    TransferSuccess(TransferEventData),
    TransferFailed(TransferEventData),
    TransferReversed(TransferEventData),
    Unrecognized(String),
}

#[derive(Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    data: JsonValue,
}

impl PaystackEvent {
    pub fn parse(raw: &[u8]) -> Result<Self, WebhookProcessorError> {
        let raw: RawEvent = serde_json::from_slice(raw)
            .map_err(|e| WebhookProcessorError::MalformedPayload(e.to_string()))?;

        let event = match raw.event.as_str() {
            "charge.success" => PaystackEvent::ChargeSuccess(ChargeEventData {
                reference: required_reference(&raw.data)?,
                amount_minor: raw.data.get("amount").and_then(JsonValue::as_i64),
                metadata: metadata_object(raw.data.get("metadata")),
            }),
            "transfer.success" => PaystackEvent::TransferSuccess(transfer_data(&raw.data)?),
            "transfer.failed" => PaystackEvent::TransferFailed(transfer_data(&raw.data)?),
            "transfer.reversed" => PaystackEvent::TransferReversed(transfer_data(&raw.data)?),
            _ => PaystackEvent::Unrecognized(raw.event),
        };
        Ok(event)
    }

    pub fn kind(&self) -> &str {
        match self {
            PaystackEvent::ChargeSuccess(_) => "charge.success",
            PaystackEvent::TransferSuccess(_) => "transfer.success",
            PaystackEvent::TransferFailed(_) => "transfer.failed",
            PaystackEvent::TransferReversed(_) => "transfer.reversed",
            PaystackEvent::Unrecognized(kind) => kind,
        }
    }
}

fn required_reference(data: &JsonValue) -> Result<String, WebhookProcessorError> {
    data.get("reference")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .ok_or_else(|| WebhookProcessorError::MalformedPayload("data.reference".to_string()))
}

fn transfer_data(data: &JsonValue) -> Result<TransferEventData, WebhookProcessorError> {
    Ok(TransferEventData {
        reference: required_reference(data)?,
        amount_minor: data.get("amount").and_then(JsonValue::as_i64),
        transfer_code: data
            .get("transfer_code")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        reason: failure_reason(data),
    })
}

/// `data.reason` is the narration sent with the transfer, not why it failed.
fn failure_reason(data: &JsonValue) -> Option<String> {
    let failures = match data.get("failures") {
        Some(JsonValue::Array(items)) => {
            let joined = items
                .iter()
                .filter_map(|item| match item {
                    JsonValue::String(s) => Some(s.trim().to_string()),
                    JsonValue::Object(obj) => obj
                        .get("message")
                        .and_then(JsonValue::as_str)
                        .map(|s| s.trim().to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", ");
            Some(joined)
        }
        Some(JsonValue::String(s)) => Some(s.trim().to_string()),
        _ => None,
    };
    failures.filter(|s| !s.is_empty()).or_else(|| {
        data.get("gateway_response")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Paystack sometimes delivers metadata as a JSON-encoded string.
fn metadata_object(value: Option<&JsonValue>) -> JsonValue {
    match value {
        Some(JsonValue::Object(_)) => value.cloned().unwrap_or(JsonValue::Null),
        Some(JsonValue::String(s)) => serde_json::from_str(s).unwrap_or(JsonValue::Null),
        _ => JsonValue::Null,
    }
}

/// Owner id from charge metadata, accepting the key spellings clients use.
pub fn metadata_user_id(metadata: &JsonValue) -> Option<UserId> {
    ["user_id", "userId", "telegram_id", "telegramId"]
        .iter()
        .filter_map(|key| metadata.get(*key))
        .find_map(|value| match value {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        })
}

// ----------------------------------------------------------------------------
// Processing
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    DepositCredited { user_id: UserId, amount: Decimal },
    DepositAlreadySettled { user_id: UserId },
    DepositFailed { user_id: Option<UserId> },
    /// Verification has not settled yet; the deposit stays pending.
    DepositUnsettled { user_id: Option<UserId> },
    WithdrawalCompleted { user_id: UserId },
    WithdrawalRefunded { user_id: UserId, amount: Decimal },
    WithdrawalAlreadySettled { user_id: UserId },
    /// A completed transfer was later reversed; needs a human.
    ReversalAfterCompletion { user_id: UserId },
    UnknownReference,
    Ignored,
}

pub struct WebhookProcessor {
    ledger: LedgerService,
    gateway: Arc<dyn PaymentGateway>,
    notifications: NotificationService,
}

impl WebhookProcessor {
    pub fn new(
        ledger: LedgerService,
        gateway: Arc<dyn PaymentGateway>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            ledger,
            gateway,
            notifications,
        }
    }

    pub fn verify(&self, raw: &[u8], signature: Option<&str>) -> Result<(), WebhookProcessorError> {
        match signature {
            Some(sig) if !sig.trim().is_empty() && self.gateway.verify_signature(raw, sig) => Ok(()),
            _ => Err(WebhookProcessorError::InvalidSignature),
        }
    }

    pub async fn process(
        &self,
        event: PaystackEvent,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        info!(event = event.kind(), "processing paystack event");
        match event {
            PaystackEvent::ChargeSuccess(data) => self.handle_charge(data).await,
            PaystackEvent::TransferSuccess(data) => self.handle_transfer_success(data).await,
            PaystackEvent::TransferFailed(data) => {
                self.handle_transfer_failure(data, "transfer failed").await
            }
            PaystackEvent::TransferReversed(data) => {
                self.handle_transfer_failure(data, "transfer reversed").await
            }
            PaystackEvent::Unrecognized(kind) => {
                info!(event = %kind, "ignoring unrecognized paystack event");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn resolve_owner(&self, reference: &str, metadata: &JsonValue) -> Option<UserId> {
        if let Some(id) = metadata_user_id(metadata) {
            return Some(id);
        }
        if let Some(id) = reference::owner_of(reference) {
            return Some(id);
        }
        match self.ledger.find_owner_of_reference(reference).await {
            Ok(owner) => owner,
            Err(e) => {
                warn!(reference = %reference, error = %e, "owner lookup failed");
                None
            }
        }
    }

    async fn handle_charge(
        &self,
        data: ChargeEventData,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let reference = data.reference.as_str();
        let owner = self.resolve_owner(reference, &data.metadata).await;

        // The event body is only a hint; the verify call is authoritative.
        let verification = self.gateway.verify_charge(reference).await.map_err(|e| {
            error!(reference = %reference, error = %e, "charge re-verification failed");
            e
        })?;

        if !verification.succeeded() && !verification.status.is_final_failure() {
            info!(
                reference = %reference,
                status = ?verification.status,
                "charge not settled yet, leaving deposit pending"
            );
            return Ok(WebhookOutcome::DepositUnsettled { user_id: owner });
        }

        if !verification.succeeded() {
            let reason = verification
                .gateway_response
                .clone()
                .unwrap_or_else(|| format!("verification status {:?}", verification.status));
            warn!(reference = %reference, reason = %reason, "charge did not verify as successful");

            match self.ledger.fail_deposit(reference, owner, &reason).await {
                Ok(outcome) => {
                    let user_id = outcome.user().telegram_id;
                    if outcome.applied() {
                        self.notifications
                            .send_notification(
                                user_id,
                                NotificationType::DepositFailed {
                                    reference: reference.to_string(),
                                },
                            )
                            .await;
                    }
                    return Ok(WebhookOutcome::DepositFailed {
                        user_id: Some(user_id),
                    });
                }
                Err(LedgerError::Store(StoreError::TransactionNotFound(_))) => {
                    if let Some(user_id) = owner {
                        self.notifications
                            .send_notification(
                                user_id,
                                NotificationType::DepositFailed {
                                    reference: reference.to_string(),
                                },
                            )
                            .await;
                    }
                    return Ok(WebhookOutcome::DepositFailed { user_id: owner });
                }
                Err(e) => return Err(e.into()),
            }
        }

        let user_id = owner.ok_or_else(|| WebhookProcessorError::UnknownOwner(reference.to_string()))?;
        let patch = json!({
            "paystack_status": "success",
            "channel": verification.channel,
            "paid_at": verification.paid_at,
            "gateway_response": verification.gateway_response,
        });

        match self
            .ledger
            .credit_deposit(user_id, reference, verification.amount, patch)
            .await?
        {
            DepositCredit::Credited { user, amount } => {
                info!(user_id, reference = %reference, amount = %amount, "deposit credited");
                self.notifications
                    .send_notification(
                        user_id,
                        NotificationType::DepositCredited {
                            amount,
                            balance: user.balance,
                        },
                    )
                    .await;
                Ok(WebhookOutcome::DepositCredited { user_id, amount })
            }
            DepositCredit::AlreadyCredited { .. } => {
                info!(user_id, reference = %reference, "deposit already credited, skipping");
                Ok(WebhookOutcome::DepositAlreadySettled { user_id })
            }
            DepositCredit::Rejected { status, .. } => {
                warn!(
                    user_id,
                    reference = %reference,
                    status = %status,
                    "charge success for a deposit in a terminal status, not credited"
                );
                Ok(WebhookOutcome::DepositAlreadySettled { user_id })
            }
        }
    }

    async fn handle_transfer_success(
        &self,
        data: TransferEventData,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let hint = reference::owner_of(&data.reference);
        let patch = json!({
            "transfer_code": data.transfer_code,
            "paystack_status": "success",
        });
        let outcome = match self
            .ledger
            .complete_withdrawal(&data.reference, hint, patch)
            .await
        {
            Ok(outcome) => outcome,
            Err(LedgerError::Store(StoreError::TransactionNotFound(_))) => {
                warn!(reference = %data.reference, "transfer success for unknown withdrawal, dropping");
                return Ok(WebhookOutcome::UnknownReference);
            }
            Err(e) => return Err(e.into()),
        };

        let user_id = outcome.user().telegram_id;
        match outcome {
            TransitionOutcome::Applied { transaction, .. } => {
                self.notifications
                    .send_notification(
                        user_id,
                        NotificationType::WithdrawalCompleted {
                            amount: transaction.amount.abs(),
                        },
                    )
                    .await;
                Ok(WebhookOutcome::WithdrawalCompleted { user_id })
            }
            TransitionOutcome::AlreadyInState { .. } => {
                info!(reference = %data.reference, "withdrawal already completed, skipping");
                Ok(WebhookOutcome::WithdrawalAlreadySettled { user_id })
            }
            TransitionOutcome::Rejected { transaction, .. } => {
                warn!(
                    reference = %data.reference,
                    status = %transaction.status,
                    "transfer success for a withdrawal in a terminal status"
                );
                Ok(WebhookOutcome::WithdrawalAlreadySettled { user_id })
            }
        }
    }

    async fn handle_transfer_failure(
        &self,
        data: TransferEventData,
        default_reason: &str,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let hint = reference::owner_of(&data.reference);
        let reason = data.reason.as_deref().unwrap_or(default_reason);
        let outcome = match self
            .ledger
            .fail_withdrawal(&data.reference, hint, reason)
            .await
        {
            Ok(outcome) => outcome,
            Err(LedgerError::Store(StoreError::TransactionNotFound(_))) => {
                warn!(reference = %data.reference, "transfer failure for unknown withdrawal, dropping");
                return Ok(WebhookOutcome::UnknownReference);
            }
            Err(e) => return Err(e.into()),
        };

        let user_id = outcome.user().telegram_id;
        match outcome {
            TransitionOutcome::Applied { transaction, .. } => {
                let amount = transaction.amount.abs();
                info!(user_id, reference = %data.reference, amount = %amount, "withdrawal refunded");
                self.notifications
                    .send_notification(
                        user_id,
                        NotificationType::WithdrawalFailed {
                            amount,
                            reason: reason.to_string(),
                        },
                    )
                    .await;
                Ok(WebhookOutcome::WithdrawalRefunded { user_id, amount })
            }
            TransitionOutcome::AlreadyInState { .. } => {
                info!(reference = %data.reference, "withdrawal already failed, skipping refund");
                Ok(WebhookOutcome::WithdrawalAlreadySettled { user_id })
            }
            TransitionOutcome::Rejected { transaction, .. } => {
                if transaction.status == TransactionStatus::Completed {
                    error!(
                        user_id,
                        reference = %data.reference,
                        reason = %reason,
                        "transfer reversed after completion, manual follow-up required"
                    );
                    Ok(WebhookOutcome::ReversalAfterCompletion { user_id })
                } else {
                    info!(
                        reference = %data.reference,
                        status = %transaction.status,
                        "withdrawal already settled, skipping refund"
                    );
                    Ok(WebhookOutcome::WithdrawalAlreadySettled { user_id })
                }
            }
        }
    }
}
