//! Per-chat conversation state.
//!
//! A chat with no stored step is idle. Every step carries exactly the data
//! collected so far, so a handler never has to look anything up from a loose
//! key/value bag.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::database::models::UserId;
use crate::services::ledger::AdminAdjustment;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ConversationStep {
    AwaitingDepositAmount,
    AwaitingDepositEmail {
        amount: Decimal,
    },
    AwaitingWithdrawalAmount,
    AwaitingAccountNumber,
    AwaitingBankSelection {
        account_number: String,
    },
    AwaitingAccountNameConfirmation {
        account_number: String,
        bank_code: String,
        bank_name: String,
        account_name: String,
    },
    AwaitingPlanSelection,
    AwaitingInvestmentAmount {
        plan_id: String,
    },
    AwaitingInvestmentConfirmation {
        plan_id: String,
        amount: Decimal,
    },

    // Admin
    AwaitingAdjustmentTarget {
        direction: AdminAdjustment,
    },
    AwaitingAdjustmentAmount {
        direction: AdminAdjustment,
        target: UserId,
    },
    ReviewingWithdrawals {
        index: usize,
    },
    AwaitingDeclineReason {
        reference: String,
        index: usize,
    },
    AwaitingDeleteTarget,
    AwaitingDeleteConfirmation {
        target: UserId,
    },
    AwaitingBroadcastMessage,
    AwaitingBroadcastConfirmation {
        message: String,
    },
}

impl ConversationStep {
    pub fn is_admin_step(&self) -> bool {
        matches!(
            self,
            ConversationStep::AwaitingAdjustmentTarget { .. }
                | ConversationStep::AwaitingAdjustmentAmount { .. }
                | ConversationStep::ReviewingWithdrawals { .. }
                | ConversationStep::AwaitingDeclineReason { .. }
                | ConversationStep::AwaitingDeleteTarget
                | ConversationStep::AwaitingDeleteConfirmation { .. }
                | ConversationStep::AwaitingBroadcastMessage
                | ConversationStep::AwaitingBroadcastConfirmation { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConversationStep::AwaitingDepositAmount => "awaiting_deposit_amount",
            ConversationStep::AwaitingDepositEmail { .. } => "awaiting_deposit_email",
            ConversationStep::AwaitingWithdrawalAmount => "awaiting_withdrawal_amount",
            ConversationStep::AwaitingAccountNumber => "awaiting_account_number",
            ConversationStep::AwaitingBankSelection { .. } => "awaiting_bank_selection",
            ConversationStep::AwaitingAccountNameConfirmation { .. } => {
                "awaiting_account_name_confirmation"
            }
            ConversationStep::AwaitingPlanSelection => "awaiting_plan_selection",
            ConversationStep::AwaitingInvestmentAmount { .. } => "awaiting_investment_amount",
            ConversationStep::AwaitingInvestmentConfirmation { .. } => {
                "awaiting_investment_confirmation"
            }
            ConversationStep::AwaitingAdjustmentTarget { .. } => "awaiting_adjustment_target",
            ConversationStep::AwaitingAdjustmentAmount { .. } => "awaiting_adjustment_amount",
            ConversationStep::ReviewingWithdrawals { .. } => "reviewing_withdrawals",
            ConversationStep::AwaitingDeclineReason { .. } => "awaiting_decline_reason",
            ConversationStep::AwaitingDeleteTarget => "awaiting_delete_target",
            ConversationStep::AwaitingDeleteConfirmation { .. } => "awaiting_delete_confirmation",
            ConversationStep::AwaitingBroadcastMessage => "awaiting_broadcast_message",
            ConversationStep::AwaitingBroadcastConfirmation { .. } => {
                "awaiting_broadcast_confirmation"
            }
        }
    }
}
