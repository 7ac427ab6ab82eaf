use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::models::UserId;
use crate::messaging::{escape_html, Messenger};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationType {
    DepositCredited {
        amount: Decimal,
        balance: Decimal,
    },
    DepositFailed {
        reference: String,
    },
    WithdrawalCompleted {
        amount: Decimal,
    },
    WithdrawalFailed {
        amount: Decimal,
        reason: String,
    },
    WithdrawalApproved {
        amount: Decimal,
    },
    WithdrawalDeclined {
        amount: Decimal,
        reason: String,
    },
    InvestmentsMatured {
        count: usize,
        total: Decimal,
        balance: Decimal,
    },
    InvestmentPayoutDelayed {
        count: usize,
    },
}

impl NotificationType {
    pub fn label(&self) -> &'static str {
        match self {
            NotificationType::DepositCredited { .. } => "deposit_credited",
            NotificationType::DepositFailed { .. } => "deposit_failed",
            NotificationType::WithdrawalCompleted { .. } => "withdrawal_completed",
            NotificationType::WithdrawalFailed { .. } => "withdrawal_failed",
            NotificationType::WithdrawalApproved { .. } => "withdrawal_approved",
            NotificationType::WithdrawalDeclined { .. } => "withdrawal_declined",
            NotificationType::InvestmentsMatured { .. } => "investments_matured",
            NotificationType::InvestmentPayoutDelayed { .. } => "investment_payout_delayed",
        }
    }

    pub fn render(&self) -> String {
        match self {
            NotificationType::DepositCredited { amount, balance } => format!(
                "✅ <b>Deposit received</b>\n\n{} has been added to your wallet.\nNew balance: <b>{}</b>",
                format_naira(*amount),
                format_naira(*balance)
            ),
            NotificationType::DepositFailed { reference } => format!(
                "❌ <b>Payment failed</b>\n\nWe could not confirm payment <code>{}</code>. No money was added to your wallet.",
                escape_html(reference)
            ),
            NotificationType::WithdrawalCompleted { amount } => format!(
                "✅ <b>Withdrawal sent</b>\n\n{} is on its way to your bank account.",
                format_naira(*amount)
            ),
            NotificationType::WithdrawalFailed { amount, reason } => format!(
                "⚠️ <b>Withdrawal failed</b>\n\n{} could not be sent ({}). The amount has been returned to your wallet.",
                format_naira(*amount),
                escape_html(reason)
            ),
            NotificationType::WithdrawalApproved { amount } => format!(
                "✅ <b>Withdrawal approved</b>\n\nYour withdrawal of {} has been paid to your bank account.",
                format_naira(*amount)
            ),
            NotificationType::WithdrawalDeclined { amount, reason } => format!(
                "❌ <b>Withdrawal declined</b>\n\nReason: {}\n{} has been returned to your wallet.",
                escape_html(reason),
                format_naira(*amount)
            ),
            NotificationType::InvestmentsMatured {
                count,
                total,
                balance,
            } => format!(
                "🎉 <b>Investment matured</b>\n\n{} investment(s) paid out a total of {}.\nNew balance: <b>{}</b>",
                count,
                format_naira(*total),
                format_naira(*balance)
            ),
            NotificationType::InvestmentPayoutDelayed { count } => format!(
                "⏳ <b>Payout delayed</b>\n\n{} matured investment(s) could not be paid out yet. We will retry automatically.",
                count
            ),
        }
    }
}

/// Best-effort user notifications. Delivery failures are logged and never
/// propagate into the ledger flow that triggered them.
#[derive(Clone)]
pub struct NotificationService {
    messenger: Arc<dyn Messenger>,
}

impl NotificationService {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self { messenger }
    }

    pub async fn send_notification(&self, user_id: UserId, notification: NotificationType) {
        let label = notification.label();
        match self
            .messenger
            .send_message(user_id, &notification.render(), None)
            .await
        {
            Ok(()) => info!(user_id, kind = label, "🔔 NOTIFICATION sent"),
            Err(e) if e.is_unreachable_chat() => {
                warn!(user_id, kind = label, error = %e, "🔔 NOTIFICATION undeliverable, chat unreachable")
            }
            Err(e) => error!(user_id, kind = label, error = %e, "🔔 NOTIFICATION failed"),
        }
    }

    /// Free-form text to an operator chat.
    pub async fn alert(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.messenger.send_message(chat_id, text, None).await {
            error!(chat_id, error = %e, "🔔 ALERT failed");
        }
    }
}

/// `₦12,345.60`
pub fn format_naira(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let text = format!("{:.2}", rounded.abs());
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}₦{}.{}", if negative { "-" } else { "" }, grouped, fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naira_formatting() {
        assert_eq!(format_naira(Decimal::new(1000, 0)), "₦1,000.00");
        assert_eq!(format_naira(Decimal::new(5583333, 2)), "₦55,833.33");
        assert_eq!(format_naira(Decimal::new(200, 0)), "₦200.00");
        assert_eq!(format_naira(Decimal::new(1234567895, 3)), "₦1,234,567.90");
        assert_eq!(format_naira(Decimal::new(-1500, 0)), "-₦1,500.00");
        assert_eq!(format_naira(Decimal::ZERO), "₦0.00");
    }

    #[test]
    fn rendered_text_escapes_user_input() {
        let text = NotificationType::WithdrawalDeclined {
            amount: Decimal::new(2000, 0),
            reason: "<wrong name>".to_string(),
        }
        .render();
        assert!(text.contains("&lt;wrong name&gt;"));
        assert!(text.contains("₦2,000.00"));
    }
}
