//! User-facing message text (Telegram HTML).

use rust_decimal::Decimal;

use crate::database::ledger_store::{OwnedTransaction, ReferrerSummary};
use crate::database::models::{BankProfile, User, UserId};
use crate::messaging::escape_html;
use crate::services::investment_plans::{find_plan, InvestmentPlan};
use crate::services::ledger::{MIN_DEPOSIT, MIN_WITHDRAWAL};
use crate::services::notification::format_naira;

pub const GENERIC_ERROR: &str =
    "❌ An unexpected error occurred. Please try again later. If the problem persists, contact support.";
pub const INVALID_AMOUNT: &str =
    "❌ Oops! That's an invalid amount. Please enter a valid number (e.g., 1000).";
pub const DEPOSIT_PROMPT_AMOUNT: &str = "💳 How much do you want to deposit? (e.g., 1000)";
pub const DEPOSIT_PROMPT_EMAIL: &str =
    "📧 Great! Now, please provide your email address to generate the payment link:";
pub const INVALID_EMAIL: &str =
    "❌ That doesn't look like a valid email. Please try again (e.g., example@email.com).";
pub const DEPOSIT_INIT_FAILED: &str =
    "😟 We could not set up your payment right now. Please try again in a few minutes.";
pub const WITHDRAW_BANK_NOT_SET: &str = "🚫 You need to set up your bank account details first before you can withdraw.\n\nTap the button below to get started! 👇";
pub const PROMPT_ACCOUNT_NUMBER: &str = "🏦 Please send your 10-digit bank <b>Account Number</b>:";
pub const INVALID_ACCOUNT_NUMBER: &str =
    "❌ Invalid account number. Please ensure it's a 10-digit number only.";
pub const PROMPT_BANK: &str = "💳 Now, please select your <b>Bank</b> from the list below, or type its name or code:";
pub const BANK_NOT_FOUND: &str = "❌ Sorry, we couldn't find that bank. Please choose from the list or check the name.";
pub const ACCOUNT_VERIFICATION_FAILED: &str = "❌ Account verification failed. The account number or bank might be incorrect. Please check and try again.";
pub const ACCOUNT_NAME_CONFIRMATION_INVALID: &str =
    "❌ Please tap \"Yes\" or \"No\" to confirm the account name.";
pub const BANK_ACCOUNT_UPDATED: &str =
    "✅ Your bank account details have been updated! You can now withdraw funds. 🎉";
pub const BANK_ACCOUNT_NOT_SET: &str =
    "🚫 No bank account linked yet. Let's link your account for easy withdrawals! 👇";
pub const INVEST_INFO: &str = "📊 Choose an investment plan:";
pub const INVESTMENT_CANCELLED: &str = "Investment cancelled. Your balance was not touched.";
pub const SESSION_EXPIRED: &str = "⌛ That action has expired. Please start again from the menu.";

pub const ADMIN_ACCESS_DENIED: &str =
    "🚫 Access Denied. You are not authorized to use the admin panel.";
pub const ADMIN_WELCOME: &str = "👋 Welcome to the Admin Dashboard! How can I help you?";
pub const ADMIN_PROMPT_USER_ID: &str = "🆔 Please enter the Telegram ID of the user:";
pub const ADMIN_INVALID_USER_ID: &str = "❌ Invalid User ID. Please enter a valid number.";
pub const ADMIN_USER_NOT_FOUND: &str = "🤷 User not found with that Telegram ID.";
pub const ADMIN_PROMPT_AMOUNT: &str = "💰 Please enter the amount (e.g., 5000):";
pub const ADMIN_NO_PENDING_WITHDRAWALS: &str = "✅ No pending manual withdrawals at the moment.";
pub const ADMIN_PROMPT_DECLINE_REASON: &str =
    "📝 Please provide a reason for declining this withdrawal:";
pub const ADMIN_PROMPT_BROADCAST: &str =
    "✍️ Please send the message you want to broadcast to ALL users.";
pub const ADMIN_BROADCAST_IN_PROGRESS: &str = "🚀 Broadcasting message... Please wait.";
pub const ADMIN_BROADCAST_CANCELLED: &str = "❌ Broadcast cancelled.";
pub const ADMIN_BROADCAST_NO_USERS: &str = "🤷 No users found to broadcast to.";
pub const ADMIN_DELETE_CANCELLED: &str = "Deletion cancelled.";

pub fn welcome(first_name: &str, balance: Decimal) -> String {
    format!(
        "👋 Welcome, {}! Your current balance is <b>{}</b>.\n\nHow can I help you today?",
        escape_html(first_name),
        format_naira(balance)
    )
}

pub fn welcome_bonus(amount: Decimal) -> String {
    format!(
        "🎁 Congratulations! You've received a welcome bonus of {}!",
        format_naira(amount)
    )
}

pub fn balance(user: &User) -> String {
    let pending = user.pending_deposits();
    let mut text = format!(
        "🌟 <b>Your Profile</b>\n👤 Name: {}\n✨ Username: @{}\n🆔 Telegram ID: <code>{}</code>\n💰 <b>Balance:</b> {}\n{}",
        escape_html(user.first_name.as_deref().unwrap_or("N/A")),
        escape_html(user.username.as_deref().unwrap_or("N/A")),
        user.telegram_id,
        format_naira(user.balance),
        if pending > Decimal::ZERO {
            format!("⏳ Pending Deposits: {}", format_naira(pending))
        } else {
            "Everything looks good! 👍".to_string()
        }
    );

    let active: Vec<_> = user.active_investments().collect();
    if active.is_empty() {
        text.push_str("\n\n<i>You currently have no active investments.</i> 🚀");
        return text;
    }
    text.push_str("\n\n📈 <b>Your Investments:</b>\n");
    for inv in active {
        let plan_name = find_plan(&inv.plan_id)
            .map(|p| p.name.to_string())
            .unwrap_or_else(|| "Unknown Plan".to_string());
        text.push_str(&format!(
            "\n<b>• {}</b> ({})\n  <i>Matures: {}</i>\n  <i>Projected Return: {}</i>\n",
            plan_name,
            format_naira(inv.principal),
            inv.maturity_date.format("%a %b %d %Y"),
            format_naira(inv.projected_return)
        ));
    }
    text
}

pub fn below_min_deposit() -> String {
    format!("⚠️ Minimum deposit amount is {}.", format_naira(MIN_DEPOSIT))
}

pub fn payment_link(amount: Decimal, email: &str, reference: &str) -> String {
    format!(
        "✅ Your payment link for {} is ready!\n\n📧 Email used: <code>{}</code>\n🔢 Reference: <code>{}</code>\n\n<i>Your balance is updated automatically once the payment succeeds.</i>",
        format_naira(amount),
        escape_html(email),
        escape_html(reference)
    )
}

pub fn withdraw_prompt(balance: Decimal) -> String {
    format!(
        "💰 How much would you like to withdraw? (Minimum {})\nAvailable: {}",
        format_naira(MIN_WITHDRAWAL),
        format_naira(balance)
    )
}

pub fn below_min_withdrawal() -> String {
    format!(
        "⚠️ Minimum withdrawal amount is {}.",
        format_naira(MIN_WITHDRAWAL)
    )
}

pub fn insufficient_balance(balance: Decimal) -> String {
    format!(
        "😞 Insufficient balance. Your current balance is {}.",
        format_naira(balance)
    )
}

pub fn withdrawal_initiated(amount: Decimal) -> String {
    format!(
        "✅ Your withdrawal of {} has been initiated! You should receive your funds shortly.",
        format_naira(amount)
    )
}

pub fn withdrawal_submitted_manual(amount: Decimal) -> String {
    format!(
        "✅ Your withdrawal request for {} has been submitted!\n\n<i>It is being processed manually. You will receive your funds shortly.</i>",
        format_naira(amount)
    )
}

pub fn withdrawal_transfer_failed(amount: Decimal) -> String {
    format!(
        "⚠️ We could not start the transfer. {} has been returned to your balance. Please try again later.",
        format_naira(amount)
    )
}

pub fn manual_withdrawal_alert(user_id: UserId, amount: Decimal, profile: &BankProfile, reference: &str) -> String {
    format!(
        "🚨 <b>NEW PENDING WITHDRAWAL</b> 🚨\n\n👤 User ID: <code>{}</code>\n💰 Amount: {}\n\n🏦 Account Name: <b>{}</b>\n🔢 Account Number: <code>{}</code>\n💳 Bank: <b>{}</b>\n\n🔗 Reference: <code>{}</code>\n\n<i>Manage with /admindash → Pending Withdrawals</i>",
        user_id,
        format_naira(amount),
        escape_html(&profile.account_name),
        escape_html(&profile.account_number),
        escape_html(&profile.bank_name),
        escape_html(reference)
    )
}

pub fn bank_account_current(profile: &BankProfile) -> String {
    format!(
        "🏦 Your linked bank account:\n\n<b>Account Name:</b> <code>{}</code>\n<b>Account Number:</b> <code>{}</code>\n<b>Bank:</b> <code>{}</code>",
        escape_html(&profile.account_name),
        escape_html(&profile.account_number),
        escape_html(&profile.bank_name)
    )
}

pub fn account_name_found(account_name: &str, bank_name: &str) -> String {
    format!(
        "🔍 We found this account: <b>{}</b> ({})\n\nIs this correct?",
        escape_html(account_name),
        escape_html(bank_name)
    )
}

pub fn plan_amount_prompt(plan: &InvestmentPlan) -> String {
    format!(
        "📈 <b>{}</b>: {} for {} days.\n\nEnter an amount between {} and {}:",
        plan.name,
        plan.rate_label(),
        plan.duration_days,
        format_naira(plan.min_amount),
        format_naira(plan.max_amount)
    )
}

pub fn outside_plan_limits(plan: &InvestmentPlan) -> String {
    format!(
        "⚠️ The {} accepts between {} and {}.",
        plan.name,
        format_naira(plan.min_amount),
        format_naira(plan.max_amount)
    )
}

pub fn investment_confirmation(plan: &InvestmentPlan, amount: Decimal) -> String {
    format!(
        "<b>Confirm Your Investment</b>\n📈 <b>Plan:</b> {}\n💰 <b>Amount:</b> {}\n🚀 <b>ROI:</b> {} ({} days)\n💸 <b>Projected Return:</b> {}\n\n<i>Are you sure you want to invest this amount?</i>",
        plan.name,
        format_naira(amount),
        plan.rate_label(),
        plan.duration_days,
        format_naira(plan.projected_return(amount))
    )
}

pub fn investment_success(plan: &InvestmentPlan, amount: Decimal, maturity: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "✅ You have invested {} in the \"{}\"!\n\nIt matures on {}.\n\n<i>Your earnings will be credited automatically at maturity.</i>",
        format_naira(amount),
        plan.name,
        maturity.format("%a %b %d %Y")
    )
}

pub fn referral(link: &str) -> String {
    format!(
        "👫 Share your referral link and invite friends!\n\n🔗 Your Referral Link: {}",
        escape_html(link)
    )
}

pub fn support() -> &'static str {
    "🆘 Need help or have questions? Our support team is here for you!"
}

pub fn admin_funds_adjusted(added: bool, amount: Decimal, user_id: UserId, balance: Decimal) -> String {
    format!(
        "✅ Successfully {} {} {} user <code>{}</code>. New balance: {}.",
        if added { "added" } else { "removed" },
        format_naira(amount),
        if added { "to" } else { "from" },
        user_id,
        format_naira(balance)
    )
}

pub fn top_referrers(referrers: &[ReferrerSummary]) -> String {
    if referrers.is_empty() {
        return "📊 No referrers found yet.".to_string();
    }
    let mut text = format!("🔝 <b>Top {} Referrers</b>\n\n", referrers.len());
    for (i, r) in referrers.iter().enumerate() {
        let name = r
            .username
            .as_deref()
            .map(|u| format!("@{}", u))
            .or_else(|| r.first_name.clone())
            .unwrap_or_else(|| "N/A".to_string());
        text.push_str(&format!(
            "{}. {} (ID: <code>{}</code>) - Referrals: {} | Bonus: {}\n",
            i + 1,
            escape_html(&name),
            r.telegram_id,
            r.referral_count,
            format_naira(r.referral_bonus_earned)
        ));
    }
    text
}

pub fn pending_withdrawal(item: &OwnedTransaction, index: usize, total: usize) -> String {
    let txn = &item.transaction;
    let field = |key: &str| escape_html(txn.metadata_str(key).unwrap_or("N/A"));
    format!(
        "📝 <b>Pending Withdrawal {}/{}</b>\n\n👤 <b>User ID:</b> <code>{}</code>\n💰 <b>Amount:</b> {}\n🏦 <b>Account Name:</b> {}\n🔢 <b>Account Number:</b> <code>{}</code>\n💳 <b>Bank:</b> {}\n🔗 <b>Ref:</b> <code>{}</code>\n🗓️ <b>Date:</b> {}",
        index + 1,
        total,
        item.user_id,
        format_naira(txn.amount.abs()),
        field("account_name"),
        field("account_number"),
        field("bank_name"),
        escape_html(&txn.reference),
        txn.created_at.format("%Y-%m-%d %H:%M UTC")
    )
}

pub fn withdrawal_approved(reference: &str) -> String {
    format!("✅ Withdrawal <code>{}</code> marked as completed.", escape_html(reference))
}

pub fn withdrawal_declined(reference: &str, user_id: UserId, amount: Decimal) -> String {
    format!(
        "❌ Withdrawal <code>{}</code> for user <code>{}</code> ({}) has been declined and refunded.",
        escape_html(reference),
        user_id,
        format_naira(amount)
    )
}

pub fn withdrawal_not_actionable(reference: &str, status: &str) -> String {
    format!(
        "ℹ️ Withdrawal <code>{}</code> is already {}.",
        escape_html(reference),
        status
    )
}

pub fn delete_user_confirmation(user: &User) -> String {
    format!(
        "⚠️ Are you sure you want to delete <b>{}</b> (ID: <code>{}</code>) and all their data? This cannot be undone.",
        escape_html(&user.display_name()),
        user.telegram_id
    )
}

pub fn user_deleted(user_id: UserId) -> String {
    format!("🗑 User <code>{}</code> and all their data have been deleted.", user_id)
}

pub fn broadcast_confirmation(message: &str) -> String {
    format!(
        "You are about to broadcast:\n\n---\n{}\n---\n\nSend this to ALL users?",
        escape_html(message)
    )
}

pub fn broadcast_complete(sent: usize, failed: usize) -> String {
    format!(
        "✅ Broadcast complete!\n\nSent to: {} users.\nFailed for: {} users.",
        sent, failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::NewUser;

    #[test]
    fn balance_without_investments() {
        let mut user = User::new(NewUser {
            telegram_id: 5,
            first_name: Some("Ada <3".to_string()),
            ..Default::default()
        });
        user.balance = Decimal::new(2500, 0);
        let text = balance(&user);
        assert!(text.contains("Ada &lt;3"));
        assert!(text.contains("₦2,500.00"));
        assert!(text.contains("no active investments"));
    }

    #[test]
    fn top_referrers_empty_and_listed() {
        assert_eq!(top_referrers(&[]), "📊 No referrers found yet.");
        let text = top_referrers(&[ReferrerSummary {
            telegram_id: 1,
            first_name: Some("Bola".to_string()),
            username: None,
            referral_count: 4,
            referral_bonus_earned: Decimal::ZERO,
        }]);
        assert!(text.contains("1. Bola"));
        assert!(text.contains("Referrals: 4"));
    }
}
