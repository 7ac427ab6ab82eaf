//! Parsing of inbound text and callback payloads into typed actions.

use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::database::models::UserId;
use crate::services::ledger::MAX_AMOUNT;

pub const BTN_BALANCE: &str = "💰 Balance";
pub const BTN_DEPOSIT: &str = "💳 Deposit";
pub const BTN_WITHDRAW: &str = "📤 Withdraw";
pub const BTN_WALLET: &str = "🗂 Wallet";
pub const BTN_INVEST: &str = "📊 Invest";
pub const BTN_REFERRALS: &str = "👫 Referrals";
pub const BTN_SUPPORT: &str = "🆘 Support";

pub const BTN_ADD_FUNDS: &str = "➕ Add Funds";
pub const BTN_REMOVE_FUNDS: &str = "➖ Remove Funds";
pub const BTN_PENDING_WITHDRAWALS: &str = "📝 Pending Withdrawals";
pub const BTN_TOP_REFERRERS: &str = "🔝 Top Referrers";
pub const BTN_DELETE_USER: &str = "🗑 Delete User";
pub const BTN_BROADCAST: &str = "📢 Broadcast Message";
pub const BTN_MAIN_MENU: &str = "↩️ Main Menu";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Balance,
    Deposit,
    Withdraw,
    Wallet,
    Invest,
    Referrals,
    Support,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    AddFunds,
    RemoveFunds,
    PendingWithdrawals,
    TopReferrers,
    DeleteUser,
    Broadcast,
    MainMenu,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextCommand {
    Start { referrer: Option<UserId> },
    AdminDashboard,
    Menu(MenuAction),
    Admin(AdminAction),
    /// Anything else; interpreted by the current conversation step.
    Input(String),
}

impl TextCommand {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(rest) = strip_command(text, "/start") {
            let referrer = rest
                .trim()
                .strip_prefix("ref_")
                .and_then(|id| id.parse::<UserId>().ok());
            return TextCommand::Start { referrer };
        }
        if strip_command(text, "/admindash").is_some() {
            return TextCommand::AdminDashboard;
        }

        let menu = match text {
            BTN_BALANCE => Some(MenuAction::Balance),
            BTN_DEPOSIT => Some(MenuAction::Deposit),
            BTN_WITHDRAW => Some(MenuAction::Withdraw),
            BTN_WALLET => Some(MenuAction::Wallet),
            BTN_INVEST => Some(MenuAction::Invest),
            BTN_REFERRALS => Some(MenuAction::Referrals),
            BTN_SUPPORT => Some(MenuAction::Support),
            _ => None,
        };
        if let Some(action) = menu {
            return TextCommand::Menu(action);
        }

        let admin = match text {
            BTN_ADD_FUNDS => Some(AdminAction::AddFunds),
            BTN_REMOVE_FUNDS => Some(AdminAction::RemoveFunds),
            BTN_PENDING_WITHDRAWALS => Some(AdminAction::PendingWithdrawals),
            BTN_TOP_REFERRERS => Some(AdminAction::TopReferrers),
            BTN_DELETE_USER => Some(AdminAction::DeleteUser),
            BTN_BROADCAST => Some(AdminAction::Broadcast),
            BTN_MAIN_MENU => Some(AdminAction::MainMenu),
            _ => None,
        };
        match admin {
            Some(action) => TextCommand::Admin(action),
            None => TextCommand::Input(text.to_string()),
        }
    }
}

/// `/start`, `/start payload` and `/start@BotName payload` all match.
fn strip_command<'a>(text: &'a str, command: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(command)?;
    if rest.is_empty() {
        return Some(rest);
    }
    if rest.starts_with('@') {
        return Some(rest.split_once(' ').map(|(_, payload)| payload).unwrap_or(""));
    }
    if rest.starts_with(char::is_whitespace) {
        return Some(rest);
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    SelectBank(String),
    ConfirmAccountName(bool),
    SetBankAccount,
    SelectPlan(String),
    ConfirmInvestment(bool),
    ConfirmDeleteUser(UserId),
    CancelDeleteUser(UserId),
    ApproveWithdrawal(String),
    DeclineWithdrawal(String),
    NextWithdrawal,
    PrevWithdrawal,
    ConfirmBroadcast,
    CancelBroadcast,
    Unknown(String),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Self {
        let unknown = || CallbackAction::Unknown(data.to_string());
        match data {
            "confirm_account_name_yes" => return CallbackAction::ConfirmAccountName(true),
            "confirm_account_name_no" => return CallbackAction::ConfirmAccountName(false),
            "set_bank_account" => return CallbackAction::SetBankAccount,
            "confirm_investment_yes" => return CallbackAction::ConfirmInvestment(true),
            "confirm_investment_no" => return CallbackAction::ConfirmInvestment(false),
            "next_withdrawal" => return CallbackAction::NextWithdrawal,
            "prev_withdrawal" => return CallbackAction::PrevWithdrawal,
            "confirm_broadcast" => return CallbackAction::ConfirmBroadcast,
            "cancel_broadcast" => return CallbackAction::CancelBroadcast,
            _ => {}
        }

        if let Some(code) = non_empty_suffix(data, "select_bank_") {
            CallbackAction::SelectBank(code.to_string())
        } else if let Some(plan) = non_empty_suffix(data, "select_plan_") {
            CallbackAction::SelectPlan(plan.to_string())
        } else if let Some(id) = non_empty_suffix(data, "confirm_delete_user_") {
            id.parse().map(CallbackAction::ConfirmDeleteUser).unwrap_or_else(|_| unknown())
        } else if let Some(id) = non_empty_suffix(data, "cancel_delete_user_") {
            id.parse().map(CallbackAction::CancelDeleteUser).unwrap_or_else(|_| unknown())
        } else if let Some(reference) = non_empty_suffix(data, "approve_withdrawal_") {
            CallbackAction::ApproveWithdrawal(reference.to_string())
        } else if let Some(reference) = non_empty_suffix(data, "decline_withdrawal_") {
            CallbackAction::DeclineWithdrawal(reference.to_string())
        } else {
            unknown()
        }
    }
}

fn non_empty_suffix<'a>(data: &'a str, prefix: &str) -> Option<&'a str> {
    data.strip_prefix(prefix).filter(|rest| !rest.is_empty())
}

// ----------------------------------------------------------------------------
// Free-text values
// ----------------------------------------------------------------------------

/// Positive naira amount; tolerates `₦`, `NGN` and thousands separators.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .trim()
        .trim_start_matches('₦')
        .trim_start_matches("NGN")
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    let amount = Decimal::from_str(&cleaned).ok()?;
    (amount > Decimal::ZERO && amount <= MAX_AMOUNT).then_some(amount)
}

pub fn parse_user_id(text: &str) -> Option<UserId> {
    text.trim().parse::<UserId>().ok().filter(|id| *id > 0)
}

/// `yes`/`no` typed instead of tapping the confirmation buttons.
pub fn parse_yes_no(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "yes" | "y" => Some(true),
        "no" | "n" => Some(false),
        _ => None,
    }
}

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

pub fn is_valid_email(text: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(text.trim()))
}

pub fn is_account_number(text: &str) -> bool {
    let text = text.trim();
    text.len() == 10 && text.chars().all(|c| c.is_ascii_digit())
}
