use crate::database::models::UserId;
use crate::messaging::{InlineButton, Keyboard};
use crate::payments::types::Bank;
use crate::services::investment_plans::InvestmentPlan;

use super::commands::*;

pub fn main_menu() -> Keyboard {
    Keyboard::reply(&[
        &[BTN_BALANCE, BTN_DEPOSIT],
        &[BTN_WITHDRAW, BTN_WALLET],
        &[BTN_INVEST, BTN_REFERRALS],
        &[BTN_SUPPORT],
    ])
}

pub fn admin_menu() -> Keyboard {
    Keyboard::reply(&[
        &[BTN_ADD_FUNDS, BTN_REMOVE_FUNDS],
        &[BTN_PENDING_WITHDRAWALS, BTN_TOP_REFERRERS],
        &[BTN_DELETE_USER, BTN_BROADCAST],
        &[BTN_MAIN_MENU],
    ])
}

/// Two banks per row.
pub fn bank_choices(banks: &[Bank]) -> Keyboard {
    Keyboard::inline(
        banks
            .chunks(2)
            .map(|pair| {
                pair.iter()
                    .map(|b| InlineButton::callback(&b.name, format!("select_bank_{}", b.code)))
                    .collect()
            })
            .collect(),
    )
}

pub fn confirm_account_name() -> Keyboard {
    Keyboard::inline(vec![vec![
        InlineButton::callback("✅ Yes", "confirm_account_name_yes"),
        InlineButton::callback("❌ No", "confirm_account_name_no"),
    ]])
}

pub fn set_bank_account(has_profile: bool) -> Keyboard {
    let label = if has_profile {
        "✏️ Change Bank Account"
    } else {
        "🏦 Set Bank Account"
    };
    Keyboard::inline(vec![vec![InlineButton::callback(label, "set_bank_account")]])
}

pub fn plan_choices(plans: &[InvestmentPlan]) -> Keyboard {
    Keyboard::inline(
        plans
            .iter()
            .map(|p| {
                vec![InlineButton::callback(
                    format!("{} ({} for {} days)", p.name, p.rate_label(), p.duration_days),
                    format!("select_plan_{}", p.id),
                )]
            })
            .collect(),
    )
}

pub fn confirm_investment() -> Keyboard {
    Keyboard::inline(vec![vec![
        InlineButton::callback("✅ Confirm", "confirm_investment_yes"),
        InlineButton::callback("❌ Cancel", "confirm_investment_no"),
    ]])
}

pub fn payment_link(url: &str) -> Keyboard {
    Keyboard::inline(vec![vec![InlineButton::url("💳 Pay Now", url)]])
}

pub fn url_button(text: &str, url: &str) -> Keyboard {
    Keyboard::inline(vec![vec![InlineButton::url(text, url)]])
}

pub fn withdrawal_review(reference: &str, index: usize, total: usize) -> Keyboard {
    let mut rows = vec![
        vec![InlineButton::callback(
            "✅ Approve (Mark Completed)",
            format!("approve_withdrawal_{}", reference),
        )],
        vec![InlineButton::callback(
            "❌ Decline & Refund",
            format!("decline_withdrawal_{}", reference),
        )],
    ];
    let mut nav = Vec::new();
    if index > 0 {
        nav.push(InlineButton::callback("⬅️ Previous", "prev_withdrawal"));
    }
    if index + 1 < total {
        nav.push(InlineButton::callback("Next ➡️", "next_withdrawal"));
    }
    if !nav.is_empty() {
        rows.push(nav);
    }
    Keyboard::inline(rows)
}

pub fn confirm_delete_user(target: UserId) -> Keyboard {
    Keyboard::inline(vec![vec![
        InlineButton::callback("🗑 Yes, delete", format!("confirm_delete_user_{}", target)),
        InlineButton::callback("Cancel", format!("cancel_delete_user_{}", target)),
    ]])
}

pub fn confirm_broadcast() -> Keyboard {
    Keyboard::inline(vec![vec![
        InlineButton::callback("📢 Send", "confirm_broadcast"),
        InlineButton::callback("Cancel", "cancel_broadcast"),
    ]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::banks::popular_banks;
    use crate::services::investment_plans::plans;

    #[test]
    fn pager_navigation_buttons() {
        let first = withdrawal_review("WIT-1-1", 0, 3);
        let data = first.callback_data();
        assert!(data.contains(&"next_withdrawal"));
        assert!(!data.contains(&"prev_withdrawal"));

        let last = withdrawal_review("WIT-1-1", 2, 3);
        let data = last.callback_data();
        assert!(data.contains(&"prev_withdrawal"));
        assert!(!data.contains(&"next_withdrawal"));
        assert_eq!(data[0], "approve_withdrawal_WIT-1-1");
    }

    #[test]
    fn bank_and_plan_keyboards_round_trip_through_parser() {
        let banks = bank_choices(&popular_banks());
        for data in banks.callback_data() {
            assert!(matches!(CallbackAction::parse(data), CallbackAction::SelectBank(_)));
        }
        let plans = plan_choices(&plans());
        assert_eq!(
            plans.callback_data(),
            vec!["select_plan_rookie", "select_plan_standard", "select_plan_investor"]
        );
    }
}
