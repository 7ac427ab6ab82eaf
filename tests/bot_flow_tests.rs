//! Chat conversations driven end to end through the bot service.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{eventually, naira, TestApp, ADMIN_ID};
use serde_json::json;
use tower::ServiceExt;

use naira_invest_bot::api::telegram::TELEGRAM_SECRET_HEADER;
use naira_invest_bot::bot::ConversationStep;
use naira_invest_bot::cache::SessionStore;
use naira_invest_bot::build_router;
use naira_invest_bot::database::models::{InvestmentStatus, TransactionKind, TransactionStatus};
use naira_invest_bot::services::ledger::BankProfileInput;

async fn link_bank(app: &TestApp, user_id: i64) {
    app.ledger()
        .save_bank_profile(
            user_id,
            BankProfileInput {
                account_number: Some("2012345678".to_string()),
                bank_code: Some("090267".to_string()),
                bank_name: Some("Kuda MFB".to_string()),
                account_name: Some("ADA OKAFOR".to_string()),
                recipient_code: None,
            },
        )
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Onboarding
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_start_grants_welcome_bonus_once() {
    let app = TestApp::new(false);

    app.text(1, "/start").await;
    app.text(1, "/start").await;

    assert_eq!(app.balance(1).await, naira(200));
    let bonuses = app
        .messenger
        .texts_to(1)
        .into_iter()
        .filter(|t| t.contains("welcome bonus"))
        .count();
    assert_eq!(bonuses, 1);
    assert!(app.messenger.last_text(1).contains("Welcome"));
}

#[tokio::test]
async fn test_start_with_referral_payload_records_referrer() {
    let app = TestApp::new(false);
    app.text(1, "/start").await;

    app.text(2, "/start ref_1").await;
    app.text(3, "/start ref_3").await;

    let referred = app.ledger().require_user(2).await.unwrap();
    assert_eq!(referred.referrer_id, Some(1));
    let self_referred = app.ledger().require_user(3).await.unwrap();
    assert_eq!(self_referred.referrer_id, None);
}

#[tokio::test]
async fn test_free_text_without_a_flow_shows_menu() {
    let app = TestApp::new(false);
    app.text(4, "hello").await;

    assert!(app.messenger.last_text(4).contains("choose an option"));
    assert!(app.messenger.last_to(4).unwrap().keyboard.is_some());
}

// ---------------------------------------------------------------------------
// Deposit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_deposit_flow_issues_link_and_records_pending_deposit() {
    let app = TestApp::new(false);
    app.text(10, "/start").await;

    app.text(10, "💳 Deposit").await;
    app.text(10, "5,000").await;
    app.text(10, "ada@example.com").await;

    let initialized = app.gateway.initialized();
    assert_eq!(initialized.len(), 1);
    assert_eq!(initialized[0].amount, naira(5_000));
    assert_eq!(initialized[0].email, "ada@example.com");
    assert!(initialized[0].reference.starts_with("DEP-10-"));

    let user = app.ledger().require_user(10).await.unwrap();
    let txn = user.transaction(&initialized[0].reference).unwrap();
    assert_eq!(txn.status, TransactionStatus::Pending);
    assert_eq!(user.pending_deposits(), naira(5_000));
    assert_eq!(app.balance(10).await, naira(200));
    assert!(app.messenger.last_text(10).contains("payment link"));
    assert!(app.sessions.get(10).await.unwrap().is_none());
}

#[tokio::test]
async fn test_deposit_below_minimum_keeps_asking() {
    let app = TestApp::new(false);
    app.text(11, "💳 Deposit").await;
    app.text(11, "500").await;

    assert!(app.messenger.last_text(11).contains("Minimum deposit"));
    assert_eq!(
        app.sessions.get(11).await.unwrap(),
        Some(ConversationStep::AwaitingDepositAmount)
    );
    assert!(app.gateway.initialized().is_empty());
}

#[tokio::test]
async fn test_deposit_amount_too_large_is_reprompted() {
    let app = TestApp::new(false);
    app.text(19, "💳 Deposit").await;
    app.text(19, "99999999999999999999999999999").await;

    assert!(app.messenger.last_text(19).contains("invalid amount"));
    assert_eq!(
        app.sessions.get(19).await.unwrap(),
        Some(ConversationStep::AwaitingDepositAmount)
    );

    app.text(19, "5000").await;
    assert_eq!(
        app.sessions.get(19).await.unwrap(),
        Some(ConversationStep::AwaitingDepositEmail {
            amount: naira(5_000)
        })
    );
}

#[tokio::test]
async fn test_deposit_initialization_failure_records_nothing() {
    let app = TestApp::new(false);
    app.gateway.fail_initialize();

    app.text(12, "💳 Deposit").await;
    app.text(12, "2000").await;
    app.text(12, "ada@example.com").await;

    let user = app.ledger().require_user(12).await.unwrap();
    assert!(user.transactions.is_empty());
    assert!(app.messenger.last_text(12).contains("could not set up your payment"));
}

// ---------------------------------------------------------------------------
// Bank linking and withdrawal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bank_linking_flow_saves_verified_profile() {
    let app = TestApp::new(false);
    app.text(20, "/start").await;

    app.press(20, "set_bank_account").await;
    app.text(20, "2012345678").await;
    app.press(20, "select_bank_090267").await;
    assert!(app.messenger.last_text(20).contains("ADA OKAFOR"));
    app.press(20, "confirm_account_name_yes").await;

    let profile = app
        .ledger()
        .require_user(20)
        .await
        .unwrap()
        .bank_profile
        .unwrap();
    assert_eq!(profile.account_number, "2012345678");
    assert_eq!(profile.bank_code, "090267");
    assert_eq!(profile.account_name, "ADA OKAFOR");
    assert!(app.messenger.last_text(20).contains("bank account details have been updated"));
    assert!(app.messenger.answered().len() >= 3);
}

#[tokio::test]
async fn test_unresolvable_account_asks_again() {
    let app = TestApp::new(false);
    app.gateway.unresolvable_accounts();

    app.press(21, "set_bank_account").await;
    app.text(21, "2012345678").await;
    app.press(21, "select_bank_090267").await;

    assert!(app.messenger.last_text(21).contains("Account verification failed"));
    assert_eq!(
        app.sessions.get(21).await.unwrap(),
        Some(ConversationStep::AwaitingAccountNumber)
    );
    assert!(app.ledger().require_user(21).await.unwrap().bank_profile.is_none());
}

#[tokio::test]
async fn test_withdraw_without_bank_prompts_linking() {
    let app = TestApp::new(false);
    app.funded_user(22, naira(5_000)).await;

    app.text(22, "📤 Withdraw").await;

    assert!(app.messenger.last_text(22).contains("set up your bank account"));
    assert!(app.sessions.get(22).await.unwrap().is_none());
}

#[tokio::test]
async fn test_manual_withdrawal_debits_and_alerts_payment_group() {
    let app = TestApp::new(false);
    app.funded_user(23, naira(5_000)).await;
    link_bank(&app, 23).await;

    app.text(23, "📤 Withdraw").await;
    app.text(23, "2000").await;

    assert_eq!(app.balance(23).await, naira(3_000));
    let pending = app.ledger().pending_manual_withdrawals().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].user_id, 23);
    assert!(app.messenger.last_text(-100).contains("NEW PENDING WITHDRAWAL"));
    assert!(app.messenger.last_text(23).contains("processed manually"));
    assert!(app.gateway.transfers().is_empty());
}

#[tokio::test]
async fn test_automatic_withdrawal_initiates_transfer() {
    let app = TestApp::new(true);
    app.funded_user(24, naira(5_000)).await;
    link_bank(&app, 24).await;

    app.text(24, "📤 Withdraw").await;
    app.text(24, "1500").await;

    let transfers = app.gateway.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].amount, naira(1_500));
    assert_eq!(transfers[0].recipient_code, "RCP_2012345678");
    assert_eq!(app.balance(24).await, naira(3_500));
    assert!(app.messenger.last_text(24).contains("has been initiated"));
}

#[tokio::test]
async fn test_failed_transfer_initiation_refunds() {
    let app = TestApp::new(true);
    app.gateway.fail_transfers();
    app.funded_user(25, naira(5_000)).await;
    link_bank(&app, 25).await;

    app.text(25, "📤 Withdraw").await;
    app.text(25, "3000").await;

    assert_eq!(app.balance(25).await, naira(5_000));
    let user = app.ledger().require_user(25).await.unwrap();
    let withdrawal = user
        .transactions
        .iter()
        .rev()
        .find(|t| t.kind == TransactionKind::Withdrawal)
        .unwrap();
    assert_eq!(withdrawal.status, TransactionStatus::Failed);
    assert!(app.messenger.last_text(25).contains("returned to your balance"));
}

#[tokio::test]
async fn test_withdrawal_above_balance_is_refused() {
    let app = TestApp::new(false);
    app.funded_user(26, naira(2_000)).await;
    link_bank(&app, 26).await;

    app.text(26, "📤 Withdraw").await;
    app.text(26, "9000").await;

    assert!(app.messenger.last_text(26).contains("Insufficient balance"));
    assert_eq!(app.balance(26).await, naira(2_000));
    assert!(app.ledger().pending_manual_withdrawals().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Investment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invest_flow_opens_investment() {
    let app = TestApp::new(false);
    app.funded_user(30, naira(10_000)).await;

    app.text(30, "📊 Invest").await;
    app.press(30, "select_plan_rookie").await;
    app.text(30, "10000").await;
    assert!(app.messenger.last_text(30).contains("Confirm Your Investment"));
    app.press(30, "confirm_investment_yes").await;

    assert_eq!(app.balance(30).await, naira(0));
    let user = app.ledger().require_user(30).await.unwrap();
    assert_eq!(user.investments.len(), 1);
    assert_eq!(user.investments[0].plan_id, "rookie");
    assert_eq!(user.investments[0].projected_return, naira(14_500));
    assert_eq!(user.investments[0].status, InvestmentStatus::Active);
    assert!(app.messenger.last_text(30).contains("You have invested"));
}

#[tokio::test]
async fn test_invest_outside_plan_limits_is_refused() {
    let app = TestApp::new(false);
    app.funded_user(31, naira(50_000)).await;

    app.text(31, "📊 Invest").await;
    app.press(31, "select_plan_rookie").await;
    app.text(31, "20000").await;

    assert!(app.messenger.last_text(31).contains("accepts between"));
    assert!(app.ledger().require_user(31).await.unwrap().investments.is_empty());
}

#[tokio::test]
async fn test_cancelled_investment_leaves_balance() {
    let app = TestApp::new(false);
    app.funded_user(32, naira(10_000)).await;

    app.text(32, "📊 Invest").await;
    app.press(32, "select_plan_standard").await;
    app.text(32, "10000").await;
    app.press(32, "confirm_investment_no").await;

    assert_eq!(app.balance(32).await, naira(10_000));
    assert!(app.messenger.last_text(32).contains("Investment cancelled"));
}

#[tokio::test]
async fn test_stale_confirmation_button_expires() {
    let app = TestApp::new(false);
    app.funded_user(33, naira(10_000)).await;

    app.press(33, "confirm_investment_yes").await;

    assert_eq!(app.balance(33).await, naira(10_000));
    assert!(app.messenger.last_text(33).contains("expired"));
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_non_admin_is_denied() {
    let app = TestApp::new(false);
    app.funded_user(40, naira(0)).await;

    app.text(40, "/admindash").await;
    assert!(app.messenger.last_text(40).contains("Access Denied"));

    app.text(40, "➕ Add Funds").await;
    assert!(app.messenger.last_text(40).contains("Access Denied"));
    assert!(app.sessions.get(40).await.unwrap().is_none());
}

#[tokio::test]
async fn test_admin_adds_funds() {
    let app = TestApp::new(false);
    app.funded_user(41, naira(1_000)).await;

    app.text(ADMIN_ID, "/admindash").await;
    app.text(ADMIN_ID, "➕ Add Funds").await;
    app.text(ADMIN_ID, "41").await;
    app.text(ADMIN_ID, "2500").await;

    assert_eq!(app.balance(41).await, naira(3_500));
    assert!(app.messenger.last_text(ADMIN_ID).contains("Successfully added"));
}

#[tokio::test]
async fn test_admin_removal_cannot_overdraw() {
    let app = TestApp::new(false);
    app.funded_user(42, naira(1_000)).await;

    app.text(ADMIN_ID, "➖ Remove Funds").await;
    app.text(ADMIN_ID, "42").await;
    app.text(ADMIN_ID, "5000").await;

    assert_eq!(app.balance(42).await, naira(1_000));
    assert!(app.messenger.last_text(ADMIN_ID).contains("Insufficient balance"));
}

#[tokio::test]
async fn test_admin_unknown_target_is_reported() {
    let app = TestApp::new(false);

    app.text(ADMIN_ID, "➕ Add Funds").await;
    app.text(ADMIN_ID, "777").await;

    assert!(app.messenger.last_text(ADMIN_ID).contains("User not found"));
}

#[tokio::test]
async fn test_admin_approves_pending_withdrawal() {
    let app = TestApp::new(false);
    app.funded_user(43, naira(5_000)).await;
    link_bank(&app, 43).await;
    app.text(43, "📤 Withdraw").await;
    app.text(43, "2000").await;
    let reference = app.ledger().pending_manual_withdrawals().await.unwrap()[0]
        .transaction
        .reference
        .clone();

    app.text(ADMIN_ID, "📝 Pending Withdrawals").await;
    assert!(app.messenger.last_text(ADMIN_ID).contains(&reference));
    app.press(ADMIN_ID, &format!("approve_withdrawal_{}", reference))
        .await;

    let user = app.ledger().require_user(43).await.unwrap();
    assert_eq!(
        user.transaction(&reference).unwrap().status,
        TransactionStatus::Completed
    );
    assert_eq!(user.balance, naira(3_000));
    assert!(app
        .messenger
        .texts_to(ADMIN_ID)
        .iter()
        .any(|t| t.contains("marked as completed")));
    assert!(app.messenger.last_text(ADMIN_ID).contains("No pending manual withdrawals"));
}

#[tokio::test]
async fn test_admin_declines_pending_withdrawal_with_refund() {
    let app = TestApp::new(false);
    app.funded_user(44, naira(5_000)).await;
    link_bank(&app, 44).await;
    app.text(44, "📤 Withdraw").await;
    app.text(44, "2000").await;
    let reference = app.ledger().pending_manual_withdrawals().await.unwrap()[0]
        .transaction
        .reference
        .clone();

    app.text(ADMIN_ID, "📝 Pending Withdrawals").await;
    app.press(ADMIN_ID, &format!("decline_withdrawal_{}", reference))
        .await;
    app.text(ADMIN_ID, "name mismatch").await;

    let user = app.ledger().require_user(44).await.unwrap();
    assert_eq!(
        user.transaction(&reference).unwrap().status,
        TransactionStatus::Declined
    );
    assert_eq!(user.balance, naira(5_000));
    assert!(app.messenger.last_text(44).contains("name mismatch"));
}

#[tokio::test]
async fn test_admin_deletes_user_after_confirmation() {
    let app = TestApp::new(false);
    app.funded_user(45, naira(1_000)).await;

    app.text(ADMIN_ID, "🗑 Delete User").await;
    app.text(ADMIN_ID, "45").await;
    app.press(ADMIN_ID, "confirm_delete_user_45").await;

    assert!(app.ledger().get_user(45).await.unwrap().is_none());
    assert!(app.messenger.last_text(ADMIN_ID).contains("have been deleted"));
}

#[tokio::test]
async fn test_broadcast_reports_delivery_counts() {
    let app = TestApp::new(false);
    for id in [50, 51, 52] {
        app.funded_user(id, naira(0)).await;
    }
    app.messenger.block(52);

    app.text(ADMIN_ID, "📢 Broadcast Message").await;
    app.text(ADMIN_ID, "Maintenance <tonight>").await;
    app.press(ADMIN_ID, "confirm_broadcast").await;

    assert_eq!(
        app.messenger.last_text(50),
        "Maintenance &lt;tonight&gt;".to_string()
    );
    assert!(app.messenger.texts_to(52).is_empty());
    assert!(app
        .messenger
        .last_text(ADMIN_ID)
        .contains("Sent to: 2 users.\nFailed for: 1 users."));
}

// ---------------------------------------------------------------------------
// Telegram webhook route
// ---------------------------------------------------------------------------

fn update_request(secret: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/telegram/webhook")
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header(TELEGRAM_SECRET_HEADER, secret);
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn start_update(user_id: i64) -> serde_json::Value {
    json!({
        "update_id": 1,
        "message": {
            "message_id": 10,
            "chat": {"id": user_id},
            "from": {"id": user_id, "first_name": "Ada"},
            "text": "/start"
        }
    })
}

fn app_with_secret() -> TestApp {
    let mut bot = common::bot_config();
    bot.webhook_secret = Some("tg-secret".to_string());
    TestApp::with_options(false, bot, None)
}

#[tokio::test]
async fn test_telegram_route_rejects_bad_secret() {
    let app = app_with_secret();

    let response = build_router(app.state.clone())
        .oneshot(update_request(Some("nope"), start_update(60)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.ledger().get_user(60).await.unwrap().is_none());
}

#[tokio::test]
async fn test_telegram_route_dispatches_update() {
    let app = app_with_secret();

    let response = build_router(app.state.clone())
        .oneshot(update_request(Some("tg-secret"), start_update(61)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let app = &app;
    eventually(|| async move {
        matches!(app.ledger().get_user(61).await, Ok(Some(user)) if user.balance == naira(200))
    })
    .await;
}

#[tokio::test]
async fn test_telegram_route_acknowledges_garbage() {
    let app = app_with_secret();

    let response = build_router(app.state.clone())
        .oneshot(update_request(Some("tg-secret"), json!({"unexpected": true})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_chat_locks_are_released_after_updates() {
    let app = TestApp::new(false);
    for chat_id in 70..80 {
        app.text(chat_id, "/start").await;
    }
    assert_eq!(app.state.bot.active_chats().await, 0);

    tokio::join!(
        app.text(80, "/start"),
        app.text(80, "💳 Deposit"),
        app.text(81, "/start"),
    );

    assert_eq!(app.state.bot.active_chats().await, 0);
    assert_eq!(app.ledger().require_user(80).await.unwrap().balance, naira(200));
}
