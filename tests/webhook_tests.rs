//! Paystack event intake: signature gate, reconciliation against the ledger
//! and redelivery safety.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{eventually, naira, sign, TestApp};
use serde_json::{json, Value};
use tower::ServiceExt;

use naira_invest_bot::build_router;
use naira_invest_bot::database::models::TransactionStatus;
use naira_invest_bot::payments::types::ChargeStatus;
use naira_invest_bot::services::ledger::{BankProfileInput, WithdrawalMode};
use naira_invest_bot::services::webhook_processor::{
    PaystackEvent, WebhookOutcome, WebhookProcessorError,
};

fn charge_event(reference: &str, user_id: Option<i64>) -> Vec<u8> {
    let metadata = match user_id {
        Some(id) => json!({"user_id": id}),
        None => json!({}),
    };
    serde_json::to_vec(&json!({
        "event": "charge.success",
        "data": {"reference": reference, "amount": 500000, "metadata": metadata}
    }))
    .unwrap()
}

fn transfer_event(kind: &str, reference: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": kind,
        "data": {"reference": reference, "amount": 300000, "transfer_code": "TRF_1"}
    }))
    .unwrap()
}

fn webhook_request(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/paystack")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("x-paystack-signature", sig);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn start_withdrawal(app: &TestApp, user_id: i64, amount: i64) -> String {
    app.funded_user(user_id, naira(10_000)).await;
    app.ledger()
        .save_bank_profile(
            user_id,
            BankProfileInput {
                account_number: Some("2012345678".to_string()),
                bank_code: Some("090267".to_string()),
                bank_name: Some("Kuda Microfinance Bank".to_string()),
                account_name: Some("ADA OKAFOR".to_string()),
                recipient_code: Some("RCP_1".to_string()),
            },
        )
        .await
        .unwrap();
    let (_, txn) = app
        .ledger()
        .begin_withdrawal(user_id, naira(amount), WithdrawalMode::Automatic)
        .await
        .unwrap();
    txn.reference
}

async fn process(app: &TestApp, body: &[u8]) -> Result<WebhookOutcome, WebhookProcessorError> {
    let event = PaystackEvent::parse(body).unwrap();
    app.state.webhooks.process(event).await
}

// ---------------------------------------------------------------------------
// HTTP surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_signature_is_unauthorized() {
    let app = TestApp::new(false);
    let response = build_router(app.state.clone())
        .oneshot(webhook_request(charge_event("DEP-1-1", Some(1)), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bad_signature_is_unauthorized_and_not_processed() {
    let app = TestApp::new(false);
    app.funded_user(1, naira(0)).await;
    let body = charge_event("DEP-1-1", Some(1));
    let response = build_router(app.state.clone())
        .oneshot(webhook_request(body, Some("deadbeef".repeat(16))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.gateway.verify_calls(), 0);
    assert_eq!(app.balance(1).await, naira(0));
}

#[tokio::test]
async fn test_signed_malformed_payload_is_acknowledged_and_dropped() {
    let app = TestApp::new(false);
    app.funded_user(2, naira(1_000)).await;
    let body = b"{not json".to_vec();
    let signature = sign(&body);
    let response = build_router(app.state.clone())
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(app.gateway.verify_calls(), 0);
    assert_eq!(app.balance(2).await, naira(1_000));
}

#[tokio::test]
async fn test_signed_charge_without_reference_is_acknowledged_and_dropped() {
    let app = TestApp::new(false);
    app.funded_user(3, naira(0)).await;
    app.ledger()
        .record_pending_deposit(3, "DEP-3-1", naira(5_000), json!({}))
        .await
        .unwrap();
    app.gateway
        .set_charge("DEP-3-1", ChargeStatus::Success, naira(5_000));

    let body = serde_json::to_vec(&json!({
        "event": "charge.success",
        "data": {"amount": 500000, "metadata": {"user_id": 3}}
    }))
    .unwrap();
    let signature = sign(&body);
    let response = build_router(app.state.clone())
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(app.gateway.verify_calls(), 0);
    assert_eq!(app.balance(3).await, naira(0));
    let user = app.ledger().require_user(3).await.unwrap();
    assert_eq!(
        user.transaction("DEP-3-1").unwrap().status,
        TransactionStatus::Pending
    );
}

#[tokio::test]
async fn test_valid_charge_is_acknowledged_then_credited() {
    let app = TestApp::new(false);
    app.funded_user(11, naira(0)).await;
    app.ledger()
        .record_pending_deposit(11, "DEP-11-1", naira(5_000), json!({}))
        .await
        .unwrap();
    app.gateway
        .set_charge("DEP-11-1", ChargeStatus::Success, naira(5_000));

    let body = charge_event("DEP-11-1", Some(11));
    let signature = sign(&body);
    let response = build_router(app.state.clone())
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ok");

    let app = &app;
    eventually(|| async move { app.balance(11).await == naira(5_000) }).await;
    eventually(|| async move { !app.messenger.texts_to(11).is_empty() }).await;
    assert!(app.messenger.last_text(11).contains("Deposit received"));
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_redelivered_charge_credits_once() {
    let app = TestApp::new(false);
    app.funded_user(12, naira(0)).await;
    app.ledger()
        .record_pending_deposit(12, "DEP-12-1", naira(5_000), json!({}))
        .await
        .unwrap();
    let body = charge_event("DEP-12-1", Some(12));

    let first = process(&app, &body).await.unwrap();
    let second = process(&app, &body).await.unwrap();

    assert_eq!(
        first,
        WebhookOutcome::DepositCredited {
            user_id: 12,
            amount: naira(5_000)
        }
    );
    assert_eq!(second, WebhookOutcome::DepositAlreadySettled { user_id: 12 });
    assert_eq!(app.balance(12).await, naira(5_000));
    assert_eq!(app.messenger.texts_to(12).len(), 1);
}

#[tokio::test]
async fn test_verified_amount_wins_over_event_amount() {
    let app = TestApp::new(false);
    app.funded_user(13, naira(0)).await;
    app.gateway
        .set_charge("DEP-13-1", ChargeStatus::Success, naira(4_000));

    let outcome = process(&app, &charge_event("DEP-13-1", Some(13)))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        WebhookOutcome::DepositCredited {
            user_id: 13,
            amount: naira(4_000)
        }
    );
    assert_eq!(app.balance(13).await, naira(4_000));
}

#[tokio::test]
async fn test_unverified_charge_marks_deposit_failed() {
    let app = TestApp::new(false);
    app.funded_user(14, naira(0)).await;
    app.ledger()
        .record_pending_deposit(14, "DEP-14-1", naira(5_000), json!({}))
        .await
        .unwrap();
    app.gateway
        .set_charge("DEP-14-1", ChargeStatus::Failed, naira(5_000));

    let outcome = process(&app, &charge_event("DEP-14-1", Some(14)))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::DepositFailed { user_id: Some(14) });
    assert_eq!(app.balance(14).await, naira(0));
    let user = app.ledger().require_user(14).await.unwrap();
    assert_eq!(
        user.transaction("DEP-14-1").unwrap().status,
        TransactionStatus::Failed
    );
    assert!(app.messenger.last_text(14).contains("Payment failed"));
}

#[tokio::test]
async fn test_charge_still_pending_at_provider_stays_pending() {
    let app = TestApp::new(false);
    app.funded_user(15, naira(0)).await;
    app.ledger()
        .record_pending_deposit(15, "DEP-15-1", naira(5_000), json!({}))
        .await
        .unwrap();
    app.gateway
        .set_charge("DEP-15-1", ChargeStatus::Pending, naira(5_000));

    let early = process(&app, &charge_event("DEP-15-1", Some(15)))
        .await
        .unwrap();

    assert_eq!(early, WebhookOutcome::DepositUnsettled { user_id: Some(15) });
    assert_eq!(app.balance(15).await, naira(0));
    let user = app.ledger().require_user(15).await.unwrap();
    assert_eq!(
        user.transaction("DEP-15-1").unwrap().status,
        TransactionStatus::Pending
    );
    assert!(app.messenger.texts_to(15).is_empty());

    app.gateway
        .set_charge("DEP-15-1", ChargeStatus::Success, naira(5_000));
    let settled = process(&app, &charge_event("DEP-15-1", Some(15)))
        .await
        .unwrap();

    assert_eq!(
        settled,
        WebhookOutcome::DepositCredited {
            user_id: 15,
            amount: naira(5_000)
        }
    );
    assert_eq!(app.balance(15).await, naira(5_000));
}

#[tokio::test]
async fn test_charge_without_resolvable_owner_is_an_error() {
    let app = TestApp::new(false);
    let result = process(&app, &charge_event("mystery-ref", None)).await;

    assert!(matches!(result, Err(WebhookProcessorError::UnknownOwner(_))));
}

#[tokio::test]
async fn test_transfer_failure_refunds_once() {
    let app = TestApp::new(true);
    let reference = start_withdrawal(&app, 21, 3_000).await;
    assert_eq!(app.balance(21).await, naira(7_000));
    let body = transfer_event("transfer.failed", &reference);

    let first = process(&app, &body).await.unwrap();
    let second = process(&app, &body).await.unwrap();

    assert_eq!(
        first,
        WebhookOutcome::WithdrawalRefunded {
            user_id: 21,
            amount: naira(3_000)
        }
    );
    assert_eq!(second, WebhookOutcome::WithdrawalAlreadySettled { user_id: 21 });
    assert_eq!(app.balance(21).await, naira(10_000));
}

#[tokio::test]
async fn test_transfer_failure_records_provider_failures_not_narration() {
    let app = TestApp::new(true);
    let reference = start_withdrawal(&app, 23, 3_000).await;
    let body = serde_json::to_vec(&json!({
        "event": "transfer.failed",
        "data": {
            "reference": reference,
            "amount": 300000,
            "reason": "Wallet withdrawal",
            "failures": ["Account is dormant"]
        }
    }))
    .unwrap();

    let outcome = process(&app, &body).await.unwrap();

    assert_eq!(
        outcome,
        WebhookOutcome::WithdrawalRefunded {
            user_id: 23,
            amount: naira(3_000)
        }
    );
    let user = app.ledger().require_user(23).await.unwrap();
    let txn = user.transaction(&reference).unwrap();
    assert_eq!(txn.metadata_str("failure_reason"), Some("Account is dormant"));
    let notice = app.messenger.last_text(23);
    assert!(notice.contains("Account is dormant"));
    assert!(!notice.contains("Wallet withdrawal"));
}

#[tokio::test]
async fn test_transfer_failure_falls_back_to_gateway_response() {
    let app = TestApp::new(true);
    let reference = start_withdrawal(&app, 24, 1_000).await;
    let body = serde_json::to_vec(&json!({
        "event": "transfer.failed",
        "data": {
            "reference": reference,
            "reason": "Wallet withdrawal",
            "failures": null,
            "gateway_response": "Insufficient funds in balance"
        }
    }))
    .unwrap();

    process(&app, &body).await.unwrap();

    let user = app.ledger().require_user(24).await.unwrap();
    let txn = user.transaction(&reference).unwrap();
    assert_eq!(
        txn.metadata_str("failure_reason"),
        Some("Insufficient funds in balance")
    );
    assert_eq!(app.balance(24).await, naira(10_000));
}

#[tokio::test]
async fn test_reversal_after_completion_moves_no_money() {
    let app = TestApp::new(true);
    let reference = start_withdrawal(&app, 22, 2_000).await;

    let done = process(&app, &transfer_event("transfer.success", &reference))
        .await
        .unwrap();
    let reversed = process(&app, &transfer_event("transfer.reversed", &reference))
        .await
        .unwrap();

    assert_eq!(done, WebhookOutcome::WithdrawalCompleted { user_id: 22 });
    assert_eq!(reversed, WebhookOutcome::ReversalAfterCompletion { user_id: 22 });
    assert_eq!(app.balance(22).await, naira(8_000));
}

#[tokio::test]
async fn test_unknown_transfer_reference_is_dropped() {
    let app = TestApp::new(true);
    let outcome = process(&app, &transfer_event("transfer.success", "WIT-404-1"))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::UnknownReference);
}

#[tokio::test]
async fn test_unrecognized_event_is_ignored() {
    let app = TestApp::new(false);
    let outcome = process(
        &app,
        br#"{"event":"subscription.create","data":{"reference":"x"}}"#,
    )
    .await
    .unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored);
    assert_eq!(app.gateway.verify_calls(), 0);
}
