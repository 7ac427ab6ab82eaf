//! Matured investments are paid out once, whatever triggers the sweep.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use common::{naira, TestApp};
use serde_json::{json, Value};
use tower::ServiceExt;

use naira_invest_bot::api::sweep::SWEEP_TOKEN_HEADER;
use naira_invest_bot::build_router;
use naira_invest_bot::database::ledger_store::InvestmentUpdate;
use naira_invest_bot::database::models::{
    Investment, InvestmentStatus, Transaction, TransactionKind, TransactionStatus,
};
use naira_invest_bot::workers::maturity_sweep::start_of_day;

async fn matured_rookie(app: &TestApp, user_id: i64) {
    app.funded_user(user_id, naira(10_000)).await;
    app.ledger()
        .open_investment(
            user_id,
            "rookie",
            naira(10_000),
            Utc::now() - Duration::days(4),
        )
        .await
        .unwrap();
    assert_eq!(app.balance(user_id).await, naira(0));
}

fn sweep_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/cron/maturity-sweep");
    if let Some(token) = token {
        builder = builder.header(SWEEP_TOKEN_HEADER, token);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_matured_investment_is_paid_out() {
    let app = TestApp::new(false);
    matured_rookie(&app, 31).await;

    let report = app
        .state
        .sweep
        .run_sweep(start_of_day(Utc::now()))
        .await
        .unwrap();

    assert_eq!(report.users, 1);
    assert_eq!(report.paid_out, 1);
    assert_eq!(app.balance(31).await, naira(14_500));

    let user = app.ledger().require_user(31).await.unwrap();
    assert_eq!(user.investments[0].status, InvestmentStatus::PaidOut);
    assert!(user.investments[0].payout_reference.is_some());
    assert_eq!(
        user.transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::InvestmentPayout)
            .count(),
        1
    );
    assert!(app.messenger.last_text(31).contains("Investment matured"));
}

#[tokio::test]
async fn test_second_sweep_finds_nothing() {
    let app = TestApp::new(false);
    matured_rookie(&app, 32).await;
    let as_of = start_of_day(Utc::now());

    app.state.sweep.run_sweep(as_of).await.unwrap();
    let again = app.state.sweep.run_sweep(as_of).await.unwrap();

    assert_eq!(again.processed(), 0);
    assert_eq!(app.balance(32).await, naira(14_500));
}

#[tokio::test]
async fn test_recorded_payout_on_active_investment_is_not_paid_twice() {
    let app = TestApp::new(false);
    matured_rookie(&app, 37).await;
    let investment = app.ledger().require_user(37).await.unwrap().investments[0].clone();
    // Payout landed but the status update did not.
    app.ledger()
        .pay_out_investment(37, &investment)
        .await
        .unwrap();
    assert_eq!(app.balance(37).await, naira(14_500));

    let report = app
        .state
        .sweep
        .run_sweep(start_of_day(Utc::now()))
        .await
        .unwrap();

    assert_eq!(report.already_settled, 1);
    assert_eq!(report.paid_out, 0);
    assert_eq!(app.balance(37).await, naira(14_500));
    let user = app.ledger().require_user(37).await.unwrap();
    assert_eq!(user.investments[0].status, InvestmentStatus::PaidOut);
    assert_eq!(
        user.transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::InvestmentPayout)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_payout_error_is_retried_on_next_sweep() {
    let app = TestApp::new(false);
    matured_rookie(&app, 38).await;
    let reference = app.ledger().require_user(38).await.unwrap().investments[0]
        .reference
        .clone();
    app.ledger()
        .update_investments(
            38,
            &[InvestmentUpdate {
                reference,
                status: InvestmentStatus::PayoutError,
                payout_reference: None,
                last_error: Some("database error: pool timed out".to_string()),
            }],
        )
        .await
        .unwrap();

    let report = app
        .state
        .sweep
        .run_sweep(start_of_day(Utc::now()))
        .await
        .unwrap();

    assert_eq!(report.paid_out, 1);
    assert_eq!(report.payout_errors, 0);
    assert_eq!(app.balance(38).await, naira(14_500));
    let user = app.ledger().require_user(38).await.unwrap();
    assert_eq!(user.investments[0].status, InvestmentStatus::PaidOut);
    assert!(user.investments[0].last_error.is_none());
}

#[tokio::test]
async fn test_investment_not_yet_due_is_untouched() {
    let app = TestApp::new(false);
    app.funded_user(33, naira(20_000)).await;
    app.ledger()
        .open_investment(33, "standard", naira(20_000), Utc::now())
        .await
        .unwrap();

    let report = app
        .state
        .sweep
        .run_sweep(start_of_day(Utc::now()))
        .await
        .unwrap();

    assert_eq!(report.processed(), 0);
    let user = app.ledger().require_user(33).await.unwrap();
    assert_eq!(user.investments[0].status, InvestmentStatus::Active);
}

#[tokio::test]
async fn test_unknown_plan_is_flagged_without_payout() {
    let app = TestApp::new(false);
    app.funded_user(34, naira(5_000)).await;
    let start = Utc::now() - Duration::days(10);
    let investment = Investment {
        reference: "INV-34-1".to_string(),
        plan_id: "retired".to_string(),
        principal: naira(5_000),
        start_date: start,
        maturity_date: start + Duration::days(3),
        projected_return: naira(6_000),
        status: InvestmentStatus::Active,
        payout_reference: None,
        last_error: None,
    };
    let txn = Transaction::new(
        TransactionKind::Investment,
        -naira(5_000),
        TransactionStatus::Completed,
        "INV-34-1",
        json!({"plan_id": "retired"}),
    );
    app.store.open_investment(34, investment, txn).await.unwrap();

    let report = app
        .state
        .sweep
        .run_sweep(start_of_day(Utc::now()))
        .await
        .unwrap();

    assert_eq!(report.plan_not_found, 1);
    assert_eq!(report.paid_out, 0);
    assert_eq!(app.balance(34).await, naira(0));
    let user = app.ledger().require_user(34).await.unwrap();
    assert_eq!(user.investments[0].status, InvestmentStatus::PlanNotFound);
}

#[tokio::test]
async fn test_sweep_route_rejects_bad_token() {
    let app = TestApp::with_options(false, common::bot_config(), Some("cron-secret".to_string()));
    matured_rookie(&app, 35).await;

    let response = build_router(app.state.clone())
        .oneshot(sweep_request(Some("wrong")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.balance(35).await, naira(0));
}

#[tokio::test]
async fn test_sweep_route_reports_payouts() {
    let app = TestApp::with_options(false, common::bot_config(), Some("cron-secret".to_string()));
    matured_rookie(&app, 36).await;

    let response = build_router(app.state.clone())
        .oneshot(sweep_request(Some("cron-secret")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["processed"], 1);
    assert_eq!(json["paid_out"], 1);
    assert_eq!(app.balance(36).await, naira(14_500));
}

#[tokio::test]
async fn test_sweep_route_with_nothing_due() {
    let app = TestApp::new(false);

    let response = build_router(app.state.clone())
        .oneshot(sweep_request(None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["processed"], 0);
    assert_eq!(json["message"], "no matured investments found");
}
