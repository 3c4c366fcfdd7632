//! Usage accounting through the full request path.

use axum::http::StatusCode;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;

use crate::store::models::{EndpointMethod, OperationKind};
use crate::store::UsageStore;
use crate::test_utils::{MockEngine, active_credential, create_test_app, publish_endpoint};

#[test_log::test(tokio::test)]
async fn concurrent_requests_are_counted_exactly_once_each() {
    let app = create_test_app(MockEngine::with_dataset(vec![json!({"ok": true})])).await;
    let (endpoint, secret) = publish_endpoint(
        &app.store,
        OperationKind::Query,
        EndpointMethod::Get,
        Some("orders"),
        "SELECT 1",
        vec![],
    )
    .await;
    let credential = active_credential(&app.store, &endpoint).await;

    const REQUESTS: usize = 12;
    let responses = join_all(
        (0..REQUESTS).map(|_| async { app.server.get("/v1/orders").add_header("x-api-key", &secret).await }),
    )
    .await;
    for response in responses {
        response.assert_status_ok();
    }

    // Drain the recorder so every queued record is flushed.
    app.bg_services.shutdown().await;

    let day = Utc::now().date_naive();
    let aggregate = app
        .store
        .usage_for_day(credential.id, endpoint.id, day)
        .await
        .unwrap()
        .expect("aggregate row should exist");
    assert_eq!(aggregate.request_count, REQUESTS as i64);

    let credential = active_credential(&app.store, &endpoint).await;
    assert_eq!(credential.usage_count, REQUESTS as i64);
    assert!(credential.last_used_at.is_some());

    assert_eq!(app.store.audit_records().len(), REQUESTS);
}

#[test_log::test(tokio::test)]
async fn rejected_attempts_are_audited_without_aggregates() {
    let app = create_test_app(MockEngine::new()).await;
    let (endpoint, _) = publish_endpoint(
        &app.store,
        OperationKind::Query,
        EndpointMethod::Get,
        Some("orders"),
        "SELECT 1",
        vec![],
    )
    .await;
    let credential = active_credential(&app.store, &endpoint).await;

    app.server
        .get("/v1/orders")
        .add_header("x-api-key", "not-the-secret")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    app.bg_services.shutdown().await;

    let records = app.store.audit_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status_code, 401);
    assert!(records[0].credential_id.is_none());
    assert!(records[0].error.as_deref().unwrap().contains("unauthorized"));

    let day = Utc::now().date_naive();
    assert!(app.store.usage_for_day(credential.id, endpoint.id, day).await.unwrap().is_none());
}

#[test_log::test(tokio::test)]
async fn audit_trail_never_carries_plaintext_secrets() {
    let app = create_test_app(MockEngine::with_dataset(vec![json!({"ok": true})])).await;
    let (_, secret) = publish_endpoint(
        &app.store,
        OperationKind::Query,
        EndpointMethod::Post,
        Some("orders"),
        "SELECT 1",
        vec![],
    )
    .await;

    // Secret travels in the query string and a token-like field sits in the
    // body; neither may survive into the audit row.
    app.server
        .post(&format!("/v1/orders?API_KEY={secret}"))
        .json(&json!({"params": [1], "api_key": "also-sensitive"}))
        .await
        .assert_status_ok();

    app.bg_services.shutdown().await;

    let records = app.store.audit_records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].uri.contains(&secret));
    let body = records[0].request_body.as_ref().unwrap();
    assert_eq!(body["api_key"], "[REDACTED]");
    assert_eq!(body["params"][0], 1);
}

#[test_log::test(tokio::test)]
async fn execution_failures_are_audited_with_the_error() {
    let app = create_test_app(MockEngine::new()).await;
    app.engine.fail_executions("boom");
    let (_, secret) = publish_endpoint(
        &app.store,
        OperationKind::Query,
        EndpointMethod::Get,
        Some("orders"),
        "SELECT 1",
        vec![],
    )
    .await;

    app.server
        .get("/v1/orders")
        .add_header("x-api-key", &secret)
        .await
        .assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    app.bg_services.shutdown().await;

    let records = app.store.audit_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status_code, 500);
    assert!(records[0].error.as_deref().unwrap().contains("execution_failed"));
    // Both ids resolved before execution failed, so they are recorded.
    assert!(records[0].credential_id.is_some());
    assert!(records[0].endpoint_id.is_some());
}
