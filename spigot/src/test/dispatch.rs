//! End-to-end dispatch behaviour through the HTTP surface.

use axum::http::StatusCode;
use serde_json::{Value, json};

use crate::store::models::{EndpointMethod, EndpointStatus, OperationKind, ParameterSpec};
use crate::store::{CredentialStore, EndpointStore};
use crate::test_utils::{MockEngine, active_credential, create_test_app, publish_endpoint};

fn rows(n: usize) -> Vec<Value> {
    (0..n).map(|i| json!({"id": i})).collect()
}

fn specs(names: &[&str]) -> Vec<ParameterSpec> {
    names
        .iter()
        .map(|name| ParameterSpec {
            name: name.to_string(),
            description: None,
        })
        .collect()
}

#[test_log::test(tokio::test)]
async fn secret_is_accepted_from_header_bearer_and_query() {
    let app = create_test_app(MockEngine::with_dataset(rows(1))).await;
    let (_, secret) = publish_endpoint(
        &app.store,
        OperationKind::Query,
        EndpointMethod::Get,
        Some("orders"),
        "SELECT * FROM orders",
        vec![],
    )
    .await;

    let via_header = app.server.get("/v1/orders").add_header("x-api-key", &secret).await;
    via_header.assert_status_ok();

    let via_bearer = app
        .server
        .get("/v1/orders")
        .add_header("authorization", format!("Bearer {secret}"))
        .await;
    via_bearer.assert_status_ok();

    let via_query = app.server.get(&format!("/v1/orders?API_KEY={secret}")).await;
    via_query.assert_status_ok();

    let body: Value = via_header.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"][0]["id"], 0);
}

#[test_log::test(tokio::test)]
async fn secret_in_trailing_path_segment_resolves_via_custom_path() {
    let app = create_test_app(MockEngine::with_dataset(rows(2))).await;
    let (_, secret) = publish_endpoint(
        &app.store,
        OperationKind::Table,
        EndpointMethod::Get,
        Some("sales-report"),
        "sales",
        vec![],
    )
    .await;

    let response = app.server.get(&format!("/v1/sales-report/{secret}")).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["metadata"]["type"], "table");
}

#[test_log::test(tokio::test)]
async fn secret_shaped_sole_path_segment_acts_as_credential() {
    let app = create_test_app(MockEngine::with_dataset(rows(1))).await;
    let (_, secret) = publish_endpoint(
        &app.store,
        OperationKind::Function,
        EndpointMethod::Get,
        None,
        "current_totals",
        vec![],
    )
    .await;

    // No header, no query: the 64-hex segment is both the credential and,
    // through it, the endpoint locator.
    let response = app.server.get(&format!("/v1/{secret}")).await;
    response.assert_status_ok();

    let executed = app.engine.executed();
    assert_eq!(executed[0].0, "SELECT current_totals()");
}

#[test_log::test(tokio::test)]
async fn missing_and_unknown_secrets_are_unauthorized() {
    let app = create_test_app(MockEngine::new()).await;
    publish_endpoint(
        &app.store,
        OperationKind::Query,
        EndpointMethod::Get,
        Some("orders"),
        "SELECT 1",
        vec![],
    )
    .await;

    let missing = app.server.get("/v1/orders").await;
    missing.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = missing.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "unauthorized");

    let unknown = app.server.get("/v1/orders").add_header("x-api-key", "wrong").await;
    unknown.assert_status(StatusCode::UNAUTHORIZED);

    // The engine was never touched.
    assert!(app.engine.executed().is_empty());
}

#[test_log::test(tokio::test)]
async fn revocation_takes_effect_on_the_next_request() {
    let app = create_test_app(MockEngine::with_dataset(rows(1))).await;
    let (endpoint, secret) = publish_endpoint(
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
        .assert_status_ok();

    let credential = active_credential(&app.store, &endpoint).await;
    app.store.revoke_credential(credential.id).await.unwrap();

    let after = app.server.get("/v1/orders").add_header("x-api-key", &secret).await;
    after.assert_status(StatusCode::UNAUTHORIZED);
}

#[test_log::test(tokio::test)]
async fn method_gate_rejects_other_verbs() {
    let app = create_test_app(MockEngine::with_dataset(rows(1))).await;
    let (_, secret) = publish_endpoint(
        &app.store,
        OperationKind::StoredProcedure,
        EndpointMethod::Post,
        Some("refresh"),
        "refresh_totals",
        vec![],
    )
    .await;

    let wrong = app.server.get("/v1/refresh").add_header("x-api-key", &secret).await;
    wrong.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    let body: Value = wrong.json();
    assert_eq!(body["error"], "method_not_allowed");
    assert!(body["message"].as_str().unwrap().contains("POST"));

    app.server
        .post("/v1/refresh")
        .add_header("x-api-key", &secret)
        .await
        .assert_status_ok();
}

#[test_log::test(tokio::test)]
async fn credential_for_another_endpoint_is_forbidden() {
    let app = create_test_app(MockEngine::with_dataset(rows(1))).await;
    let (_, secret_a) = publish_endpoint(
        &app.store,
        OperationKind::Query,
        EndpointMethod::Get,
        Some("alpha"),
        "SELECT 1",
        vec![],
    )
    .await;
    publish_endpoint(
        &app.store,
        OperationKind::Query,
        EndpointMethod::Get,
        Some("beta"),
        "SELECT 2",
        vec![],
    )
    .await;

    let response = app.server.get("/v1/beta").add_header("x-api-key", &secret_a).await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"], "forbidden");
}

#[test_log::test(tokio::test)]
async fn non_active_endpoints_do_not_serve() {
    let app = create_test_app(MockEngine::with_dataset(rows(1))).await;
    let (endpoint, secret) = publish_endpoint(
        &app.store,
        OperationKind::Query,
        EndpointMethod::Get,
        Some("orders"),
        "SELECT 1",
        vec![],
    )
    .await;
    app.store
        .set_endpoint_status(endpoint.id, EndpointStatus::Suspended, "tests")
        .await
        .unwrap();

    let response = app.server.get("/v1/orders").add_header("x-api-key", &secret).await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert!(body["message"].as_str().unwrap().contains("suspended"));
}

#[test_log::test(tokio::test)]
async fn table_pagination_flows_through_to_the_engine() {
    let app = create_test_app(MockEngine::with_dataset(rows(25))).await;
    let (_, secret) = publish_endpoint(
        &app.store,
        OperationKind::Table,
        EndpointMethod::Get,
        Some("orders"),
        "orders",
        vec![],
    )
    .await;

    let all = app.server.get("/v1/orders").add_header("x-api-key", &secret).await;
    all.assert_status_ok();
    let body: Value = all.json();
    assert_eq!(body["metadata"]["rowCount"], 25);

    let page = app
        .server
        .get("/v1/orders?limit=10&offset=20")
        .add_header("x-api-key", &secret)
        .await;
    page.assert_status_ok();
    let body: Value = page.json();
    assert_eq!(body["metadata"]["rowCount"], 5);
    assert_eq!(body["data"][0]["id"], 20);

    let executed = app.engine.executed();
    assert_eq!(executed[0].0, "SELECT * FROM orders LIMIT ? OFFSET ?");
    assert_eq!(executed[0].1, vec![json!(1000), json!(0)]);
    assert_eq!(executed[1].1, vec![json!(10), json!(20)]);
}

#[test_log::test(tokio::test)]
async fn named_body_params_arrive_in_declared_order() {
    let app = create_test_app(MockEngine::with_dataset(rows(1))).await;
    let (_, secret) = publish_endpoint(
        &app.store,
        OperationKind::Function,
        EndpointMethod::Post,
        Some("totals"),
        "order_total",
        specs(&["region", "year"]),
    )
    .await;

    app.server
        .post("/v1/totals")
        .add_header("x-api-key", &secret)
        .json(&json!({"params": {"year": 2024, "region": "emea"}}))
        .await
        .assert_status_ok();

    let executed = app.engine.executed();
    assert_eq!(executed[0].0, "SELECT order_total(?, ?)");
    assert_eq!(executed[0].1, vec![json!("emea"), json!(2024)]);
}

#[test_log::test(tokio::test)]
async fn hostile_parameters_stay_out_of_statement_text() {
    let app = create_test_app(MockEngine::with_dataset(rows(1))).await;
    let (_, secret) = publish_endpoint(
        &app.store,
        OperationKind::Query,
        EndpointMethod::Post,
        Some("orders"),
        "SELECT * FROM orders WHERE region = ?",
        specs(&["region"]),
    )
    .await;

    let hostile = "'; DROP TABLE orders; --";
    app.server
        .post("/v1/orders")
        .add_header("x-api-key", &secret)
        .json(&json!({"params": [hostile]}))
        .await
        .assert_status_ok();

    let executed = app.engine.executed();
    assert_eq!(executed[0].0, "SELECT * FROM orders WHERE region = ?");
    assert_eq!(executed[0].1, vec![json!(hostile)]);
}

#[test_log::test(tokio::test)]
async fn execution_failures_render_the_failure_envelope_and_release_the_session() {
    let app = create_test_app(MockEngine::new()).await;
    app.engine.fail_executions("relation \"orders\" does not exist");
    let (_, secret) = publish_endpoint(
        &app.store,
        OperationKind::Query,
        EndpointMethod::Get,
        Some("orders"),
        "SELECT * FROM orders",
        vec![],
    )
    .await;

    let response = app.server.get("/v1/orders").add_header("x-api-key", &secret).await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "execution_failed");
    assert!(body["message"].as_str().unwrap().contains("orders"));

    assert_eq!(app.engine.open_sessions(), 0);
}

#[test_log::test(tokio::test)]
async fn success_envelope_carries_metadata() {
    let app = create_test_app(MockEngine::with_dataset(rows(3))).await;
    let (_, secret) = publish_endpoint(
        &app.store,
        OperationKind::Table,
        EndpointMethod::Get,
        Some("orders"),
        "orders",
        vec![],
    )
    .await;

    let response = app.server.get("/v1/orders").add_header("x-api-key", &secret).await;
    let body: Value = response.json();

    assert_eq!(body["success"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    assert_eq!(body["metadata"]["rowCount"], 3);
    assert_eq!(body["metadata"]["type"], "table");
    assert!(body["metadata"]["endpoint"].is_string());
    assert!(body["metadata"]["timestamp"].is_string());
}

#[test_log::test(tokio::test)]
async fn health_check_is_open() {
    let app = create_test_app(MockEngine::new()).await;
    let response = app.server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("OK");
}

#[test_log::test(tokio::test)]
async fn openapi_document_is_served() {
    let app = create_test_app(MockEngine::new()).await;
    let response = app.server.get("/api-docs/openapi.json").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["paths"]["/v1/{endpoint}"].is_object());
}
