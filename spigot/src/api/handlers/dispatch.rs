//! The dispatch handler behind `/v1/{endpoint}` and `/v1/{endpoint}/{trailing}`.
//!
//! Registered with `any()` so the endpoint's own method gate decides which
//! verbs are acceptable. The handler runs the pipeline stages in order,
//! renders the uniform envelope, and emits a usage record for every attempt
//! before returning, carrying whichever ids managed to resolve.

use std::collections::HashMap;
use std::time::Instant;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use metrics::{counter, histogram};
use serde_json::json;
use tracing::instrument;

use crate::AppState;
use crate::api::models::DispatchSuccess;
use crate::auth::{TokenCandidate, extract_candidate, is_secret_shaped, resolve_credential};
use crate::dispatch::{enforce_method, execute, invocation::Invocation, resolve_endpoint};
use crate::errors::Result;
use crate::types::{CredentialId, EndpointId};
use crate::usage::DispatchRecord;

#[utoipa::path(
    method(get, post, put, delete),
    path = "/v1/{endpoint}",
    tag = "dispatch",
    summary = "Invoke a published endpoint",
    description = "Runs the stored operation behind the addressed endpoint. The secret may travel in the \
                   `X-API-Key` header, an `Authorization: Bearer` header, an `API_KEY` or `token` query \
                   parameter, or as a secret-shaped path segment.",
    request_body = Object,
    params(("endpoint" = String, Path, description = "Custom path, endpoint id, or the secret itself")),
    responses(
        (status = 200, description = "Operation executed", body = DispatchSuccess),
        (status = 401, description = "Missing or invalid credential", body = crate::api::models::DispatchFailure),
        (status = 403, description = "Credential does not grant access, or endpoint is not active", body = crate::api::models::DispatchFailure),
        (status = 405, description = "Endpoint is published under a different method", body = crate::api::models::DispatchFailure),
        (status = 500, description = "Execution failed", body = crate::api::models::DispatchFailure),
    ),
    security(("api_key" = []))
)]
pub async fn dispatch_root(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    method: Method,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    body: Bytes,
) -> Response {
    handle(state, vec![endpoint], method, headers, raw_query, body).await
}

#[utoipa::path(
    method(get, post, put, delete),
    path = "/v1/{endpoint}/{trailing}",
    tag = "dispatch",
    summary = "Invoke a published endpoint, secret in the trailing segment",
    request_body = Object,
    params(
        ("endpoint" = String, Path, description = "Custom path or endpoint id"),
        ("trailing" = String, Path, description = "Secret-shaped segment carrying the credential"),
    ),
    responses(
        (status = 200, description = "Operation executed", body = DispatchSuccess),
        (status = 401, description = "Missing or invalid credential", body = crate::api::models::DispatchFailure),
    ),
    security(("api_key" = []))
)]
pub async fn dispatch_trailing(
    State(state): State<AppState>,
    Path((endpoint, trailing)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    body: Bytes,
) -> Response {
    handle(state, vec![endpoint, trailing], method, headers, raw_query, body).await
}

#[instrument(skip_all, fields(method = %method))]
async fn handle(
    state: AppState,
    segments: Vec<String>,
    method: Method,
    headers: HeaderMap,
    raw_query: Option<String>,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let timestamp = Utc::now();

    let query = parse_query(raw_query.as_deref());
    let segment_refs: Vec<&str> = segments.iter().map(String::as_str).collect();
    let candidate = extract_candidate(&headers, &query, &segment_refs);
    let body_json: Option<serde_json::Value> = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(&body).ok()
    };

    let mut credential_id = None;
    let mut endpoint_id = None;
    let result = run_pipeline(
        &state,
        candidate.as_ref(),
        &segment_refs,
        &method,
        &query,
        body_json.as_ref(),
        &mut credential_id,
        &mut endpoint_id,
    )
    .await;

    let (status, payload, error) = match result {
        Ok(envelope) => (StatusCode::OK, to_payload(&envelope), None),
        Err(err) => {
            err.log();
            let message = format!("{}: {}", err.kind(), err.user_message());
            (err.status_code(), to_payload(&err.failure_envelope()), Some(message))
        }
    };

    let response_bytes = serde_json::to_vec(&payload).map(|b| b.len() as i64).unwrap_or(0);
    state.usage.record(DispatchRecord {
        credential_id,
        endpoint_id,
        method: method.to_string(),
        uri: sanitized_uri(&segment_refs, &query),
        client_ip: client_ip(&headers),
        user_agent: header_value(&headers, "user-agent"),
        request_body: body_json,
        request_bytes: body.len() as i64,
        response_bytes,
        status_code: status.as_u16() as i32,
        duration_ms: started.elapsed().as_millis() as i64,
        error,
        timestamp,
    });

    counter!("spigot_dispatch_requests_total", "status" => status.as_u16().to_string()).increment(1);
    histogram!("spigot_dispatch_duration_seconds").record(started.elapsed().as_secs_f64());

    (status, Json(payload)).into_response()
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    state: &AppState,
    candidate: Option<&TokenCandidate>,
    segments: &[&str],
    method: &Method,
    query: &HashMap<String, String>,
    body: Option<&serde_json::Value>,
    credential_id: &mut Option<CredentialId>,
    endpoint_id: &mut Option<EndpointId>,
) -> Result<DispatchSuccess> {
    let credential = resolve_credential(state.credentials.as_ref(), candidate).await?;
    *credential_id = Some(credential.id);

    let locator = locator_segment(segments, candidate);
    let endpoint = resolve_endpoint(state.endpoints.as_ref(), locator, &credential).await?;
    *endpoint_id = Some(endpoint.id);

    enforce_method(&endpoint, method)?;

    let invocation = Invocation::from_request(&endpoint.parameters, query, body);
    let outcome = execute(state.engine.as_ref(), &endpoint, invocation).await?;
    Ok(DispatchSuccess::new(&endpoint, outcome))
}

/// The first path segment locates the endpoint, unless token extraction
/// already consumed it as the secret. The trailing segment never locates
/// anything.
fn locator_segment<'a>(segments: &[&'a str], candidate: Option<&TokenCandidate>) -> Option<&'a str> {
    match candidate.and_then(|c| c.consumed_path_index) {
        Some(0) => None,
        _ => segments.first().copied(),
    }
}

fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let Some(raw) = raw else {
        return HashMap::new();
    };
    // First occurrence of a key wins.
    let mut query = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        query.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    query
}

fn to_payload<T: serde::Serialize>(envelope: &T) -> serde_json::Value {
    serde_json::to_value(envelope).unwrap_or_else(|_| {
        json!({"success": false, "error": "internal_error", "message": "An internal error occurred"})
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(|v| v.to_string())
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "x-forwarded-for").map(|v| v.split(',').next().unwrap_or("").trim().to_string())
}

/// Rebuild the request URI for the audit trail with secrets masked: secret-
/// shaped path segments and credential-carrying query values never reach
/// storage.
fn sanitized_uri(segments: &[&str], query: &HashMap<String, String>) -> String {
    let mut uri = String::from("/v1");
    for segment in segments {
        uri.push('/');
        uri.push_str(if is_secret_shaped(segment) { "[REDACTED]" } else { segment });
    }
    let mut keys: Vec<&String> = query.keys().collect();
    keys.sort();
    let mut first = true;
    for key in keys {
        uri.push(if first { '?' } else { '&' });
        first = false;
        uri.push_str(key);
        uri.push('=');
        if matches!(key.as_str(), "API_KEY" | "token") {
            uri.push_str("[REDACTED]");
        } else {
            uri.push_str(&query[key]);
        }
    }
    uri
}
