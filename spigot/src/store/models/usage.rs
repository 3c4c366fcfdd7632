//! Usage telemetry models: per-request audit rows and per-day aggregates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::types::{AuditRecordId, CredentialId, EndpointId};

/// Immutable record of a single dispatch attempt. Written for every attempt,
/// including rejected ones, which is why the id columns are nullable.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: AuditRecordId,
    pub credential_id: Option<CredentialId>,
    pub endpoint_id: Option<EndpointId>,
    pub method: String,
    pub uri: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Request body with sensitive fields already redacted.
    pub request_body: Option<serde_json::Value>,
    pub request_bytes: i64,
    pub response_bytes: i64,
    pub status_code: i32,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuditRecordCreate {
    pub credential_id: Option<CredentialId>,
    pub endpoint_id: Option<EndpointId>,
    pub method: String,
    pub uri: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_body: Option<serde_json::Value>,
    pub request_bytes: i64,
    pub response_bytes: i64,
    pub status_code: i32,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One row per (credential, endpoint, day). `request_count` is bumped
/// additively so concurrent writers never lose counts.
#[derive(Debug, Clone, Serialize)]
pub struct UsageAggregate {
    pub credential_id: CredentialId,
    pub endpoint_id: EndpointId,
    pub day: NaiveDate,
    pub request_count: i64,
    pub last_used: DateTime<Utc>,
}
