//! Access credential model.
//!
//! A credential stores only the SHA-256 digest of its secret. Revocation is
//! one-way: `is_active` can move from `true` to `false` and never back.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{CredentialId, EndpointId};

#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    pub id: CredentialId,
    /// Hex-encoded SHA-256 digest of the plaintext secret.
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub endpoint_id: EndpointId,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
}

#[derive(Debug, Clone)]
pub struct CredentialCreate {
    pub endpoint_id: EndpointId,
    pub secret_hash: String,
    pub created_by: String,
}
