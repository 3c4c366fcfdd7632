//! Common type definitions shared across the crate.
//!
//! ID aliases keep signatures honest about which entity a [`Uuid`] refers
//! to:
//!
//! - [`EndpointId`]: published endpoint identifier
//! - [`CredentialId`]: access credential identifier
//! - [`AuditRecordId`]: immutable dispatch audit row identifier

use uuid::Uuid;

// Type aliases for IDs
pub type EndpointId = Uuid;
pub type CredentialId = Uuid;
pub type AuditRecordId = Uuid;

/// Rows returned from the query engine, already JSON-shaped.
pub type Rows = Vec<serde_json::Value>;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}
