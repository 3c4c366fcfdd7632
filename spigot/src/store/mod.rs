//! Storage abstraction for endpoints, credentials and usage telemetry.
//!
//! The request path and the usage writer only see the traits defined here.
//! Two implementations exist: [`postgres::PgStore`] for production and
//! [`memory::MemoryStore`] for tests and ephemeral deployments; behaviour is
//! identical, down to the lifecycle invariants enforced on writes.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::types::{CredentialId, EndpointId};
use models::{AuditRecordCreate, Credential, CredentialCreate, Endpoint, EndpointCreate, EndpointStatus, UsageAggregate};

/// Unified error type for storage operations that application code can handle.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Entity not found")]
    NotFound,

    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error("Foreign key constraint violation")]
    ForeignKeyViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error("Check constraint violation")]
    CheckViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// A lifecycle rule rejected the write, e.g. activating an endpoint that
    /// has no active credential.
    #[error("Invalid state transition: {message}")]
    InvalidTransition { message: String },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convert from sqlx::Error using sqlx's error categorization.
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    StoreError::UniqueViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_foreign_key_violation() {
                    StoreError::ForeignKeyViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_check_violation() {
                    StoreError::CheckViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else {
                    StoreError::Other(anyhow::Error::from(err))
                }
            }
            _ => StoreError::Other(anyhow::Error::from(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Published endpoints.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    /// Insert a new endpoint in `Draft` status. Fails with
    /// [`StoreError::UniqueViolation`] when `custom_path` is already taken.
    async fn create_endpoint(&self, create: &EndpointCreate) -> Result<Endpoint>;

    async fn endpoint_by_id(&self, id: EndpointId) -> Result<Option<Endpoint>>;

    async fn endpoint_by_path(&self, custom_path: &str) -> Result<Option<Endpoint>>;

    /// Move an endpoint to a new lifecycle status. Transitioning to `Active`
    /// requires at least one active credential and fails with
    /// [`StoreError::InvalidTransition`] otherwise.
    async fn set_endpoint_status(&self, id: EndpointId, status: EndpointStatus, updated_by: &str) -> Result<Endpoint>;
}

/// Access credentials. Secrets are stored as SHA-256 digests only.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new active credential. Any previously active credential for
    /// the same endpoint is revoked in the same operation, so at most one
    /// credential per endpoint is active at a time.
    async fn create_credential(&self, create: &CredentialCreate) -> Result<Credential>;

    /// Look up the active credential whose stored digest equals `hash`.
    /// Revoked credentials are invisible here, which is what makes
    /// revocation take effect on the very next request.
    async fn find_active_by_hash(&self, hash: &str) -> Result<Option<Credential>>;

    async fn credentials_by_endpoint(&self, endpoint_id: EndpointId) -> Result<Vec<Credential>>;

    /// One-way deactivation. Idempotent: revoking a revoked credential is a
    /// no-op.
    async fn revoke_credential(&self, id: CredentialId) -> Result<Credential>;

    /// Fold a batch of successful dispatches into the credential's lifetime
    /// counters. Called by the usage writer, never by the request path.
    async fn record_credential_usage(&self, id: CredentialId, delta: i64, at: DateTime<Utc>) -> Result<()>;
}

/// Usage telemetry: append-only audit rows and additive daily aggregates.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn insert_audit_records(&self, records: &[AuditRecordCreate]) -> Result<()>;

    /// Additively bump the (credential, endpoint, day) aggregate, creating
    /// the row on first use.
    async fn bump_usage_aggregate(
        &self,
        credential_id: CredentialId,
        endpoint_id: EndpointId,
        day: NaiveDate,
        delta: i64,
        last_used: DateTime<Utc>,
    ) -> Result<()>;

    async fn usage_for_day(
        &self,
        credential_id: CredentialId,
        endpoint_id: EndpointId,
        day: NaiveDate,
    ) -> Result<Option<UsageAggregate>>;
}
