//! Persistence-layer data models.
//!
//! These structs mirror the stored shape of each entity. Companion `*Create`
//! structs carry the caller-supplied fields for inserts; the store fills in
//! identifiers and timestamps.

pub mod credential;
pub mod endpoint;
pub mod usage;

pub use credential::{Credential, CredentialCreate};
pub use endpoint::{Endpoint, EndpointCreate, EndpointMethod, EndpointStatus, OperationKind, ParameterSpec};
pub use usage::{AuditRecord, AuditRecordCreate, UsageAggregate};
