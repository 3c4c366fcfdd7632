//! In-memory store implementation.
//!
//! Backs tests and ephemeral deployments. All maps live behind a single
//! `RwLock` so that multi-entity writes (credential rotation, activation
//! checks) observe a consistent view, mirroring what the Postgres
//! implementation gets from transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::models::{
    AuditRecord, AuditRecordCreate, Credential, CredentialCreate, Endpoint, EndpointCreate, EndpointStatus, UsageAggregate,
};
use super::{CredentialStore, EndpointStore, Result, StoreError, UsageStore};
use crate::types::{CredentialId, EndpointId};

#[derive(Default)]
struct Inner {
    endpoints: HashMap<EndpointId, Endpoint>,
    paths: HashMap<String, EndpointId>,
    credentials: HashMap<CredentialId, Credential>,
    secret_hashes: HashMap<String, CredentialId>,
    aggregates: HashMap<(CredentialId, EndpointId, NaiveDate), UsageAggregate>,
    audit: Vec<AuditRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all audit rows, oldest first. Used by tests to assert on
    /// what the usage writer flushed.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.inner.read().audit.clone()
    }
}

#[async_trait]
impl EndpointStore for MemoryStore {
    async fn create_endpoint(&self, create: &EndpointCreate) -> Result<Endpoint> {
        let mut inner = self.inner.write();

        if let Some(path) = &create.custom_path {
            if inner.paths.contains_key(path) {
                return Err(StoreError::UniqueViolation {
                    constraint: Some("endpoints_custom_path_key".to_string()),
                    table: Some("endpoints".to_string()),
                    message: format!("custom path '{path}' is already in use"),
                });
            }
        }

        let now = Utc::now();
        let endpoint = Endpoint {
            id: Uuid::new_v4(),
            custom_path: create.custom_path.clone(),
            name: create.name.clone(),
            kind: create.kind,
            target: create.target.clone(),
            method: create.method,
            parameters: create.parameters.clone(),
            rate_limit: create.rate_limit,
            status: EndpointStatus::Draft,
            tags: create.tags.clone(),
            metadata: create.metadata.clone(),
            created_by: create.created_by.clone(),
            created_at: now,
            updated_by: None,
            updated_at: now,
        };

        if let Some(path) = &endpoint.custom_path {
            inner.paths.insert(path.clone(), endpoint.id);
        }
        inner.endpoints.insert(endpoint.id, endpoint.clone());
        Ok(endpoint)
    }

    async fn endpoint_by_id(&self, id: EndpointId) -> Result<Option<Endpoint>> {
        Ok(self.inner.read().endpoints.get(&id).cloned())
    }

    async fn endpoint_by_path(&self, custom_path: &str) -> Result<Option<Endpoint>> {
        let inner = self.inner.read();
        Ok(inner
            .paths
            .get(custom_path)
            .and_then(|id| inner.endpoints.get(id))
            .cloned())
    }

    async fn set_endpoint_status(&self, id: EndpointId, status: EndpointStatus, updated_by: &str) -> Result<Endpoint> {
        let mut inner = self.inner.write();

        if status == EndpointStatus::Active {
            let has_active_credential = inner
                .credentials
                .values()
                .any(|c| c.endpoint_id == id && c.is_active);
            if !has_active_credential {
                return Err(StoreError::InvalidTransition {
                    message: "endpoint cannot be activated without an active credential".to_string(),
                });
            }
        }

        let endpoint = inner.endpoints.get_mut(&id).ok_or(StoreError::NotFound)?;
        endpoint.status = status;
        endpoint.updated_by = Some(updated_by.to_string());
        endpoint.updated_at = Utc::now();
        Ok(endpoint.clone())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_credential(&self, create: &CredentialCreate) -> Result<Credential> {
        let mut inner = self.inner.write();

        if !inner.endpoints.contains_key(&create.endpoint_id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: Some("credentials_endpoint_id_fkey".to_string()),
                table: Some("credentials".to_string()),
                message: "endpoint does not exist".to_string(),
            });
        }
        if inner.secret_hashes.contains_key(&create.secret_hash) {
            return Err(StoreError::UniqueViolation {
                constraint: Some("credentials_secret_hash_key".to_string()),
                table: Some("credentials".to_string()),
                message: "secret hash collision".to_string(),
            });
        }

        // Rotation: minting a credential retires the previous one.
        for credential in inner.credentials.values_mut() {
            if credential.endpoint_id == create.endpoint_id && credential.is_active {
                credential.is_active = false;
            }
        }

        let credential = Credential {
            id: Uuid::new_v4(),
            secret_hash: create.secret_hash.clone(),
            endpoint_id: create.endpoint_id,
            is_active: true,
            created_by: create.created_by.clone(),
            created_at: Utc::now(),
            last_used_at: None,
            usage_count: 0,
        };
        inner.secret_hashes.insert(credential.secret_hash.clone(), credential.id);
        inner.credentials.insert(credential.id, credential.clone());
        Ok(credential)
    }

    async fn find_active_by_hash(&self, hash: &str) -> Result<Option<Credential>> {
        let inner = self.inner.read();
        Ok(inner
            .secret_hashes
            .get(hash)
            .and_then(|id| inner.credentials.get(id))
            .filter(|c| c.is_active)
            .cloned())
    }

    async fn credentials_by_endpoint(&self, endpoint_id: EndpointId) -> Result<Vec<Credential>> {
        let inner = self.inner.read();
        let mut credentials: Vec<Credential> = inner
            .credentials
            .values()
            .filter(|c| c.endpoint_id == endpoint_id)
            .cloned()
            .collect();
        credentials.sort_by_key(|c| c.created_at);
        Ok(credentials)
    }

    async fn revoke_credential(&self, id: CredentialId) -> Result<Credential> {
        let mut inner = self.inner.write();
        let credential = inner.credentials.get_mut(&id).ok_or(StoreError::NotFound)?;
        credential.is_active = false;
        Ok(credential.clone())
    }

    async fn record_credential_usage(&self, id: CredentialId, delta: i64, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        let credential = inner.credentials.get_mut(&id).ok_or(StoreError::NotFound)?;
        credential.usage_count += delta;
        credential.last_used_at = Some(credential.last_used_at.map_or(at, |prev| prev.max(at)));
        Ok(())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn insert_audit_records(&self, records: &[AuditRecordCreate]) -> Result<()> {
        let mut inner = self.inner.write();
        for record in records {
            inner.audit.push(AuditRecord {
                id: Uuid::new_v4(),
                credential_id: record.credential_id,
                endpoint_id: record.endpoint_id,
                method: record.method.clone(),
                uri: record.uri.clone(),
                client_ip: record.client_ip.clone(),
                user_agent: record.user_agent.clone(),
                request_body: record.request_body.clone(),
                request_bytes: record.request_bytes,
                response_bytes: record.response_bytes,
                status_code: record.status_code,
                duration_ms: record.duration_ms,
                error: record.error.clone(),
                created_at: record.created_at,
            });
        }
        Ok(())
    }

    async fn bump_usage_aggregate(
        &self,
        credential_id: CredentialId,
        endpoint_id: EndpointId,
        day: NaiveDate,
        delta: i64,
        last_used: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .aggregates
            .entry((credential_id, endpoint_id, day))
            .and_modify(|aggregate| {
                aggregate.request_count += delta;
                aggregate.last_used = aggregate.last_used.max(last_used);
            })
            .or_insert(UsageAggregate {
                credential_id,
                endpoint_id,
                day,
                request_count: delta,
                last_used,
            });
        Ok(())
    }

    async fn usage_for_day(
        &self,
        credential_id: CredentialId,
        endpoint_id: EndpointId,
        day: NaiveDate,
    ) -> Result<Option<UsageAggregate>> {
        Ok(self.inner.read().aggregates.get(&(credential_id, endpoint_id, day)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{EndpointMethod, OperationKind};

    fn endpoint_create(path: Option<&str>) -> EndpointCreate {
        EndpointCreate {
            custom_path: path.map(|p| p.to_string()),
            name: "orders by region".to_string(),
            kind: OperationKind::Query,
            target: "SELECT * FROM orders WHERE region = ?".to_string(),
            method: EndpointMethod::Post,
            parameters: vec![],
            rate_limit: 60,
            tags: vec![],
            metadata: serde_json::json!({}),
            created_by: "tests".to_string(),
        }
    }

    #[tokio::test]
    async fn custom_paths_are_unique() {
        let store = MemoryStore::new();
        store.create_endpoint(&endpoint_create(Some("orders"))).await.unwrap();
        let err = store.create_endpoint(&endpoint_create(Some("orders"))).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn activation_requires_an_active_credential() {
        let store = MemoryStore::new();
        let endpoint = store.create_endpoint(&endpoint_create(None)).await.unwrap();

        let err = store
            .set_endpoint_status(endpoint.id, EndpointStatus::Active, "tests")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        store
            .create_credential(&CredentialCreate {
                endpoint_id: endpoint.id,
                secret_hash: "a".repeat(64),
                created_by: "tests".to_string(),
            })
            .await
            .unwrap();
        let endpoint = store
            .set_endpoint_status(endpoint.id, EndpointStatus::Active, "tests")
            .await
            .unwrap();
        assert_eq!(endpoint.status, EndpointStatus::Active);
    }

    #[tokio::test]
    async fn minting_a_credential_retires_the_previous_one() {
        let store = MemoryStore::new();
        let endpoint = store.create_endpoint(&endpoint_create(None)).await.unwrap();

        let first = store
            .create_credential(&CredentialCreate {
                endpoint_id: endpoint.id,
                secret_hash: "a".repeat(64),
                created_by: "tests".to_string(),
            })
            .await
            .unwrap();
        let second = store
            .create_credential(&CredentialCreate {
                endpoint_id: endpoint.id,
                secret_hash: "b".repeat(64),
                created_by: "tests".to_string(),
            })
            .await
            .unwrap();

        assert!(store.find_active_by_hash(&first.secret_hash).await.unwrap().is_none());
        assert!(store.find_active_by_hash(&second.secret_hash).await.unwrap().is_some());

        let active: Vec<Credential> = store
            .credentials_by_endpoint(endpoint.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
    }

    #[tokio::test]
    async fn revoked_credentials_are_invisible_to_hash_lookup() {
        let store = MemoryStore::new();
        let endpoint = store.create_endpoint(&endpoint_create(None)).await.unwrap();
        let credential = store
            .create_credential(&CredentialCreate {
                endpoint_id: endpoint.id,
                secret_hash: "c".repeat(64),
                created_by: "tests".to_string(),
            })
            .await
            .unwrap();

        store.revoke_credential(credential.id).await.unwrap();
        assert!(store.find_active_by_hash(&credential.secret_hash).await.unwrap().is_none());

        // Revocation is idempotent and one-way.
        let again = store.revoke_credential(credential.id).await.unwrap();
        assert!(!again.is_active);
    }

    #[tokio::test]
    async fn aggregates_accumulate_additively() {
        let store = MemoryStore::new();
        let endpoint = store.create_endpoint(&endpoint_create(None)).await.unwrap();
        let credential = store
            .create_credential(&CredentialCreate {
                endpoint_id: endpoint.id,
                secret_hash: "d".repeat(64),
                created_by: "tests".to_string(),
            })
            .await
            .unwrap();

        let day = Utc::now().date_naive();
        let now = Utc::now();
        store
            .bump_usage_aggregate(credential.id, endpoint.id, day, 3, now)
            .await
            .unwrap();
        store
            .bump_usage_aggregate(credential.id, endpoint.id, day, 4, now)
            .await
            .unwrap();

        let aggregate = store.usage_for_day(credential.id, endpoint.id, day).await.unwrap().unwrap();
        assert_eq!(aggregate.request_count, 7);
    }
}
