//! Postgres store implementation.
//!
//! Uses runtime-checked queries throughout; the schema lives in the crate's
//! `migrations/` directory and is applied via [`crate::migrator`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::models::{AuditRecordCreate, Credential, CredentialCreate, Endpoint, EndpointCreate, EndpointStatus, UsageAggregate};
use super::{CredentialStore, EndpointStore, Result, StoreError, UsageStore};
use crate::types::{CredentialId, EndpointId};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ENDPOINT_COLUMNS: &str =
    "id, custom_path, name, kind, target, method, parameters, rate_limit, status, tags, metadata, created_by, created_at, updated_by, updated_at";

const CREDENTIAL_COLUMNS: &str = "id, secret_hash, endpoint_id, is_active, created_by, created_at, last_used_at, usage_count";

fn endpoint_from_row(row: &PgRow) -> Result<Endpoint> {
    let parameters: serde_json::Value = row.try_get("parameters")?;
    let parameters = serde_json::from_value(parameters)
        .map_err(|e| StoreError::Other(anyhow::Error::from(e).context("malformed parameters column")))?;
    Ok(Endpoint {
        id: row.try_get("id")?,
        custom_path: row.try_get("custom_path")?,
        name: row.try_get("name")?,
        kind: row.try_get("kind")?,
        target: row.try_get("target")?,
        method: row.try_get("method")?,
        parameters,
        rate_limit: row.try_get("rate_limit")?,
        status: row.try_get("status")?,
        tags: row.try_get("tags")?,
        metadata: row.try_get("metadata")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_by: row.try_get("updated_by")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn credential_from_row(row: &PgRow) -> Result<Credential> {
    Ok(Credential {
        id: row.try_get("id")?,
        secret_hash: row.try_get("secret_hash")?,
        endpoint_id: row.try_get("endpoint_id")?,
        is_active: row.try_get("is_active")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        last_used_at: row.try_get("last_used_at")?,
        usage_count: row.try_get("usage_count")?,
    })
}

#[async_trait]
impl EndpointStore for PgStore {
    async fn create_endpoint(&self, create: &EndpointCreate) -> Result<Endpoint> {
        let parameters = serde_json::to_value(&create.parameters)
            .map_err(|e| StoreError::Other(anyhow::Error::from(e).context("serialize parameters")))?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO endpoints (custom_path, name, kind, target, method, parameters, rate_limit, tags, metadata, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {ENDPOINT_COLUMNS}
            "#
        ))
        .bind(&create.custom_path)
        .bind(&create.name)
        .bind(create.kind)
        .bind(&create.target)
        .bind(create.method)
        .bind(parameters)
        .bind(create.rate_limit)
        .bind(&create.tags)
        .bind(&create.metadata)
        .bind(&create.created_by)
        .fetch_one(&self.pool)
        .await?;
        endpoint_from_row(&row)
    }

    async fn endpoint_by_id(&self, id: EndpointId) -> Result<Option<Endpoint>> {
        let row = sqlx::query(&format!("SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(endpoint_from_row).transpose()
    }

    async fn endpoint_by_path(&self, custom_path: &str) -> Result<Option<Endpoint>> {
        let row = sqlx::query(&format!("SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE custom_path = $1"))
            .bind(custom_path)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(endpoint_from_row).transpose()
    }

    async fn set_endpoint_status(&self, id: EndpointId, status: EndpointStatus, updated_by: &str) -> Result<Endpoint> {
        let mut tx = self.pool.begin().await?;

        if status == EndpointStatus::Active {
            let has_credential: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM credentials WHERE endpoint_id = $1 AND is_active)")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;
            if !has_credential {
                return Err(StoreError::InvalidTransition {
                    message: "endpoint cannot be activated without an active credential".to_string(),
                });
            }
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE endpoints
            SET status = $2, updated_by = $3, updated_at = now()
            WHERE id = $1
            RETURNING {ENDPOINT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .bind(updated_by)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;

        tx.commit().await?;
        endpoint_from_row(&row)
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn create_credential(&self, create: &CredentialCreate) -> Result<Credential> {
        let mut tx = self.pool.begin().await?;

        // Rotation: minting a credential retires the previous one.
        sqlx::query("UPDATE credentials SET is_active = false WHERE endpoint_id = $1 AND is_active")
            .bind(create.endpoint_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO credentials (secret_hash, endpoint_id, created_by)
            VALUES ($1, $2, $3)
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        ))
        .bind(&create.secret_hash)
        .bind(create.endpoint_id)
        .bind(&create.created_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        credential_from_row(&row)
    }

    async fn find_active_by_hash(&self, hash: &str) -> Result<Option<Credential>> {
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE secret_hash = $1 AND is_active"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn credentials_by_endpoint(&self, endpoint_id: EndpointId) -> Result<Vec<Credential>> {
        let rows = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE endpoint_id = $1 ORDER BY created_at"
        ))
        .bind(endpoint_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(credential_from_row).collect()
    }

    async fn revoke_credential(&self, id: CredentialId) -> Result<Credential> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE credentials SET is_active = false WHERE id = $1
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        credential_from_row(&row)
    }

    async fn record_credential_usage(&self, id: CredentialId, delta: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE credentials
            SET usage_count = usage_count + $2,
                last_used_at = GREATEST(COALESCE(last_used_at, $3), $3)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delta)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for PgStore {
    async fn insert_audit_records(&self, records: &[AuditRecordCreate]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut credential_ids: Vec<Option<Uuid>> = Vec::with_capacity(records.len());
        let mut endpoint_ids: Vec<Option<Uuid>> = Vec::with_capacity(records.len());
        let mut methods: Vec<&str> = Vec::with_capacity(records.len());
        let mut uris: Vec<&str> = Vec::with_capacity(records.len());
        let mut client_ips: Vec<Option<&str>> = Vec::with_capacity(records.len());
        let mut user_agents: Vec<Option<&str>> = Vec::with_capacity(records.len());
        let mut bodies: Vec<Option<serde_json::Value>> = Vec::with_capacity(records.len());
        let mut request_bytes: Vec<i64> = Vec::with_capacity(records.len());
        let mut response_bytes: Vec<i64> = Vec::with_capacity(records.len());
        let mut status_codes: Vec<i32> = Vec::with_capacity(records.len());
        let mut durations: Vec<i64> = Vec::with_capacity(records.len());
        let mut errors: Vec<Option<&str>> = Vec::with_capacity(records.len());
        let mut created_ats: Vec<DateTime<Utc>> = Vec::with_capacity(records.len());

        for record in records {
            credential_ids.push(record.credential_id);
            endpoint_ids.push(record.endpoint_id);
            methods.push(&record.method);
            uris.push(&record.uri);
            client_ips.push(record.client_ip.as_deref());
            user_agents.push(record.user_agent.as_deref());
            bodies.push(record.request_body.clone());
            request_bytes.push(record.request_bytes);
            response_bytes.push(record.response_bytes);
            status_codes.push(record.status_code);
            durations.push(record.duration_ms);
            errors.push(record.error.as_deref());
            created_ats.push(record.created_at);
        }

        sqlx::query(
            r#"
            INSERT INTO audit_records
                (credential_id, endpoint_id, method, uri, client_ip, user_agent, request_body,
                 request_bytes, response_bytes, status_code, duration_ms, error, created_at)
            SELECT * FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::varchar[], $4::text[], $5::varchar[], $6::text[], $7::jsonb[],
                $8::bigint[], $9::bigint[], $10::integer[], $11::bigint[], $12::text[], $13::timestamptz[]
            )
            "#,
        )
        .bind(&credential_ids)
        .bind(&endpoint_ids)
        .bind(&methods)
        .bind(&uris)
        .bind(&client_ips)
        .bind(&user_agents)
        .bind(&bodies)
        .bind(&request_bytes)
        .bind(&response_bytes)
        .bind(&status_codes)
        .bind(&durations)
        .bind(&errors)
        .bind(&created_ats)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            r#"
            INSERT INTO usage_aggregates (credential_id, endpoint_id, day, request_count, last_used)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (credential_id, endpoint_id, day) DO UPDATE
            SET request_count = usage_aggregates.request_count + EXCLUDED.request_count,
                last_used = GREATEST(usage_aggregates.last_used, EXCLUDED.last_used)
            "#,
        )
        .bind(credential_id)
        .bind(endpoint_id)
        .bind(day)
        .bind(delta)
        .bind(last_used)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn usage_for_day(
        &self,
        credential_id: CredentialId,
        endpoint_id: EndpointId,
        day: NaiveDate,
    ) -> Result<Option<UsageAggregate>> {
        let row = sqlx::query(
            r#"
            SELECT credential_id, endpoint_id, day, request_count, last_used
            FROM usage_aggregates
            WHERE credential_id = $1 AND endpoint_id = $2 AND day = $3
            "#,
        )
        .bind(credential_id)
        .bind(endpoint_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(UsageAggregate {
                credential_id: row.try_get("credential_id")?,
                endpoint_id: row.try_get("endpoint_id")?,
                day: row.try_get("day")?,
                request_count: row.try_get("request_count")?,
                last_used: row.try_get("last_used")?,
            })
        })
        .transpose()
    }
}
