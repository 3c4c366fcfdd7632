//! Published endpoint model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::EndpointId;

/// The four kinds of stored operation an endpoint can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A stored SQL text sent to the engine verbatim.
    Query,
    /// Invoked as `CALL target(?, ...)`.
    StoredProcedure,
    /// Invoked as `SELECT target(?, ...)`.
    Function,
    /// Paginated read, `SELECT * FROM target LIMIT ? OFFSET ?`.
    Table,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::StoredProcedure => "stored_procedure",
            OperationKind::Function => "function",
            OperationKind::Table => "table",
        }
    }
}

/// Lifecycle state of a published endpoint. Only `Active` endpoints serve
/// traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Draft,
    Active,
    Suspended,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Draft => "draft",
            EndpointStatus::Active => "active",
            EndpointStatus::Suspended => "suspended",
        }
    }
}

/// The single HTTP method an endpoint is published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl EndpointMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointMethod::Get => "GET",
            EndpointMethod::Post => "POST",
            EndpointMethod::Put => "PUT",
            EndpointMethod::Delete => "DELETE",
        }
    }

    pub fn matches(&self, method: &axum::http::Method) -> bool {
        method.as_str() == self.as_str()
    }
}

/// Declared parameter of an endpoint's operation. The order of specs defines
/// the positional order of bindings sent to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Endpoint {
    #[schema(value_type = Uuid)]
    pub id: EndpointId,
    /// URL-safe path the endpoint is reachable under, when set. Falls back
    /// to id-based addressing otherwise.
    pub custom_path: Option<String>,
    pub name: String,
    pub kind: OperationKind,
    /// Stored SQL text, procedure name, function name, or table name,
    /// depending on `kind`.
    pub target: String,
    pub method: EndpointMethod,
    pub parameters: Vec<ParameterSpec>,
    pub rate_limit: i32,
    pub status: EndpointStatus,
    pub tags: Vec<String>,
    /// Opaque operator-defined key-value bag; the dispatch path never
    /// inspects it.
    pub metadata: serde_json::Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EndpointCreate {
    pub custom_path: Option<String>,
    pub name: String,
    pub kind: OperationKind,
    pub target: String,
    pub method: EndpointMethod,
    pub parameters: Vec<ParameterSpec>,
    pub rate_limit: i32,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub created_by: String,
}
