//! Response envelopes.
//!
//! Every dispatch response, success or failure, is wrapped in one of the two
//! envelopes below so callers can always branch on the `success` flag.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::engine::StatementOutcome;
use crate::store::models::Endpoint;
use crate::types::Rows;

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMetadata {
    pub row_count: u64,
    /// The endpoint's display name.
    pub endpoint: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DispatchSuccess {
    pub success: bool,
    #[schema(value_type = Vec<Object>)]
    pub data: Rows,
    pub metadata: DispatchMetadata,
}

impl DispatchSuccess {
    pub fn new(endpoint: &Endpoint, outcome: StatementOutcome) -> Self {
        Self {
            success: true,
            data: outcome.rows,
            metadata: DispatchMetadata {
                row_count: outcome.row_count,
                endpoint: endpoint.name.clone(),
                kind: endpoint.kind.as_str().to_string(),
                timestamp: Utc::now(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DispatchFailure {
    pub success: bool,
    /// Stable machine-readable kind, e.g. `unauthorized`.
    pub error: String,
    pub message: String,
}

impl DispatchFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: kind.into(),
            message: message.into(),
        }
    }
}
