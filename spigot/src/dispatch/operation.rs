//! Statement construction for each operation kind.
//!
//! Caller parameters only ever travel as bindings. The statement text is
//! derived from the stored target alone, so nothing a caller sends can
//! change what gets executed.

use serde_json::Value;

use crate::store::models::OperationKind;

/// Row cap applied to table reads when the caller does not pass `limit`.
pub const TABLE_LIMIT_DEFAULT: i64 = 1000;

/// Tighter cap for one-off table previews, passed to
/// [`build_statement_with_limit`] in place of [`TABLE_LIMIT_DEFAULT`].
/// Sampling a table before publishing it only needs a handful of rows to
/// confirm the shape of the output, and the low cap keeps a preview from
/// scanning a large table. The dispatch path never uses it.
pub const TABLE_PREVIEW_LIMIT: i64 = 10;

/// Caller-controlled pagination for table endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableSlice {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub bindings: Vec<Value>,
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Build the statement for an operation, applying `default_limit` when a
/// table read does not specify one.
pub fn build_statement_with_limit(
    kind: OperationKind,
    target: &str,
    params: Vec<Value>,
    slice: TableSlice,
    default_limit: i64,
) -> Statement {
    match kind {
        OperationKind::Query => Statement {
            text: target.to_string(),
            bindings: params,
        },
        OperationKind::StoredProcedure => Statement {
            text: format!("CALL {target}({})", placeholders(params.len())),
            bindings: params,
        },
        OperationKind::Function => Statement {
            text: format!("SELECT {target}({})", placeholders(params.len())),
            bindings: params,
        },
        OperationKind::Table => Statement {
            text: format!("SELECT * FROM {target} LIMIT ? OFFSET ?"),
            bindings: vec![
                Value::from(slice.limit.unwrap_or(default_limit)),
                Value::from(slice.offset.unwrap_or(0)),
            ],
        },
    }
}

pub fn build_statement(kind: OperationKind, target: &str, params: Vec<Value>, slice: TableSlice) -> Statement {
    build_statement_with_limit(kind, target, params, slice, TABLE_LIMIT_DEFAULT)
}
