//! Caller parameter assembly.
//!
//! Callers can supply operation parameters in several shapes; all of them
//! collapse to an ordered list of JSON values before dispatch. Malformed
//! input never fails the request here: a source that parses but has the
//! wrong shape simply contributes no parameters, and the engine decides
//! whether the call works with what arrived.

use std::collections::HashMap;

use serde_json::Value;

use super::operation::TableSlice;
use crate::store::models::ParameterSpec;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub params: Vec<Value>,
    pub slice: TableSlice,
}

impl Invocation {
    /// Assemble parameters from the request body and query string.
    ///
    /// Body shapes, tried when a JSON body is present:
    /// - `{"params": [..]}` positional
    /// - `{"params": {..}}` named, ordered by the endpoint's declared specs
    /// - a bare array, positional
    ///
    /// Without a body: a `params` query parameter holding a JSON array, or
    /// individual query parameters named after the declared specs.
    pub fn from_request(schema: &[ParameterSpec], query: &HashMap<String, String>, body: Option<&Value>) -> Self {
        let params = match body {
            Some(body) => params_from_body(schema, body),
            None => params_from_query(schema, query),
        };

        Invocation {
            params,
            slice: TableSlice {
                limit: slice_value(query.get("limit")),
                offset: slice_value(query.get("offset")),
            },
        }
    }
}

/// Negative values would reach the engine as `LIMIT -1` and fail there;
/// treat them like unparseable input and fall back to the defaults.
fn slice_value(raw: Option<&String>) -> Option<i64> {
    raw.and_then(|v| v.parse::<i64>().ok()).filter(|v| *v >= 0)
}

fn params_from_body(schema: &[ParameterSpec], body: &Value) -> Vec<Value> {
    match body {
        Value::Array(values) => values.clone(),
        Value::Object(map) => match map.get("params") {
            Some(Value::Array(values)) => values.clone(),
            Some(Value::Object(named)) => order_by_schema(schema, |name| named.get(name).cloned()),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn params_from_query(schema: &[ParameterSpec], query: &HashMap<String, String>) -> Vec<Value> {
    if let Some(raw) = query.get("params") {
        // A present `params` key is authoritative, even when malformed.
        return match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(values)) => values,
            _ => Vec::new(),
        };
    }

    order_by_schema(schema, |name| query.get(name).map(|v| Value::String(v.clone())))
}

/// Pull named values into the positional order the endpoint declares.
/// Missing names are skipped rather than padded, matching positional
/// semantics where trailing parameters may be omitted.
fn order_by_schema(schema: &[ParameterSpec], mut lookup: impl FnMut(&str) -> Option<Value>) -> Vec<Value> {
    schema.iter().filter_map(|spec| lookup(&spec.name)).collect()
}
