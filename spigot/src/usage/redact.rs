//! Request body sanitization for the audit trail.
//!
//! Bodies are stored for debugging, but anything that looks like a secret
//! must not survive into storage. Redaction is recursive over objects and
//! arrays and matches field names case-insensitively.

use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

/// Field names whose values are always masked. Matching is by substring, so
/// `client_secret` and `refreshToken` are caught too.
const SENSITIVE_FIELDS: [&str; 7] = [
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
];

fn is_sensitive(field: &str) -> bool {
    let field = field.to_ascii_lowercase();
    SENSITIVE_FIELDS.iter().any(|s| field.contains(s))
}

/// Mask sensitive fields in place, recursively.
pub fn sanitize(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_sensitive(key) {
                    *entry = Value::String(REDACTED.to_string());
                } else {
                    sanitize(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                sanitize(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_sensitive_fields_at_any_depth() {
        let mut body = json!({
            "params": [{"user": "ada", "password": "hunter2"}],
            "options": {"apiKey": "abc", "nested": {"refresh_token": "xyz"}},
            "region": "emea"
        });
        sanitize(&mut body);

        assert_eq!(body["params"][0]["password"], "[REDACTED]");
        assert_eq!(body["options"]["apiKey"], "[REDACTED]");
        assert_eq!(body["options"]["nested"]["refresh_token"], "[REDACTED]");
        assert_eq!(body["region"], "emea");
        assert_eq!(body["params"][0]["user"], "ada");
    }

    #[test]
    fn scalars_pass_through() {
        let mut body = json!([1, "two", null]);
        sanitize(&mut body);
        assert_eq!(body, json!([1, "two", null]));
    }
}
