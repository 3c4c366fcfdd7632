//! Secret extraction from incoming requests and resolution to a credential.
//!
//! Sources are tried in a fixed priority order; the first source that is
//! present wins outright, even when its value turns out to be empty or
//! invalid. This keeps behaviour predictable when a caller supplies several
//! sources at once:
//!
//! 1. `X-API-Key` header
//! 2. `Authorization: Bearer <secret>`
//! 3. `API_KEY` or `token` query parameter
//! 4. a path segment, but only when it is shaped like a secret

use std::collections::HashMap;

use axum::http::HeaderMap;
use tracing::instrument;
use uuid::Uuid;

use crate::crypto;
use crate::errors::{Error, Result};
use crate::store::CredentialStore;
use crate::store::models::Credential;

const API_KEY_HEADER: &str = "x-api-key";
const QUERY_KEYS: [&str; 2] = ["API_KEY", "token"];

/// A secret candidate pulled from the request, plus which path segment it
/// came from (if any) so endpoint resolution can skip that segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCandidate {
    pub secret: String,
    pub consumed_path_index: Option<usize>,
}

impl TokenCandidate {
    fn from_source(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            consumed_path_index: None,
        }
    }
}

/// Whether a path segment could plausibly be a secret: either a hyphenated
/// UUID or a 64-character hex string. Anything else is left alone so custom
/// paths never get swallowed by token extraction.
pub fn is_secret_shaped(segment: &str) -> bool {
    if segment.len() == 64 && segment.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
        return true;
    }
    segment.len() == 36 && segment.contains('-') && Uuid::try_parse(segment).is_ok()
}

/// Extract the secret candidate from a request, if any source carries one.
pub fn extract_candidate(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    path_segments: &[&str],
) -> Option<TokenCandidate> {
    if let Some(value) = headers.get(API_KEY_HEADER) {
        // A present header is authoritative even when malformed.
        return Some(TokenCandidate::from_source(value.to_str().unwrap_or("")));
    }

    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Some(secret) = value.to_str().ok().and_then(|v| v.strip_prefix("Bearer ")) {
            return Some(TokenCandidate::from_source(secret));
        }
    }

    for key in QUERY_KEYS {
        if let Some(value) = query.get(key) {
            return Some(TokenCandidate::from_source(value.clone()));
        }
    }

    for (index, segment) in path_segments.iter().enumerate() {
        if is_secret_shaped(segment) {
            return Some(TokenCandidate {
                secret: (*segment).to_string(),
                consumed_path_index: Some(index),
            });
        }
    }

    None
}

/// Resolve a candidate to its active credential. Read-only: usage counters
/// are updated by the telemetry writer, never here.
#[instrument(skip_all)]
pub async fn resolve_credential(store: &dyn CredentialStore, candidate: Option<&TokenCandidate>) -> Result<Credential> {
    let candidate = candidate.ok_or(Error::Unauthorized {
        message: Some("No credential provided".to_string()),
    })?;

    let hash = crypto::hash_secret(&candidate.secret);
    store
        .find_active_by_hash(&hash)
        .await?
        .ok_or_else(|| Error::unauthorized("Invalid or revoked credential"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn header_wins_over_all_other_sources() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("header-secret"));
        headers.insert("authorization", HeaderValue::from_static("Bearer bearer-secret"));
        let query = query(&[("API_KEY", "query-secret")]);
        let hex = "a".repeat(64);

        let candidate = extract_candidate(&headers, &query, &[hex.as_str()]).unwrap();
        assert_eq!(candidate.secret, "header-secret");
        assert_eq!(candidate.consumed_path_index, None);
    }

    #[test]
    fn empty_header_does_not_fall_back() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static(""));
        let query = query(&[("API_KEY", "query-secret")]);

        let candidate = extract_candidate(&headers, &query, &[]).unwrap();
        assert_eq!(candidate.secret, "");
    }

    #[test]
    fn bearer_scheme_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer s3cret"));
        let candidate = extract_candidate(&headers, &HashMap::new(), &[]).unwrap();
        assert_eq!(candidate.secret, "s3cret");
    }

    #[test]
    fn non_bearer_authorization_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert!(extract_candidate(&headers, &HashMap::new(), &[]).is_none());
    }

    #[test]
    fn query_keys_are_checked_in_order() {
        let query = query(&[("API_KEY", "first"), ("token", "second")]);
        let candidate = extract_candidate(&HeaderMap::new(), &query, &[]).unwrap();
        assert_eq!(candidate.secret, "first");
    }

    #[test]
    fn path_segment_is_used_only_when_secret_shaped() {
        let hex = "f".repeat(64);
        let candidate = extract_candidate(&HeaderMap::new(), &HashMap::new(), &["sales-report", &hex]).unwrap();
        assert_eq!(candidate.secret, hex);
        assert_eq!(candidate.consumed_path_index, Some(1));

        assert!(extract_candidate(&HeaderMap::new(), &HashMap::new(), &["sales-report"]).is_none());
    }

    #[test]
    fn secret_shape_screening() {
        assert!(is_secret_shaped(&"a".repeat(64)));
        assert!(is_secret_shaped("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_secret_shaped(&"a".repeat(63)));
        assert!(!is_secret_shaped("monthly-sales"));
        // Minted secrets are lowercase hex; uppercase is not secret-shaped.
        assert!(!is_secret_shaped(&"A".repeat(64)));
        // Uuid::try_parse accepts the simple format; 32 hex chars without
        // hyphens must not be treated as a secret.
        assert!(!is_secret_shaped(&"a".repeat(32)));
    }

    #[tokio::test]
    async fn unknown_secret_resolves_to_unauthorized() {
        let store = crate::store::memory::MemoryStore::new();
        let candidate = TokenCandidate::from_source("nope");
        let err = resolve_credential(&store, Some(&candidate)).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn missing_candidate_resolves_to_unauthorized() {
        let store = crate::store::memory::MemoryStore::new();
        let err = resolve_credential(&store, None).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
    }
}
