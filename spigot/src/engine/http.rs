//! HTTP query engine client.
//!
//! Speaks the engine's JSON statement protocol:
//!
//! - `POST {base}/sessions` opens a session and returns `{"sessionId": ...}`
//! - `POST {base}/sessions/{id}/statements` executes one statement from
//!   `{"statement": ..., "bindings": [...]}` and returns
//!   `{"rows": [...], "rowCount": n}`
//! - `DELETE {base}/sessions/{id}` releases the session

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use url::Url;

use super::{EngineError, EngineSession, QueryEngine, StatementOutcome};
use crate::config::EngineConfig;

pub struct HttpQueryEngine {
    client: Client,
    base: Url,
    bearer_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    rows: Vec<serde_json::Value>,
    #[serde(default)]
    row_count: Option<u64>,
}

#[derive(Deserialize)]
struct EngineFailure {
    message: String,
}

impl HttpQueryEngine {
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let mut base = config.url.clone();
        // Url::join treats a path without a trailing slash as a file.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(Self {
            client,
            base,
            bearer_token: config.bearer_token.clone(),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Pull the engine's error message out of a non-2xx response body, falling
/// back to the raw text.
async fn failure_message(status: StatusCode, response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<EngineFailure>(&body) {
        Ok(failure) => failure.message,
        Err(_) if !body.is_empty() => body,
        Err(_) => format!("engine returned status {status}"),
    }
}

#[async_trait]
impl QueryEngine for HttpQueryEngine {
    async fn connect(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        let url = self.base.join("sessions").map_err(|e| EngineError::Connect {
            message: e.to_string(),
        })?;
        let response = self
            .authorized(self.client.post(url))
            .send()
            .await
            .map_err(|e| EngineError::Connect { message: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Connect {
                message: failure_message(status, response).await,
            });
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Protocol { message: e.to_string() })?;

        Ok(Box::new(HttpEngineSession {
            client: self.client.clone(),
            base: self.base.clone(),
            bearer_token: self.bearer_token.clone(),
            session_id: session.session_id,
        }))
    }
}

pub struct HttpEngineSession {
    client: Client,
    base: Url,
    bearer_token: Option<String>,
    session_id: String,
}

impl HttpEngineSession {
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl EngineSession for HttpEngineSession {
    async fn execute(&self, statement: &str, bindings: &[serde_json::Value]) -> Result<StatementOutcome, EngineError> {
        let url = self
            .base
            .join(&format!("sessions/{}/statements", self.session_id))
            .map_err(|e| EngineError::Protocol { message: e.to_string() })?;

        let response = self
            .authorized(self.client.post(url))
            .json(&json!({ "statement": statement, "bindings": bindings }))
            .send()
            .await
            .map_err(|e| EngineError::Execute { message: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Execute {
                message: failure_message(status, response).await,
            });
        }

        let body: StatementResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Protocol { message: e.to_string() })?;

        // Engines are inconsistent about rowCount for row-returning
        // statements; the materialized rows win when present.
        let row_count = if body.rows.is_empty() {
            body.row_count.unwrap_or(0)
        } else {
            body.rows.len() as u64
        };

        Ok(StatementOutcome {
            rows: body.rows,
            row_count,
        })
    }

    async fn close(self: Box<Self>) {
        let url = match self.base.join(&format!("sessions/{}", self.session_id)) {
            Ok(url) => url,
            Err(e) => {
                warn!("Failed to build session release URL: {e}");
                return;
            }
        };
        let request = self.authorized(self.client.delete(url));
        if let Err(e) = request.send().await {
            warn!(session_id = %self.session_id, "Failed to release engine session: {e}");
        }
    }
}
