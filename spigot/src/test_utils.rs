//! Test utilities for integration testing (available with `test-utils` feature).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::{Config, CorsConfig, EngineConfig, StorageConfig, UsageConfig};
use crate::engine::{EngineError, EngineSession, QueryEngine, StatementOutcome};
use crate::store::memory::MemoryStore;
use crate::store::models::{
    Credential, CredentialCreate, Endpoint, EndpointCreate, EndpointMethod, EndpointStatus, OperationKind, ParameterSpec,
};
use crate::store::{CredentialStore, EndpointStore};
use crate::usage::{LogDeadLetter, recorder::UsageRecorder};
use crate::{AppState, BackgroundServices, crypto};

#[derive(Default)]
struct MockEngineInner {
    dataset: Mutex<Vec<Value>>,
    fail_execute: Mutex<Option<String>>,
    executed: Mutex<Vec<(String, Vec<Value>)>>,
    open_sessions: AtomicUsize,
}

/// Scripted engine for tests. Records every executed statement, answers
/// with a configurable dataset (applying `LIMIT ? OFFSET ?` bindings for
/// table statements), and tracks session balance so tests can assert every
/// connect was matched by a close.
#[derive(Clone, Default)]
pub struct MockEngine {
    inner: Arc<MockEngineInner>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(rows: Vec<Value>) -> Self {
        let engine = Self::new();
        *engine.inner.dataset.lock() = rows;
        engine
    }

    /// Make every subsequent execute fail with the given message.
    pub fn fail_executions(&self, message: &str) {
        *self.inner.fail_execute.lock() = Some(message.to_string());
    }

    /// Statements executed so far, with their bindings.
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.inner.executed.lock().clone()
    }

    /// Sessions opened but not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryEngine for MockEngine {
    async fn connect(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        self.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            inner: self.inner.clone(),
        }))
    }
}

struct MockSession {
    inner: Arc<MockEngineInner>,
}

#[async_trait]
impl EngineSession for MockSession {
    async fn execute(&self, statement: &str, bindings: &[Value]) -> Result<StatementOutcome, EngineError> {
        self.inner
            .executed
            .lock()
            .push((statement.to_string(), bindings.to_vec()));

        if let Some(message) = self.inner.fail_execute.lock().clone() {
            return Err(EngineError::Execute { message });
        }

        let dataset = self.inner.dataset.lock().clone();
        let rows = if statement.ends_with("LIMIT ? OFFSET ?") {
            let limit = bindings
                .get(bindings.len().wrapping_sub(2))
                .and_then(Value::as_i64)
                .unwrap_or(i64::MAX)
                .max(0) as usize;
            let offset = bindings.last().and_then(Value::as_i64).unwrap_or(0).max(0) as usize;
            dataset.into_iter().skip(offset).take(limit).collect()
        } else {
            dataset
        };

        let row_count = rows.len() as u64;
        Ok(StatementOutcome { rows, row_count })
    }

    async fn close(self: Box<Self>) {
        self.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: None,
        storage: StorageConfig::Memory,
        engine: EngineConfig {
            url: "http://engine.test:8047".parse().expect("valid test engine url"),
            bearer_token: None,
            request_timeout: Duration::from_secs(5),
        },
        publish: vec![],
        usage: UsageConfig {
            queue_capacity: 256,
            batch_size: 16,
            flush_interval: Duration::from_millis(20),
        },
        cors: CorsConfig::default(),
        enable_metrics: false,
        enable_otel_export: false,
    }
}

/// A fully wired application over in-memory storage and a [`MockEngine`],
/// with direct handles to both for assertions.
pub struct TestApp {
    pub server: TestServer,
    pub bg_services: BackgroundServices,
    pub store: MemoryStore,
    pub engine: MockEngine,
}

pub async fn create_test_app(engine: MockEngine) -> TestApp {
    let config = create_test_config();
    let store = MemoryStore::new();

    let shutdown_token = tokio_util::sync::CancellationToken::new();
    let drop_guard = shutdown_token.clone().drop_guard();
    let (recorder, usage_handle) = UsageRecorder::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        &config.usage,
        Arc::new(LogDeadLetter),
    );
    let recorder_handle = tokio::spawn(recorder.run(shutdown_token.clone()));

    let bg_services = BackgroundServices {
        background_tasks: vec![recorder_handle],
        shutdown_token,
        drop_guard: Some(drop_guard),
    };

    let state = AppState::builder()
        .endpoints(Arc::new(store.clone()))
        .credentials(Arc::new(store.clone()))
        .engine(Arc::new(engine.clone()))
        .usage(usage_handle)
        .config(config)
        .build();

    let router = crate::build_router(&state).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");

    TestApp {
        server,
        bg_services,
        store,
        engine,
    }
}

/// Publish an endpoint directly through the store: create, mint a
/// credential, activate. Returns the endpoint and the plaintext secret.
pub async fn publish_endpoint(
    store: &MemoryStore,
    kind: OperationKind,
    method: EndpointMethod,
    custom_path: Option<&str>,
    target: &str,
    parameters: Vec<ParameterSpec>,
) -> (Endpoint, String) {
    let endpoint = store
        .create_endpoint(&EndpointCreate {
            custom_path: custom_path.map(|p| p.to_string()),
            name: format!("test endpoint {}", target),
            kind,
            target: target.to_string(),
            method,
            parameters,
            rate_limit: 60,
            tags: vec![],
            metadata: serde_json::json!({}),
            created_by: "tests".to_string(),
        })
        .await
        .expect("Failed to create test endpoint");

    let secret = crypto::generate_secret();
    store
        .create_credential(&CredentialCreate {
            endpoint_id: endpoint.id,
            secret_hash: crypto::hash_secret(&secret),
            created_by: "tests".to_string(),
        })
        .await
        .expect("Failed to create test credential");

    let endpoint = store
        .set_endpoint_status(endpoint.id, EndpointStatus::Active, "tests")
        .await
        .expect("Failed to activate test endpoint");

    (endpoint, secret)
}

/// The active credential for an endpoint, for revocation in tests.
pub async fn active_credential(store: &MemoryStore, endpoint: &Endpoint) -> Credential {
    store
        .credentials_by_endpoint(endpoint.id)
        .await
        .expect("Failed to list credentials")
        .into_iter()
        .find(|c| c.is_active)
        .expect("No active credential")
}
