//! # spigot: stored operations as HTTP endpoints
//!
//! `spigot` publishes stored, parameterized backend operations — saved
//! queries, stored procedures, functions, and whole tables — as independent
//! HTTP endpoints, each gated by its own revocable secret. A caller presents
//! the secret (header, bearer token, query parameter, or path segment), the
//! service resolves it to a credential, locates the endpoint it guards, runs
//! the stored operation against the backing query engine, and returns the
//! rows in a uniform JSON envelope.
//!
//! ## Request Flow
//!
//! Every request to `/v1/{endpoint}` walks the same pipeline: token
//! extraction ([`auth`]), credential resolution against hashed secrets,
//! endpoint resolution (custom path, endpoint id, or the credential's own
//! endpoint), a method gate, parameter assembly ([`dispatch`]), and a single
//! statement executed in a fresh engine session ([`engine`]). Each attempt,
//! accepted or rejected, emits a usage record that a background writer
//! ([`usage`]) folds into an audit trail and daily aggregates; telemetry
//! never blocks or fails a request.
//!
//! ## Storage
//!
//! Persistence goes through the [`store`] traits, with PostgreSQL for
//! production (migrations run automatically at startup) and an in-memory
//! implementation for tests and throwaway deployments. Only SHA-256 digests
//! of secrets are stored; the plaintext is logged exactly once when an
//! endpoint is seeded from configuration.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use spigot::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = spigot::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     spigot::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
mod crypto;
pub mod dispatch;
pub mod engine;
pub mod errors;
mod openapi;
pub mod store;
pub mod telemetry;
mod types;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod test;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::HeaderValue,
    routing::{any, get},
};
use bon::Builder;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;
pub use types::{AuditRecordId, CredentialId, EndpointId};

use crate::config::{CorsOrigin, PublishSpec, StorageConfig};
use crate::engine::{QueryEngine, http::HttpQueryEngine};
use crate::openapi::ApiDoc;
use crate::store::models::{CredentialCreate, EndpointCreate, EndpointStatus};
use crate::store::{CredentialStore, EndpointStore, UsageStore, memory::MemoryStore, postgres::PgStore};
use crate::usage::{LogDeadLetter, UsageHandle, recorder::UsageRecorder};

/// Operator name recorded on entities created from configuration.
const SEED_OPERATOR: &str = "config";

/// Application state shared across all request handlers.
#[derive(Clone, Builder)]
pub struct AppState {
    pub endpoints: Arc<dyn EndpointStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub engine: Arc<dyn QueryEngine>,
    pub usage: UsageHandle,
    pub config: Config,
}

/// Get the spigot database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Seed endpoints declared in configuration.
///
/// Idempotent per custom path: an endpoint that already exists is left
/// untouched, including its credential. For each newly created endpoint a
/// secret is minted, stored as a hash, and logged exactly once — this log
/// line is the only place the plaintext ever appears.
#[instrument(skip_all)]
pub async fn seed_published(
    specs: &[PublishSpec],
    endpoints: &dyn EndpointStore,
    credentials: &dyn CredentialStore,
) -> anyhow::Result<()> {
    for spec in specs {
        if endpoints.endpoint_by_path(&spec.custom_path).await?.is_some() {
            debug!(path = %spec.custom_path, "Endpoint already published, skipping");
            continue;
        }

        let endpoint = endpoints
            .create_endpoint(&EndpointCreate {
                custom_path: Some(spec.custom_path.clone()),
                name: spec.name.clone(),
                kind: spec.kind,
                target: spec.target.clone(),
                method: spec.method,
                parameters: spec.parameters.clone(),
                rate_limit: spec.rate_limit,
                tags: spec.tags.clone(),
                metadata: spec.metadata.clone(),
                created_by: SEED_OPERATOR.to_string(),
            })
            .await?;

        let secret = crypto::generate_secret();
        credentials
            .create_credential(&CredentialCreate {
                endpoint_id: endpoint.id,
                secret_hash: crypto::hash_secret(&secret),
                created_by: SEED_OPERATOR.to_string(),
            })
            .await?;
        endpoints
            .set_endpoint_status(endpoint.id, EndpointStatus::Active, SEED_OPERATOR)
            .await?;

        info!(
            path = %spec.custom_path,
            "Published endpoint '{}'; secret (shown once, store it now): {secret}",
            spec.name
        );
    }
    Ok(())
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Origin(origin) => origin.parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.cors.allow_credentials))
}

/// Build the application router: the dispatch surface, health check, API
/// docs, and optional Prometheus metrics.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/v1/{endpoint}", any(api::handlers::dispatch::dispatch_root))
        .route("/v1/{endpoint}/{trailing}", any(api::handlers::dispatch::dispatch_trailing))
        .with_state(state.clone())
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    if state.config.enable_metrics {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))?;
        router = router.route("/internal/metrics", get(move || async move { handle.render() }));
    }

    let router = router.layer(create_cors_layer(&state.config)?).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Container for background tasks and their lifecycle management.
///
/// Holds the usage recorder task. When dropped, the `drop_guard` cancels the
/// shutdown token so tasks stop even without an explicit
/// [`shutdown`](BackgroundServices::shutdown) call; an explicit call also
/// waits for the final telemetry flush.
pub struct BackgroundServices {
    pub(crate) background_tasks: Vec<tokio::task::JoinHandle<()>>,
    pub(crate) shutdown_token: tokio_util::sync::CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] connects storage, runs migrations,
///    seeds published endpoints, and starts the usage recorder
/// 2. **Serve**: [`Application::serve`] binds a TCP port and handles
///    requests until the shutdown future resolves
/// 3. **Shutdown**: drains background tasks, closes the pool, and flushes
///    telemetry
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting spigot with configuration: {:#?}", config);

        let (pool, endpoints, credentials, usage_store) = setup_storage(&config).await?;

        seed_published(&config.publish, endpoints.as_ref(), credentials.as_ref()).await?;

        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let drop_guard = shutdown_token.clone().drop_guard();

        let (recorder, usage_handle) =
            UsageRecorder::new(usage_store, credentials.clone(), &config.usage, Arc::new(LogDeadLetter));
        let recorder_handle = tokio::spawn(recorder.run(shutdown_token.clone()));

        let bg_services = BackgroundServices {
            background_tasks: vec![recorder_handle],
            shutdown_token,
            drop_guard: Some(drop_guard),
        };

        let engine: Arc<dyn QueryEngine> = Arc::new(HttpQueryEngine::new(&config.engine)?);

        let state = AppState::builder()
            .endpoints(endpoints)
            .credentials(credentials)
            .engine(engine)
            .usage(usage_handle)
            .config(config.clone())
            .build();

        let router = build_router(&state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(any(test, feature = "test-utils"))]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("spigot listening on http://{bind_addr}");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        // Drain background services so queued usage records are flushed.
        self.bg_services.shutdown().await;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

type StorageHandles = (
    Option<PgPool>,
    Arc<dyn EndpointStore>,
    Arc<dyn CredentialStore>,
    Arc<dyn UsageStore>,
);

/// Connect the configured storage backend and run migrations where needed.
async fn setup_storage(config: &Config) -> anyhow::Result<StorageHandles> {
    match &config.storage {
        StorageConfig::Postgres { url, pool: settings } => {
            info!("Using PostgreSQL storage");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .min_connections(settings.min_connections)
                .acquire_timeout(settings.acquire_timeout)
                .connect(url)
                .await?;
            migrator().run(&pool).await?;
            let store = Arc::new(PgStore::new(pool.clone()));
            Ok((
                Some(pool),
                store.clone() as Arc<dyn EndpointStore>,
                store.clone() as Arc<dyn CredentialStore>,
                store as Arc<dyn UsageStore>,
            ))
        }
        StorageConfig::Memory => {
            info!("Using in-memory storage; data will be lost on shutdown");
            let store = Arc::new(MemoryStore::new());
            Ok((
                None,
                store.clone() as Arc<dyn EndpointStore>,
                store.clone() as Arc<dyn CredentialStore>,
                store as Arc<dyn UsageStore>,
            ))
        }
    }
}
