//! Dispatch pipeline: endpoint resolution, method gating and execution.
//!
//! The HTTP handler calls these stages in order; each returns the crate
//! error so a failure at any stage renders the uniform failure envelope.

pub mod invocation;
pub mod operation;

use axum::http::Method;
use tracing::instrument;
use uuid::Uuid;

use crate::engine::{QueryEngine, StatementOutcome};
use crate::errors::{Error, Result};
use crate::store::EndpointStore;
use crate::store::models::{Credential, Endpoint, EndpointStatus};
use crate::types::abbrev_uuid;
use invocation::Invocation;
use operation::build_statement;

/// Resolve the endpoint a request addresses.
///
/// A path locator (the first un-consumed path segment) is tried first, as a
/// UUID when it parses as one and as a custom path otherwise. When no
/// locator is present or it matches nothing, the credential's own endpoint
/// is the target; this is what makes `GET /v1/<secret>` work.
#[instrument(skip_all, fields(credential = %abbrev_uuid(&credential.id)))]
pub async fn resolve_endpoint(store: &dyn EndpointStore, locator: Option<&str>, credential: &Credential) -> Result<Endpoint> {
    let by_locator = match locator {
        Some(segment) => match Uuid::try_parse(segment) {
            Ok(id) => store.endpoint_by_id(id).await?,
            Err(_) => store.endpoint_by_path(segment).await?,
        },
        None => None,
    };

    let endpoint = match by_locator {
        Some(endpoint) => endpoint,
        None => store
            .endpoint_by_id(credential.endpoint_id)
            .await?
            .ok_or_else(|| Error::not_found("No endpoint found for this request"))?,
    };

    if endpoint.id != credential.endpoint_id {
        return Err(Error::forbidden("Credential does not grant access to this endpoint"));
    }

    if endpoint.status != EndpointStatus::Active {
        return Err(Error::forbidden(format!(
            "Endpoint is {} and not accepting requests",
            endpoint.status.as_str()
        )));
    }

    Ok(endpoint)
}

/// Reject requests that arrive under a method other than the one the
/// endpoint is published with.
pub fn enforce_method(endpoint: &Endpoint, method: &Method) -> Result<()> {
    if endpoint.method.matches(method) {
        Ok(())
    } else {
        Err(Error::MethodNotAllowed {
            expected: endpoint.method.as_str().to_string(),
            got: method.to_string(),
        })
    }
}

/// Run the endpoint's operation against the engine. The session is released
/// on every exit path, including execution failures.
#[instrument(skip_all, fields(endpoint = %abbrev_uuid(&endpoint.id), kind = endpoint.kind.as_str()))]
pub async fn execute(engine: &dyn QueryEngine, endpoint: &Endpoint, invocation: Invocation) -> Result<StatementOutcome> {
    let statement = build_statement(endpoint.kind, &endpoint.target, invocation.params, invocation.slice);
    let session = engine.connect().await?;
    let outcome = session.execute(&statement.text, &statement.bindings).await;
    session.close().await;
    Ok(outcome?)
}
