//! Crate-wide error type and HTTP rendering.
//!
//! Every failure that can surface to a caller maps to one of the variants
//! below. [`Error::into_response`] renders the uniform failure envelope
//! (`{"success": false, "error": <kind>, "message": <detail>}`) and logs at a
//! severity matching the variant class, so handlers can simply return
//! `Result<T>` and let the conversion do the rest.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{api::models::envelope::DispatchFailure, engine::EngineError, store::StoreError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No usable credential accompanied the request, or the presented secret
    /// does not match any active credential.
    #[error("{}", message.as_deref().unwrap_or("Missing or invalid credential"))]
    Unauthorized { message: Option<String> },

    /// The credential is valid but does not grant access to the requested
    /// endpoint, or the endpoint is not currently serving traffic.
    #[error("{message}")]
    Forbidden { message: String },

    #[error("{message}")]
    NotFound { message: String },

    /// Request used an HTTP method the endpoint is not published under.
    #[error("method {got} is not allowed for this endpoint (expected {expected})")]
    MethodNotAllowed { expected: String, got: String },

    /// The backing engine accepted the dispatch but the statement failed.
    #[error("{message}")]
    ExecutionFailed { message: String },

    #[error("failed to {operation}")]
    Internal { operation: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        Error::ExecutionFailed { message: err.to_string() }
    }
}

impl Error {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Error::Unauthorized {
            message: Some(message.into()),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Error::Forbidden { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Error::ExecutionFailed { .. } | Error::Internal { .. } | Error::Store(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable kind placed in the `error` field of the
    /// failure envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthorized { .. } => "unauthorized",
            Error::Forbidden { .. } => "forbidden",
            Error::NotFound { .. } => "not_found",
            Error::MethodNotAllowed { .. } => "method_not_allowed",
            Error::ExecutionFailed { .. } => "execution_failed",
            Error::Internal { .. } | Error::Store(_) | Error::Other(_) => "internal_error",
        }
    }

    /// Message safe to show to callers. Internal variants collapse to a
    /// generic message so storage details never leak.
    pub fn user_message(&self) -> String {
        match self {
            Error::Store(_) | Error::Other(_) => "An internal error occurred".to_string(),
            Error::Internal { operation } => format!("Failed to {operation}"),
            other => other.to_string(),
        }
    }

    /// Log with severity matching the variant class. Auth and routing
    /// failures are expected traffic; server-side failures are not.
    pub fn log(&self) {
        match self {
            Error::Unauthorized { .. } => debug!("Unauthorized: {self}"),
            Error::Forbidden { .. } => info!("Forbidden: {self}"),
            Error::NotFound { .. } | Error::MethodNotAllowed { .. } => debug!("Rejected: {self}"),
            Error::ExecutionFailed { .. } => warn!("Dispatch failed: {self}"),
            Error::Internal { .. } | Error::Store(_) | Error::Other(_) => error!("Internal error: {self:?}"),
        }
    }

    pub fn failure_envelope(&self) -> DispatchFailure {
        DispatchFailure::new(self.kind(), self.user_message())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        self.log();
        (self.status_code(), Json(self.failure_envelope())).into_response()
    }
}
