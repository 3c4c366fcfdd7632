//! Fire-and-forget usage telemetry.
//!
//! The request path builds a [`DispatchRecord`] per attempt and hands it to
//! a [`UsageHandle`], which never blocks and never fails the request: when
//! the channel is full the record goes to a [`DeadLetterSink`] instead. A
//! single background [`recorder::UsageRecorder`] drains the channel and
//! flushes in batches.

pub mod recorder;
pub mod redact;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::{CredentialId, EndpointId};

/// Everything worth remembering about one dispatch attempt. The ids are
/// optional because rejected attempts may never resolve them; an audit row
/// is written regardless.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub credential_id: Option<CredentialId>,
    pub endpoint_id: Option<EndpointId>,
    pub method: String,
    pub uri: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Raw request body; sanitized by the recorder before it is persisted.
    pub request_body: Option<serde_json::Value>,
    pub request_bytes: i64,
    pub response_bytes: i64,
    pub status_code: i32,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Where records go when they cannot be queued. Implementations must not
/// block.
pub trait DeadLetterSink: Send + Sync {
    fn deliver(&self, record: &DispatchRecord, reason: &str);
}

/// Default sink: log the loss and count it.
pub struct LogDeadLetter;

impl DeadLetterSink for LogDeadLetter {
    fn deliver(&self, record: &DispatchRecord, reason: &str) {
        warn!(
            method = %record.method,
            uri = %record.uri,
            status = record.status_code,
            "Usage record dropped: {reason}"
        );
    }
}

/// Cheaply cloneable producer side of the telemetry pipeline.
#[derive(Clone)]
pub struct UsageHandle {
    sender: mpsc::Sender<DispatchRecord>,
    dead_letter: Arc<dyn DeadLetterSink>,
}

impl UsageHandle {
    pub(crate) fn new(sender: mpsc::Sender<DispatchRecord>, dead_letter: Arc<dyn DeadLetterSink>) -> Self {
        Self { sender, dead_letter }
    }

    /// Queue a record without waiting. Backpressure turns into loss, by
    /// design of the request path never stalling on telemetry.
    pub fn record(&self, record: DispatchRecord) {
        if let Err(err) = self.sender.try_send(record) {
            let (record, reason) = match err {
                mpsc::error::TrySendError::Full(record) => (record, "queue full"),
                mpsc::error::TrySendError::Closed(record) => (record, "recorder stopped"),
            };
            counter!("spigot_usage_records_dropped_total", "reason" => reason).increment(1);
            self.dead_letter.deliver(&record, reason);
        }
    }
}
