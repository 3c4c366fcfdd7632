//! Background writer for usage telemetry.
//!
//! Drains the record channel, batching up to `batch_size` records per
//! flush. A flush runs in phases: sanitize and append audit rows, then fold
//! the batch into daily aggregates and credential counters. A failed phase
//! is logged and counted; its records are dropped rather than retried, so
//! the writer can never wedge behind a broken store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use super::{DeadLetterSink, DispatchRecord, UsageHandle, redact};
use crate::config::UsageConfig;
use crate::store::models::AuditRecordCreate;
use crate::store::{CredentialStore, UsageStore};
use crate::types::{CredentialId, EndpointId, abbrev_uuid};

pub struct UsageRecorder {
    usage: Arc<dyn UsageStore>,
    credentials: Arc<dyn CredentialStore>,
    receiver: mpsc::Receiver<DispatchRecord>,
    batch_size: usize,
    flush_interval: Duration,
}

impl UsageRecorder {
    /// Build the recorder and its producer handle.
    pub fn new(
        usage: Arc<dyn UsageStore>,
        credentials: Arc<dyn CredentialStore>,
        config: &UsageConfig,
        dead_letter: Arc<dyn DeadLetterSink>,
    ) -> (Self, UsageHandle) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let recorder = Self {
            usage,
            credentials,
            receiver,
            batch_size: config.batch_size,
            flush_interval: config.flush_interval,
        };
        (recorder, UsageHandle::new(sender, dead_letter))
    }

    /// Run until cancelled. On shutdown the channel is closed, drained and
    /// flushed, so records accepted before the cancel are not lost.
    pub async fn run(mut self, shutdown_token: CancellationToken) {
        info!(batch_size = self.batch_size, "Usage recorder started");
        let mut buffer: Vec<DispatchRecord> = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_token.cancelled() => {
                    self.receiver.close();
                    while let Ok(record) = self.receiver.try_recv() {
                        buffer.push(record);
                        if buffer.len() >= self.batch_size {
                            self.flush(&mut buffer).await;
                        }
                    }
                    self.flush(&mut buffer).await;
                    info!("Usage recorder stopped");
                    return;
                }

                received = self.receiver.recv() => {
                    match received {
                        Some(record) => {
                            buffer.push(record);
                            while buffer.len() < self.batch_size {
                                match self.receiver.try_recv() {
                                    Ok(record) => buffer.push(record),
                                    Err(_) => break,
                                }
                            }
                            if buffer.len() >= self.batch_size {
                                self.flush(&mut buffer).await;
                            }
                        }
                        None => {
                            self.flush(&mut buffer).await;
                            return;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.flush(&mut buffer).await;
                }
            }
        }
    }

    async fn flush(&self, buffer: &mut Vec<DispatchRecord>) {
        if buffer.is_empty() {
            return;
        }
        let span = info_span!("usage_flush", records = buffer.len());
        async {
            let start = Instant::now();

            self.flush_audit(buffer).await;
            self.flush_aggregates(buffer).await;

            histogram!("spigot_usage_flush_duration_seconds").record(start.elapsed().as_secs_f64());
            counter!("spigot_usage_records_flushed_total").increment(buffer.len() as u64);
            buffer.clear();
        }
        .instrument(span)
        .await;
    }

    /// Phase one: one audit row per attempt, bodies sanitized first.
    async fn flush_audit(&self, buffer: &[DispatchRecord]) {
        let rows: Vec<AuditRecordCreate> = buffer
            .iter()
            .map(|record| {
                let request_body = record.request_body.clone().map(|mut body| {
                    redact::sanitize(&mut body);
                    body
                });
                AuditRecordCreate {
                    credential_id: record.credential_id,
                    endpoint_id: record.endpoint_id,
                    method: record.method.clone(),
                    uri: record.uri.clone(),
                    client_ip: record.client_ip.clone(),
                    user_agent: record.user_agent.clone(),
                    request_body,
                    request_bytes: record.request_bytes,
                    response_bytes: record.response_bytes,
                    status_code: record.status_code,
                    duration_ms: record.duration_ms,
                    error: record.error.clone(),
                    created_at: record.timestamp,
                }
            })
            .collect();

        if let Err(e) = self.usage.insert_audit_records(&rows).await {
            counter!("spigot_usage_flush_errors_total", "phase" => "audit").increment(1);
            error!("Failed to insert audit records: {e}");
        }
    }

    /// Phase two: fold the batch into daily aggregates and credential
    /// counters. Only records that resolved both ids participate.
    async fn flush_aggregates(&self, buffer: &[DispatchRecord]) {
        let mut daily: HashMap<(CredentialId, EndpointId, chrono::NaiveDate), (i64, DateTime<Utc>)> = HashMap::new();
        let mut per_credential: HashMap<CredentialId, (i64, DateTime<Utc>)> = HashMap::new();

        for record in buffer {
            let (Some(credential_id), Some(endpoint_id)) = (record.credential_id, record.endpoint_id) else {
                continue;
            };
            let day = record.timestamp.date_naive();
            daily
                .entry((credential_id, endpoint_id, day))
                .and_modify(|(count, last)| {
                    *count += 1;
                    *last = (*last).max(record.timestamp);
                })
                .or_insert((1, record.timestamp));
            per_credential
                .entry(credential_id)
                .and_modify(|(count, last)| {
                    *count += 1;
                    *last = (*last).max(record.timestamp);
                })
                .or_insert((1, record.timestamp));
        }

        for ((credential_id, endpoint_id, day), (delta, last_used)) in daily {
            if let Err(e) = self
                .usage
                .bump_usage_aggregate(credential_id, endpoint_id, day, delta, last_used)
                .await
            {
                counter!("spigot_usage_flush_errors_total", "phase" => "aggregate").increment(1);
                error!(
                    credential = %abbrev_uuid(&credential_id),
                    "Failed to bump usage aggregate: {e}"
                );
            }
        }

        for (credential_id, (delta, last_used)) in per_credential {
            if let Err(e) = self.credentials.record_credential_usage(credential_id, delta, last_used).await {
                counter!("spigot_usage_flush_errors_total", "phase" => "credential").increment(1);
                error!(
                    credential = %abbrev_uuid(&credential_id),
                    "Failed to update credential usage: {e}"
                );
            }
        }
    }
}
