use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{error, info};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Stream used for events that precede tenant attribution
/// (edge rejections, region transitions).
pub const SYSTEM_STREAM: &str = "system";

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    CodeIssued,
    CodeExchanged,
    EdgeRejection,
    SessionCreated,
    SessionVerified,
    SessionRevoked,
    SessionEvicted,
    CrossTenantDenied,
    RegionFailover,
}

/// How it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failure,
}

/// One immutable entry in a tenant's audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub kind: AuditKind,
    pub timestamp: DateTime<Utc>,
    pub outcome: AuditOutcome,
    pub metadata: serde_json::Value,
}

/// Append-only audit log.
///
/// Producers push events on an unbounded channel; a single writer task
/// appends them to per-tenant streams and emits one JSON log line per event.
/// Ordering is guaranteed within a tenant stream, not globally. Recording
/// never blocks and never alters the authorization decision that produced
/// the event; if the primary channel is gone the event goes to the fallback
/// channel (a direct log line) instead.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::UnboundedSender<AuditEvent>,
    streams: Arc<Mutex<HashMap<String, VecDeque<AuditEvent>>>>,
}

impl AuditLog {
    /// Start the writer task. Events older than `retention_secs` are pruned
    /// from a tenant's stream as new events for that tenant arrive.
    pub fn start(retention_secs: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let streams: Arc<Mutex<HashMap<String, VecDeque<AuditEvent>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        Self::spawn_writer(rx, Arc::clone(&streams), retention_secs);
        Self { tx, streams }
    }

    fn spawn_writer(
        mut rx: mpsc::UnboundedReceiver<AuditEvent>,
        streams: Arc<Mutex<HashMap<String, VecDeque<AuditEvent>>>>,
        retention_secs: u64,
    ) {
        tokio::spawn(async move {
            let retention = ChronoDuration::seconds(retention_secs.min(i64::MAX as u64) as i64);
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => info!(target: "audit", "{line}"),
                    Err(e) => error!("Failed to serialize audit event: {e}"),
                }

                let cutoff = Utc::now() - retention;
                let mut streams = streams.lock().expect("audit stream lock poisoned");
                let stream = streams.entry(event.tenant_id.clone()).or_default();
                while stream
                    .front()
                    .is_some_and(|oldest| oldest.timestamp < cutoff)
                {
                    stream.pop_front();
                }
                stream.push_back(event);
            }
        });
    }

    /// Record one event. Non-blocking; failures route to the fallback
    /// channel and are never surfaced to the caller.
    pub fn record(
        &self,
        kind: AuditKind,
        tenant_id: &str,
        session_id: Option<&str>,
        outcome: AuditOutcome,
        metadata: serde_json::Value,
    ) {
        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            session_id: session_id.map(str::to_string),
            kind,
            timestamp: Utc::now(),
            outcome,
            metadata,
        };
        if let Err(send_error) = self.tx.send(event) {
            // Fallback channel: the event is preserved in the log stream even
            // though the writer task is gone.
            let line = serde_json::to_string(&send_error.0).unwrap_or_default();
            error!(target: "audit_fallback", "{line}");
        }
    }

    /// Snapshot of a tenant's stream, oldest first. Events are cloned;
    /// the stored stream cannot be mutated from outside.
    pub fn tenant_stream(&self, tenant_id: &str) -> Vec<AuditEvent> {
        self.streams
            .lock()
            .expect("audit stream lock poisoned")
            .get(tenant_id)
            .map(|stream| stream.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// SHA-256 hex digest for secrets referenced in audit metadata.
    /// Raw codes and tokens never appear in an event.
    pub fn digest(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    #[cfg(test)]
    pub fn closed_for_test() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self {
            tx,
            streams: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}
