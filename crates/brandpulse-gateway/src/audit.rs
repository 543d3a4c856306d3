//! Best-effort audit trail for upstream calls.
//!
//! Recording never blocks and never fails the triggering request: sinks log
//! their own failures and drop the event.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{ProviderId, UtcDateTime};

const MAX_FLUSH_BATCH: usize = 64;

/// What happened on the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Terminal success of an adapter fetch.
    FetchSucceeded,
    /// Terminal failure of an adapter fetch.
    FetchFailed,
    /// Local budget denial or upstream 429.
    RateLimited,
    /// Upstream non-2xx answer other than 429.
    UpstreamError,
    /// Transport or decode failure.
    RequestError,
}

impl AuditAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FetchSucceeded => "fetch_succeeded",
            Self::FetchFailed => "fetch_failed",
            Self::RateLimited => "rate_limited",
            Self::UpstreamError => "upstream_error",
            Self::RequestError => "request_error",
        }
    }

    /// Per-attempt error events emitted by the retry loop.
    pub const fn is_attempt_error(self) -> bool {
        matches!(self, Self::RateLimited | Self::UpstreamError | Self::RequestError)
    }
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub at: UtcDateTime,
    pub provider: ProviderId,
    pub action: AuditAction,
    pub endpoint: String,
    pub details: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(provider: ProviderId, action: AuditAction, endpoint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: UtcDateTime::now(),
            provider,
            action,
            endpoint: endpoint.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(name.into(), value.into());
        self
    }
}

/// Append-only, fire-and-forget event sink.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let details = Value::Object(event.details);
        tracing::info!(
            target: "brandpulse::audit",
            id = %event.id,
            provider = %event.provider,
            action = %event.action,
            endpoint = %event.endpoint,
            details = %details,
            "audit event"
        );
    }
}

/// Keeps events in memory; handy for inspection in tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .expect("audit event store should not be poisoned")
            .clone()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.events
            .lock()
            .expect("audit event store should not be poisoned")
            .iter()
            .filter(|event| event.action == action)
            .count()
    }

    pub fn attempt_error_count(&self) -> usize {
        self.events
            .lock()
            .expect("audit event store should not be poisoned")
            .iter()
            .filter(|event| event.action.is_attempt_error())
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .expect("audit event store should not be poisoned")
            .push(event);
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("audit store error: {0}")]
pub struct AuditStoreError(pub String);

/// Durable destination for buffered audit events.
pub trait AuditStore: Send + Sync {
    fn append<'a>(
        &'a self,
        batch: Vec<AuditEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuditStoreError>> + Send + 'a>>;
}

/// Buffers events in a bounded channel and flushes them to an [`AuditStore`]
/// from a background task.
#[derive(Debug, Clone)]
pub struct BufferedAuditSink {
    sender: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl BufferedAuditSink {
    /// Starts the flush task on the current tokio runtime. The task ends once
    /// every clone of the sink is dropped and the buffer is drained.
    pub fn spawn(store: Arc<dyn AuditStore>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(flush_loop(store, receiver));
        (
            Self {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    /// Events rejected because the buffer was full or the flush task was gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AuditSink for BufferedAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Err(error) = self.sender.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match error {
                mpsc::error::TrySendError::Full(_) => "buffer full",
                mpsc::error::TrySendError::Closed(_) => "flush task stopped",
            };
            tracing::warn!(target: "brandpulse::audit", reason, "dropping audit event");
        }
    }
}

async fn flush_loop(store: Arc<dyn AuditStore>, mut receiver: mpsc::Receiver<AuditEvent>) {
    while let Some(first) = receiver.recv().await {
        let mut batch = vec![first];
        while batch.len() < MAX_FLUSH_BATCH {
            match receiver.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }

        let size = batch.len();
        if let Err(error) = store.append(batch).await {
            tracing::warn!(
                target: "brandpulse::audit",
                %error,
                dropped = size,
                "failed to persist audit batch"
            );
        }
    }
}
