//! Append-only audit trail: one JSON line per proxied request.
//!
//! Request handlers call [`AuditSink::record`], which never blocks and never
//! fails. Records travel over a bounded channel to a single writer that owns
//! the output stream, so lines cannot interleave. When the channel is full
//! the new record is dropped and counted (drop-new).

use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use burncloud_std::fs::OpenAppendFile;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How a request ended, from the proxy's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Upstream answered; its status may still be an error.
    Forwarded,
    Unauthorized,
    Forbidden,
    BadRequest,
    CredentialError,
    UpstreamUnreachable,
    /// The client went away before a response was produced.
    ClientCancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    pub client_label: Option<String>,
    pub method: String,
    pub path: String,
    pub upstream_status: Option<u16>,
    pub latency_ms: u64,
    pub outcome: Outcome,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("cannot open audit log {path}: {source}")]
    Open { path: String, source: io::Error },
}

#[derive(Debug, Default)]
struct Counters {
    written: AtomicU64,
    dropped: AtomicU64,
    write_failures: AtomicU64,
}

/// Cloneable handle used by request handlers.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditRecord>,
    counters: Arc<Counters>,
}

/// Owns the writer task. Resolves once every sink handle is dropped and the
/// queue has been drained.
pub struct AuditWriter {
    task: JoinHandle<()>,
}

impl AuditWriter {
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Audit writer task failed");
        }
    }
}

impl AuditSink {
    /// Open (or create) `path` for appending and start the writer.
    pub fn open<F: OpenAppendFile>(
        fs: &F,
        path: &Path,
        capacity: usize,
    ) -> Result<(Self, AuditWriter), AuditError> {
        let writer = fs.open_append(path).map_err(|source| AuditError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::spawn(writer, capacity))
    }

    /// Start a writer over any byte stream. Must be called inside a tokio
    /// runtime.
    pub fn spawn<W: Write + Send + 'static>(writer: W, capacity: usize) -> (Self, AuditWriter) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let task = tokio::task::spawn_blocking({
            let counters = Arc::clone(&counters);
            move || write_loop(writer, rx, &counters)
        });
        (Self { tx, counters }, AuditWriter { task })
    }

    /// Hand the record to the writer without waiting. Overflow and a stopped
    /// writer are counted as drops.
    pub fn record(&self, record: AuditRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    request_id = %record.request_id,
                    dropped,
                    "Audit queue full; dropping record"
                );
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(request_id = %record.request_id, "Audit writer stopped; dropping record");
            }
        }
    }

    pub fn written(&self) -> u64 {
        self.counters.written.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self) -> u64 {
        self.counters.write_failures.load(Ordering::Relaxed)
    }

    /// Sink whose records land on a plain receiver instead of a writer.
    #[cfg(any(test, feature = "test-support"))]
    pub fn capture(capacity: usize) -> (Self, mpsc::Receiver<AuditRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                counters: Arc::new(Counters::default()),
            },
            rx,
        )
    }
}

fn write_loop<W: Write>(mut writer: W, mut rx: mpsc::Receiver<AuditRecord>, counters: &Counters) {
    while let Some(record) = rx.blocking_recv() {
        tracing::info!(
            target: "burncloud_proxy::audit",
            request_id = %record.request_id,
            client = record.client_label.as_deref().unwrap_or("-"),
            method = %record.method,
            path = %record.path,
            upstream_status = record.upstream_status,
            latency_ms = record.latency_ms,
            outcome = ?record.outcome,
            "audit"
        );

        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(e) => {
                counters.write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "Failed to serialize audit record");
                continue;
            }
        };
        line.push(b'\n');

        match writer.write_all(&line).and_then(|()| writer.flush()) {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, request_id = %record.request_id, "Failed to write audit record");
            }
        }
    }
}
