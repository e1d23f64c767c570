//! Best-effort audit trail of mutations
//!
//! Repositories hand entries to an [`AuditLogger`], which queues them on a
//! bounded channel and writes them to an [`AuditSink`] from one background
//! worker. Enqueueing never waits and never fails the caller; `flush` and
//! `shutdown` let tests and process teardown wait for the queue to drain.

use std::{
    fmt::{self, Debug},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::ActorContext;
use crate::error::{AppError, Result};
use crate::storage::store::{format_timestamp, parse_timestamp};

/// Kind of mutation an entry records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    /// Entity-specific action such as `reorder`
    Custom(String),
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Custom(action) => action,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "create" => Self::Create,
            "update" => Self::Update,
            "delete" => Self::Delete,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: Option<String>,
    pub tenant_id: Option<Uuid>,
    pub request_id: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        actor: &ActorContext,
        entity_type: impl Into<String>,
        entity_id: impl fmt::Display,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            actor_id: actor.actor_id.clone(),
            tenant_id: actor.tenant_id,
            request_id: actor.request_id.clone(),
            before: None,
            after: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_before(mut self, before: Option<Value>) -> Self {
        self.before = before;
        self
    }

    pub fn with_after(mut self, after: Option<Value>) -> Self {
        self.after = after;
        self
    }
}

/// Destination of audit entries
#[async_trait]
pub trait AuditSink: Send + Sync + Debug {
    async fn write(&self, entry: &AuditEntry) -> Result<()>;
}

/// Writes entries to the `audit_log` table
#[derive(Debug, Clone)]
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Most recent entries first
    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT id, action, entity_type, entity_id, actor_id, tenant_id, request_id, \
             before_value, after_value, timestamp FROM audit_log \
             ORDER BY timestamp DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Entries for one entity in the order they were written
    pub async fn for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT id, action, entity_type, entity_id, actor_id, tenant_id, request_id, \
             before_value, after_value, timestamp FROM audit_log \
             WHERE entity_type = ? AND entity_id = ? ORDER BY rowid ASC",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEntry> {
    let id: String = row.try_get("id")?;
    let tenant_id: Option<String> = row.try_get("tenant_id")?;
    let before: Option<String> = row.try_get("before_value")?;
    let after: Option<String> = row.try_get("after_value")?;
    let action: String = row.try_get("action")?;
    let timestamp: String = row.try_get("timestamp")?;

    let parse_uuid = |raw: &str| {
        Uuid::parse_str(raw).map_err(|e| AppError::audit(format!("bad uuid {raw:?}: {e}")))
    };

    Ok(AuditEntry {
        id: parse_uuid(id.as_str())?,
        action: AuditAction::parse(&action),
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        actor_id: row.try_get("actor_id")?,
        tenant_id: tenant_id.as_deref().map(parse_uuid).transpose()?,
        request_id: row.try_get("request_id")?,
        before: before.as_deref().map(serde_json::from_str::<Value>).transpose()?,
        after: after.as_deref().map(serde_json::from_str::<Value>).transpose()?,
        timestamp: parse_timestamp(&timestamp)?,
    })
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (id, action, entity_type, entity_id, actor_id, tenant_id, \
             request_id, before_value, after_value, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.action.as_str())
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.actor_id)
        .bind(entry.tenant_id.map(|id| id.to_string()))
        .bind(&entry.request_id)
        .bind(entry.before.as_ref().map(Value::to_string))
        .bind(entry.after.as_ref().map(Value::to_string))
        .bind(format_timestamp(&entry.timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::audit(e.to_string()))?;
        Ok(())
    }
}

/// Emits each entry as a structured log event
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<()> {
        info!(
            target: "audit",
            action = %entry.action,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            actor_id = entry.actor_id.as_deref().unwrap_or(""),
            tenant_id = ?entry.tenant_id,
            request_id = entry.request_id.as_deref().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}

/// Counter snapshot of an [`AuditLogger`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    /// Entries accepted onto the queue
    pub enqueued: u64,
    /// Entries the sink accepted
    pub written: u64,
    /// Entries the sink rejected
    pub failed: u64,
    /// Entries refused because the queue was full or closed
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct AuditCounters {
    enqueued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

enum AuditCommand {
    Record(Box<AuditEntry>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Bounded, non-blocking audit queue with a single writer task
pub struct AuditLogger {
    sender: mpsc::Sender<AuditCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<AuditCounters>,
}

impl Debug for AuditLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLogger")
            .field("stats", &self.stats())
            .finish()
    }
}

impl AuditLogger {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn new(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(AuditCounters::default());
        let worker = tokio::spawn(run_worker(sink, receiver, counters.clone()));

        Self {
            sender,
            worker: Mutex::new(Some(worker)),
            counters,
        }
    }

    pub fn log_create(
        &self,
        actor: &ActorContext,
        entity_type: &str,
        entity_id: Uuid,
        after: Option<Value>,
    ) {
        self.record(AuditEntry::new(AuditAction::Create, actor, entity_type, entity_id).with_after(after));
    }

    pub fn log_update(
        &self,
        actor: &ActorContext,
        entity_type: &str,
        entity_id: Uuid,
        before: Option<Value>,
        after: Option<Value>,
    ) {
        self.record(
            AuditEntry::new(AuditAction::Update, actor, entity_type, entity_id)
                .with_before(before)
                .with_after(after),
        );
    }

    pub fn log_delete(
        &self,
        actor: &ActorContext,
        entity_type: &str,
        entity_id: Uuid,
        before: Option<Value>,
    ) {
        self.record(AuditEntry::new(AuditAction::Delete, actor, entity_type, entity_id).with_before(before));
    }

    pub fn log_action(
        &self,
        actor: &ActorContext,
        action: &str,
        entity_type: &str,
        entity_id: impl fmt::Display,
        payload: Option<Value>,
    ) {
        self.record(
            AuditEntry::new(AuditAction::Custom(action.to_string()), actor, entity_type, entity_id)
                .with_after(payload),
        );
    }

    /// Enqueue without waiting; a full or closed queue drops the entry
    pub fn record(&self, entry: AuditEntry) {
        match self.sender.try_send(AuditCommand::Record(Box::new(entry))) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "logger shut down",
                };
                warn!(reason, "Dropping audit entry");
            }
        }
    }

    /// Wait until everything enqueued before this call has reached the sink
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        if self.sender.send(AuditCommand::Flush(ack)).await.is_err() {
            // Worker is gone, so nothing is pending
            return Ok(());
        }
        done.await
            .map_err(|_| AppError::audit("audit worker stopped during flush"))
    }

    /// Drain the queue and stop the worker. Later entries are dropped.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        if self.sender.send(AuditCommand::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }

        if let Some(worker) = self.worker.lock().await.take() {
            worker
                .await
                .map_err(|e| AppError::audit(format!("audit worker failed: {e}")))?;
        }
        debug!(stats = ?self.stats(), "Audit logger stopped");
        Ok(())
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn write_entry(sink: &dyn AuditSink, entry: &AuditEntry, counters: &AuditCounters) {
    match sink.write(entry).await {
        Ok(()) => {
            counters.written.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                error = %e,
                action = %entry.action,
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                "Failed to write audit entry"
            );
        }
    }
}

async fn run_worker(
    sink: Arc<dyn AuditSink>,
    mut receiver: mpsc::Receiver<AuditCommand>,
    counters: Arc<AuditCounters>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            AuditCommand::Record(entry) => write_entry(sink.as_ref(), &entry, &counters).await,
            AuditCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            AuditCommand::Shutdown(ack) => {
                // Refuse new entries, then drain what is already queued
                receiver.close();
                while let Some(command) = receiver.recv().await {
                    match command {
                        AuditCommand::Record(entry) => {
                            write_entry(sink.as_ref(), &entry, &counters).await
                        }
                        AuditCommand::Flush(ack) | AuditCommand::Shutdown(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
                let _ = ack.send(());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_round_trip() {
        for action in [
            AuditAction::Create,
            AuditAction::Update,
            AuditAction::Delete,
            AuditAction::Custom("reorder".to_string()),
        ] {
            assert_eq!(AuditAction::parse(action.as_str()), action);
        }
        assert_eq!(AuditAction::Custom("restore".to_string()).to_string(), "restore");
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_entries() {
        let logger = AuditLogger::new(Arc::new(TracingAuditSink), 8);
        let actor = ActorContext::new("user-1");
        logger.log_delete(&actor, "Tenant", Uuid::new_v4(), None);
        logger.shutdown().await.unwrap();
        assert_eq!(logger.stats().written, 1);
    }
}
