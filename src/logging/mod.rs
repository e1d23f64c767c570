//! Structured logging for the data-access layer
//!
//! Installs the tracing subscriber and provides a log context plus an
//! operation logger that repositories use to time their calls.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{Level, Span, debug};
use tracing_subscriber::{EnvFilter, prelude::*};
use uuid::Uuid;

use crate::context::ActorContext;

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` and falls back to `info`. Calling this more
/// than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_line_number(true)
                .with_file(true),
        )
        .try_init();
}

/// Logging context for structured logging
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogContext {
    /// Request ID associated with the log
    pub request_id: Option<String>,
    /// Actor performing the operation
    pub actor_id: Option<String>,
    /// Tenant the operation runs for
    pub tenant_id: Option<Uuid>,
    /// Operation that generated the log
    pub operation: Option<String>,
    /// Entity type associated with the log
    pub entity_type: Option<String>,
    /// Duration of the operation (if applicable)
    pub duration: Option<Duration>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log context from the caller's actor context
    pub fn from_actor(actor: &ActorContext) -> Self {
        Self {
            request_id: actor.request_id.clone(),
            actor_id: actor.actor_id.clone(),
            tenant_id: actor.tenant_id,
            ..Default::default()
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Create a tracing span from a log context
pub fn create_span(name: &str, context: &LogContext) -> Span {
    tracing::span!(
        Level::INFO,
        "repository",
        label = %name,
        request_id = %context.request_id.as_deref().unwrap_or("none"),
        actor_id = %context.actor_id.as_deref().unwrap_or("none"),
        tenant_id = %context.tenant_id.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string()),
        operation = %context.operation.as_deref().unwrap_or("unknown"),
        entity_type = %context.entity_type.as_deref().unwrap_or("unknown"),
        duration_ms = context.duration.map(|d| d.as_millis() as u64).unwrap_or(0),
    )
}

fn log_debug(message: &str, context: &LogContext) {
    let span = create_span("log", context);
    let _guard = span.enter();
    debug!("{}", message);
}

/// Operation logger for timing and logging repository operations
pub struct OperationLogger {
    /// Name of the operation
    pub name: String,
    /// Start time of the operation
    pub start_time: Instant,
    /// Log context for the operation
    pub context: LogContext,
    /// Whether to log at start and end
    pub log_start_end: bool,
}

impl OperationLogger {
    pub fn new(name: impl Into<String>, context: LogContext) -> Self {
        let name = name.into();
        Self {
            name: name.clone(),
            start_time: Instant::now(),
            context: context.with_operation(name),
            log_start_end: true,
        }
    }

    pub fn with_log_start_end(mut self, log_start_end: bool) -> Self {
        self.log_start_end = log_start_end;
        self
    }

    pub fn start(&self) {
        if self.log_start_end {
            log_debug(&format!("Starting operation: {}", self.name), &self.context);
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// End the operation and log its outcome
    pub fn end(&self, succeeded: bool) -> Duration {
        let duration = self.elapsed();
        if self.log_start_end {
            let context = self.context.clone().with_duration(duration);
            let outcome = if succeeded { "Completed" } else { "Failed" };
            log_debug(
                &format!("{} operation: {} in {:?}", outcome, self.name, duration),
                &context,
            );
        }
        duration
    }
}
