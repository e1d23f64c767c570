//! Repository operation and cache metrics

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::Mutex,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ErrorKind;

/// Cache lookup outcome for metrics tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheOutcome {
    /// Hit (found in cache)
    Hit,
    /// Miss (not found in cache)
    Miss,
    /// The cache port failed; treated as a miss
    Error,
}

/// Outcome of one repository operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationOutcome {
    Success,
    Failure(ErrorKind),
}

/// Sink for repository metrics. Implementations must be cheap and must not fail.
pub trait MetricsCollector: Send + Sync + Debug {
    fn record_operation(
        &self,
        entity_type: &str,
        operation: &str,
        outcome: OperationOutcome,
        duration: Duration,
    );

    fn record_cache(&self, entity_type: &str, outcome: CacheOutcome);
}

/// Aggregated metrics for one entity type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetrics {
    /// Entity type the metrics belong to
    pub entity_type: String,
    /// Operations by name
    pub operations: HashMap<String, u64>,
    /// Failed operations by error kind
    pub errors: HashMap<String, u64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,
    /// Cache hit rate (0.0 to 1.0)
    pub hit_rate: f64,
    /// Average operation latency in microseconds
    pub avg_duration_us: u64,
    total_duration_us: u64,
    total_operations: u64,
    /// Time of the last update
    pub last_updated: Option<DateTime<Utc>>,
}

impl RepositoryMetrics {
    fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            ..Default::default()
        }
    }

    /// Calculate derived metrics
    fn calculate_derived_metrics(&mut self) {
        let lookups = self.cache_hits + self.cache_misses + self.cache_errors;
        if lookups > 0 {
            self.hit_rate = self.cache_hits as f64 / lookups as f64;
        }
        if self.total_operations > 0 {
            self.avg_duration_us = self.total_duration_us / self.total_operations;
        }
        self.last_updated = Some(Utc::now());
    }

    pub fn operation_count(&self, operation: &str) -> u64 {
        self.operations.get(operation).copied().unwrap_or(0)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.values().sum()
    }
}

/// Metrics collector that keeps everything in memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    metrics: Mutex<HashMap<String, RepositoryMetrics>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, entity_type: &str, f: impl FnOnce(&mut RepositoryMetrics)) {
        match self.metrics.lock() {
            Ok(mut metrics) => {
                let entry = metrics
                    .entry(entity_type.to_string())
                    .or_insert_with(|| RepositoryMetrics::new(entity_type));
                f(entry);
                entry.calculate_derived_metrics();
            }
            Err(_) => warn!(entity_type, "Metrics lock poisoned, dropping sample"),
        }
    }

    /// Snapshot for one entity type
    pub fn snapshot(&self, entity_type: &str) -> RepositoryMetrics {
        self.metrics
            .lock()
            .ok()
            .and_then(|metrics| metrics.get(entity_type).cloned())
            .unwrap_or_else(|| RepositoryMetrics::new(entity_type))
    }

    /// Snapshot for every entity type seen so far
    pub fn all(&self) -> Vec<RepositoryMetrics> {
        let mut all: Vec<RepositoryMetrics> = self
            .metrics
            .lock()
            .map(|metrics| metrics.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.entity_type.cmp(&b.entity_type));
        all
    }

    pub fn reset(&self) {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.clear();
        }
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn record_operation(
        &self,
        entity_type: &str,
        operation: &str,
        outcome: OperationOutcome,
        duration: Duration,
    ) {
        self.update(entity_type, |m| {
            *m.operations.entry(operation.to_string()).or_default() += 1;
            if let OperationOutcome::Failure(kind) = outcome {
                *m.errors.entry(format!("{kind:?}")).or_default() += 1;
            }
            m.total_operations += 1;
            m.total_duration_us += duration.as_micros() as u64;
        });
    }

    fn record_cache(&self, entity_type: &str, outcome: CacheOutcome) {
        self.update(entity_type, |m| match outcome {
            CacheOutcome::Hit => m.cache_hits += 1,
            CacheOutcome::Miss => m.cache_misses += 1,
            CacheOutcome::Error => m.cache_errors += 1,
        });
    }
}
