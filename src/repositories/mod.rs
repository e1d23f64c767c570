//! Repository pattern implementation for data access
//!
//! A single generic core ([`BaseRepository`]) provides CRUD, soft delete,
//! pagination, read-through caching and audit. Each entity repository wraps
//! it and adds its own finders.

pub mod audit;
pub mod base;
pub mod cache;
pub mod cache_keys;
pub mod factory;
pub mod metrics;
pub mod pagination;
pub mod service_repository;
pub mod setting_repository;
pub mod task_repository;
pub mod tenant_repository;
pub mod user_repository;
pub mod validation;

#[cfg(test)]
pub mod tests;

// Re-export repositories and factory for easier access
pub use audit::{AuditAction, AuditEntry, AuditLogger, AuditSink, AuditStats, SqliteAuditSink, TracingAuditSink};
pub use base::{BaseRepository, Repository, RepositoryOptions};
pub use cache::{CachePort, MemoryCache};
pub use cache_keys::CacheKeys;
pub use factory::RepositoryFactory;
pub use metrics::{CacheOutcome, InMemoryMetrics, MetricsCollector, OperationOutcome, RepositoryMetrics};
pub use pagination::{Page, PageInfo, PageLimits, PageRequest};
pub use service_repository::ServiceRepository;
pub use setting_repository::SettingRepository;
pub use task_repository::TaskRepository;
pub use tenant_repository::TenantRepository;
pub use user_repository::UserRepository;
