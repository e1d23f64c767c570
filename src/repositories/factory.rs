//! Repository factory for creating repositories
//!
//! Centralizes repository construction so that every repository shares the
//! same store, cache, metrics collector and audit logger.

use std::sync::Arc;

use crate::config::RepositoryConfig;
use crate::repositories::audit::AuditLogger;
use crate::repositories::base::RepositoryOptions;
use crate::repositories::cache::CachePort;
use crate::repositories::metrics::MetricsCollector;
use crate::repositories::{
    ServiceRepository, SettingRepository, TaskRepository, TenantRepository, UserRepository,
};
use crate::storage::Store;

/// Repository factory for creating repositories
#[derive(Debug, Clone)]
pub struct RepositoryFactory {
    store: Arc<dyn Store>,
    options: RepositoryOptions,
}

impl RepositoryFactory {
    /// Create a new repository factory
    pub fn new(store: Arc<dyn Store>, options: RepositoryOptions) -> Self {
        Self { store, options }
    }

    /// Factory with collaborators wired from configuration
    pub fn from_config(
        store: Arc<dyn Store>,
        config: &RepositoryConfig,
        cache: Option<Arc<dyn CachePort>>,
        metrics: Option<Arc<dyn MetricsCollector>>,
        audit: Option<Arc<AuditLogger>>,
    ) -> Self {
        let mut options = RepositoryOptions::from_config(config);
        if let Some(cache) = cache {
            options = options.with_cache(cache);
        }
        if let Some(metrics) = metrics {
            options = options.with_metrics(metrics);
        }
        if let Some(audit) = audit {
            options = options.with_audit(audit);
        }
        Self::new(store, options)
    }

    /// Get the shared store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn create_user_repository(&self) -> UserRepository {
        UserRepository::new(self.store.clone(), self.options.clone())
    }

    pub fn create_service_repository(&self) -> ServiceRepository {
        ServiceRepository::new(self.store.clone(), self.options.clone())
    }

    /// Create a task repository
    pub fn create_task_repository(&self) -> TaskRepository {
        TaskRepository::new(self.store.clone(), self.options.clone())
    }

    pub fn create_setting_repository(&self) -> SettingRepository {
        SettingRepository::new(self.store.clone(), self.options.clone())
    }

    pub fn create_tenant_repository(&self) -> TenantRepository {
        TenantRepository::new(self.store.clone(), self.options.clone())
    }
}
