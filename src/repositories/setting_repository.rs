use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::context::OpContext;
use crate::entities::Setting;
use crate::error::{AppError, ErrorKind, Result};
use crate::repositories::base::{BaseRepository, Repository, RepositoryOptions};
use crate::storage::{Filter, Store};

#[derive(Debug, Clone)]
pub struct SettingRepository {
    base: BaseRepository<Setting>,
}

impl SettingRepository {
    pub fn new(store: Arc<dyn Store>, options: RepositoryOptions) -> Self {
        Self {
            base: BaseRepository::new(store, options),
        }
    }

    fn key_filter(tenant_id: Uuid, key: &str) -> Filter {
        Filter::new()
            .eq("tenant_id", tenant_id.to_string())
            .eq("key", key)
    }

    #[instrument(skip(self, ctx))]
    pub async fn get_by_key(&self, ctx: &OpContext, tenant_id: Uuid, key: &str) -> Result<Option<Setting>> {
        if key.is_empty() {
            return Err(AppError::validation("setting key must not be empty"));
        }
        self.base
            .find_one_cached(
                ctx,
                &format!("by-key:{tenant_id}:{key}"),
                Self::key_filter(tenant_id, key),
            )
            .await
    }

    /// Set a value, creating the setting when it does not exist yet
    #[instrument(skip(self, ctx, value))]
    pub async fn upsert(&self, ctx: &OpContext, tenant_id: Uuid, key: &str, value: Value) -> Result<Setting> {
        if let Some(mut existing) = self.base.find_one(ctx, Self::key_filter(tenant_id, key)).await? {
            existing.value = value;
            return self.base.update(ctx, existing).await;
        }

        match self
            .base
            .create(ctx, Setting::new(tenant_id, key, value.clone()))
            .await
        {
            Err(e) if e.kind() == ErrorKind::Conflict => {
                // Lost a race with a concurrent insert of the same key
                debug!(key, "Setting created concurrently, updating instead");
                let mut existing = self
                    .base
                    .find_one(ctx, Self::key_filter(tenant_id, key))
                    .await?
                    .ok_or(e)?;
                existing.value = value;
                self.base.update(ctx, existing).await
            }
            other => other,
        }
    }
}

impl Repository<Setting> for SettingRepository {
    fn base(&self) -> &BaseRepository<Setting> {
        &self.base
    }
}
