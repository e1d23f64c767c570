use std::sync::Arc;

use tracing::instrument;

use crate::context::OpContext;
use crate::entities::Tenant;
use crate::error::{AppError, Result};
use crate::repositories::base::{BaseRepository, Repository, RepositoryOptions};
use crate::storage::{Filter, Store};

#[derive(Debug, Clone)]
pub struct TenantRepository {
    base: BaseRepository<Tenant>,
}

impl TenantRepository {
    pub fn new(store: Arc<dyn Store>, options: RepositoryOptions) -> Self {
        Self {
            base: BaseRepository::new(store, options),
        }
    }

    #[instrument(skip(self, ctx))]
    pub async fn find_by_slug(&self, ctx: &OpContext, slug: &str) -> Result<Option<Tenant>> {
        if slug.is_empty() {
            return Err(AppError::validation("slug must not be empty"));
        }
        self.base
            .find_one_cached(ctx, &format!("by-slug:{slug}"), Filter::new().eq("slug", slug))
            .await
    }
}

impl Repository<Tenant> for TenantRepository {
    fn base(&self) -> &BaseRepository<Tenant> {
        &self.base
    }
}
