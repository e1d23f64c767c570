use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::context::OpContext;
use crate::entities::{User, UserRole};
use crate::error::{AppError, Result};
use crate::repositories::base::{BaseRepository, Repository, RepositoryOptions};
use crate::repositories::pagination::{Page, PageRequest};
use crate::storage::{Filter, Store};

#[derive(Debug, Clone)]
pub struct UserRepository {
    base: BaseRepository<User>,
}

impl UserRepository {
    pub fn new(store: Arc<dyn Store>, options: RepositoryOptions) -> Self {
        Self {
            base: BaseRepository::new(store, options),
        }
    }

    /// Visible user with this exact email, read through the cache
    #[instrument(skip(self, ctx))]
    pub async fn find_by_email(&self, ctx: &OpContext, email: &str) -> Result<Option<User>> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AppError::validation("email must not be empty"));
        }
        self.base
            .find_one_cached(
                ctx,
                &format!("by-email:{email}"),
                Filter::new().eq("email", email),
            )
            .await
    }

    #[instrument(skip(self, ctx))]
    pub async fn list_by_tenant(
        &self,
        ctx: &OpContext,
        tenant_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<User>> {
        let filter = Filter::new().eq("tenant_id", tenant_id.to_string());
        self.base.list(ctx, filter, page).await
    }

    #[instrument(skip(self, ctx))]
    pub async fn list_by_role(
        &self,
        ctx: &OpContext,
        tenant_id: Uuid,
        role: UserRole,
        page: PageRequest,
    ) -> Result<Page<User>> {
        let filter = Filter::new()
            .eq("tenant_id", tenant_id.to_string())
            .eq("role", role.as_str());
        self.base.list(ctx, filter, page).await
    }
}

impl Repository<User> for UserRepository {
    fn base(&self) -> &BaseRepository<User> {
        &self.base
    }
}
