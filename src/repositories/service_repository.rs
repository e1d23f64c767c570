//! Service catalogue repository
//!
//! Besides the generic operations, services carry a display position per
//! tenant. Reordering rewrites every position in one transaction so that a
//! half-applied ordering is never visible.

use std::{collections::HashSet, sync::Arc};

use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::context::OpContext;
use crate::entities::{Record, Service};
use crate::error::{AppError, Result};
use crate::repositories::base::{BaseRepository, Repository, RepositoryOptions, now};
use crate::repositories::pagination::{Page, PageRequest};
use crate::storage::{FieldChange, Filter, OrderDirection, Store, Visibility, WriteOp};

#[derive(Debug, Clone)]
pub struct ServiceRepository {
    base: BaseRepository<Service>,
}

impl ServiceRepository {
    pub fn new(store: Arc<dyn Store>, options: RepositoryOptions) -> Self {
        Self {
            base: BaseRepository::new(store, options),
        }
    }

    /// Services of one category in catalogue order
    #[instrument(skip(self, ctx))]
    pub async fn list_by_category(
        &self,
        ctx: &OpContext,
        tenant_id: Uuid,
        category: &str,
        page: PageRequest,
    ) -> Result<Page<Service>> {
        let filter = Filter::new()
            .eq("tenant_id", tenant_id.to_string())
            .eq("category", category)
            .order_by("position", OrderDirection::Asc);
        self.base.list(ctx, filter, page).await
    }

    /// Services priced within `[min_cents, max_cents]`, cheapest first
    #[instrument(skip(self, ctx))]
    pub async fn list_by_price_range(
        &self,
        ctx: &OpContext,
        tenant_id: Uuid,
        min_cents: i64,
        max_cents: i64,
        page: PageRequest,
    ) -> Result<Page<Service>> {
        if min_cents > max_cents {
            return Err(AppError::validation("min_cents must not exceed max_cents"));
        }
        let filter = Filter::new()
            .eq("tenant_id", tenant_id.to_string())
            .gte("price_cents", min_cents)
            .lte("price_cents", max_cents)
            .order_by("price_cents", OrderDirection::Asc);
        self.base.list(ctx, filter, page).await
    }

    /// Give `ids` the positions 0..n in the order given, atomically
    #[instrument(skip(self, ctx, ids), fields(count = ids.len()))]
    pub async fn reorder(&self, ctx: &OpContext, tenant_id: Uuid, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Err(AppError::validation("reorder needs at least one service"));
        }
        let unique: HashSet<&Uuid> = ids.iter().collect();
        if unique.len() != ids.len() {
            return Err(AppError::validation("reorder ids must be unique"));
        }

        let owned = self
            .base
            .run_store(
                ctx,
                "reorder",
                self.base.store().count(
                    Service::TABLE,
                    &Filter::new()
                        .eq("tenant_id", tenant_id.to_string())
                        .is_in("id", ids.iter().map(Uuid::to_string)),
                ),
            )
            .await?;
        if owned != ids.len() as i64 {
            return Err(AppError::validation(format!(
                "only {owned} of {} services belong to tenant {tenant_id}",
                ids.len()
            )));
        }

        let now = now();
        let ops = ids
            .iter()
            .enumerate()
            .map(|(position, id)| WriteOp::UpdateFields {
                table: Service::TABLE,
                id: *id,
                changes: vec![
                    FieldChange::attr("position", position as i64),
                    FieldChange::UpdatedAt(now),
                ],
                visibility: Visibility::Visible,
            })
            .collect();

        self.base
            .write(ctx, "reorder", ids, self.base.store().transaction(ops))
            .await?;
        debug!(%tenant_id, "Reordered services");

        for (position, id) in ids.iter().enumerate() {
            self.base.audit_action(
                ctx,
                "reorder",
                id,
                Some(json!({ "position": position, "tenant_id": tenant_id })),
            );
        }
        Ok(())
    }
}

impl Repository<Service> for ServiceRepository {
    fn base(&self) -> &BaseRepository<Service> {
        &self.base
    }
}
