//! Generic repository core
//!
//! [`BaseRepository`] implements create/read/update/delete and paginated
//! listing once for every [`Record`], together with read-through caching,
//! invalidation on write, metrics and audit. Entity repositories hold one
//! and implement [`Repository`] by delegating to it.

use std::{
    collections::HashSet,
    fmt::Display,
    future::Future,
    marker::PhantomData,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::RepositoryConfig;
use crate::context::OpContext;
use crate::entities::{Record, RecordMeta};
use crate::error::{AppError, ErrorKind, Result};
use crate::logging::{LogContext, OperationLogger};
use crate::repositories::audit::AuditLogger;
use crate::repositories::cache::CachePort;
use crate::repositories::cache_keys::CacheKeys;
use crate::repositories::metrics::{CacheOutcome, MetricsCollector, OperationOutcome};
use crate::repositories::pagination::{Page, PageInfo, PageLimits, PageRequest};
use crate::storage::{FieldChange, Filter, Store, StoredRow, Visibility, Window, WriteOp};

/// Current time at the precision the store keeps
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Optional collaborators and tuning for a repository. Everything may be left
/// out; the repository is fully functional without cache, metrics or audit.
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    cache: Option<Arc<dyn CachePort>>,
    cache_ttl: Duration,
    limits: PageLimits,
    metrics: Option<Arc<dyn MetricsCollector>>,
    audit: Option<Arc<AuditLogger>>,
    log_operations: bool,
    namespace: Option<String>,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self::from_config(&RepositoryConfig::default())
    }
}

impl RepositoryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self {
            cache: None,
            cache_ttl: config.cache_ttl,
            limits: PageLimits::clamped(config.default_page_size, config.max_page_size),
            metrics: None,
            audit: None,
            log_operations: config.log_operations,
            namespace: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CachePort>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_page_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Log start and end of every operation at debug level
    pub fn with_log_operations(mut self, log_operations: bool) -> Self {
        self.log_operations = log_operations;
        self
    }

    /// Cache namespace; defaults to the entity table name
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }
}

/// CRUD, soft delete, pagination, caching and audit for one record type
#[derive(Debug)]
pub struct BaseRepository<T: Record> {
    store: Arc<dyn Store>,
    keys: CacheKeys,
    cache: Option<Arc<dyn CachePort>>,
    cache_ttl: Duration,
    limits: PageLimits,
    metrics: Option<Arc<dyn MetricsCollector>>,
    audit: Option<Arc<AuditLogger>>,
    log_operations: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for BaseRepository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            keys: self.keys.clone(),
            cache: self.cache.clone(),
            cache_ttl: self.cache_ttl,
            limits: self.limits,
            metrics: self.metrics.clone(),
            audit: self.audit.clone(),
            log_operations: self.log_operations,
            _record: PhantomData,
        }
    }
}

impl<T: Record> BaseRepository<T> {
    /// Create a new base repository
    pub fn new(store: Arc<dyn Store>, options: RepositoryOptions) -> Self {
        let namespace = options.namespace.unwrap_or_else(|| T::TABLE.to_string());
        Self {
            store,
            keys: CacheKeys::new(namespace),
            cache: options.cache,
            cache_ttl: options.cache_ttl,
            limits: options.limits,
            metrics: options.metrics,
            audit: options.audit,
            log_operations: options.log_operations,
            _record: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn audit(&self) -> Option<&Arc<AuditLogger>> {
        self.audit.as_ref()
    }

    /// Time an operation, log its outcome and report it to the metrics collector
    async fn observe<R, F>(&self, ctx: &OpContext, operation: &'static str, fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        let logger = OperationLogger::new(
            operation,
            LogContext::from_actor(&ctx.actor).with_entity_type(T::ENTITY),
        )
        .with_log_start_end(self.log_operations);
        logger.start();

        let result = fut.await;
        let duration = logger.end(result.is_ok());

        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(_) => OperationOutcome::Success,
                Err(e) => OperationOutcome::Failure(e.kind()),
            };
            metrics.record_operation(T::ENTITY, operation, outcome, duration);
        }
        if let Err(e) = &result {
            e.log();
        }
        result
    }

    /// Run one store round trip under the caller's cancellation and deadline,
    /// tagging failures with the operation and entity type
    pub async fn run_store<R, F>(&self, ctx: &OpContext, operation: &str, fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        ctx.run(operation, fut)
            .await
            .map_err(|e| e.in_operation(operation, T::ENTITY))
    }

    /// Run a store write, then invalidate the affected cache keys.
    ///
    /// Invalidation runs after the write is confirmed and is not subject to
    /// cancellation. A cancelled write may still have committed, so it is
    /// invalidated as well.
    pub async fn write<R, F>(&self, ctx: &OpContext, operation: &str, ids: &[Uuid], fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        let result = self.run_store(ctx, operation, fut).await;
        let may_have_committed = match &result {
            Ok(_) => true,
            Err(e) => e.kind() == ErrorKind::Cancelled,
        };
        if may_have_committed {
            self.invalidate(ids).await;
        }
        result
    }

    /// Drop the single-record keys of `ids` and every query-shaped key of the
    /// namespace. Entity repositories call this after bypass writes.
    pub async fn invalidate(&self, ids: &[Uuid]) {
        let Some(cache) = &self.cache else {
            return;
        };
        cache.advance_epoch();

        let keys: Vec<String> = ids.iter().map(|id| self.keys.by_id(*id)).collect();
        if !keys.is_empty() {
            if let Err(e) = cache.delete(&keys).await {
                warn!(error = %e, entity_type = T::ENTITY, "Cache delete failed");
            }
        }
        let pattern = self.keys.query_pattern();
        if let Err(e) = cache.delete_pattern(&pattern).await {
            warn!(error = %e, entity_type = T::ENTITY, pattern, "Cache pattern delete failed");
        }
        debug!(entity_type = T::ENTITY, ids = ids.len(), "Invalidated cache");
    }

    /// Drop every key in the namespace
    pub async fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.advance_epoch();
            if let Err(e) = cache.delete_pattern(&self.keys.namespace_pattern()).await {
                warn!(error = %e, entity_type = T::ENTITY, "Cache namespace delete failed");
            }
        }
    }

    /// Read a cached snapshot. Any failure, including a cancelled context,
    /// counts as a miss.
    pub async fn cache_get<V: DeserializeOwned>(&self, ctx: &OpContext, key: &str) -> Option<V> {
        let cache = self.cache.as_ref()?;
        let outcome = match ctx.run("cache_get", cache.get_json(key)).await {
            Ok(Some(value)) => match serde_json::from_value::<V>(value) {
                Ok(decoded) => Ok(Some(decoded)),
                Err(e) => Err(AppError::cache(format!("undecodable entry {key}: {e}"))),
            },
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Some(value)) => {
                self.record_cache(CacheOutcome::Hit);
                Some(value)
            }
            Ok(None) => {
                self.record_cache(CacheOutcome::Miss);
                None
            }
            Err(e) => {
                if e.kind() != ErrorKind::Cancelled {
                    warn!(error = %e, key, "Cache read failed, treating as miss");
                }
                self.record_cache(CacheOutcome::Error);
                None
            }
        }
    }

    /// Store a snapshot with the configured TTL; failures are only logged
    pub async fn cache_set<V: Serialize + ?Sized>(&self, key: &str, value: &V) {
        let Some(cache) = &self.cache else {
            return;
        };
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, key, "Could not encode cache entry");
                return;
            }
        };
        if let Err(e) = cache.set_json(key, encoded, self.cache_ttl).await {
            warn!(error = %e, key, "Cache write failed");
        }
    }

    /// Invalidation counter of the cache, to capture before a store read
    pub fn generation(&self) -> u64 {
        self.cache.as_ref().map_or(0, |cache| cache.epoch())
    }

    /// Cache a value read from the store at `seen`. If an invalidation ran
    /// since then the value may predate a write, so the entry is dropped again.
    pub async fn cache_fill<V: Serialize + ?Sized>(&self, key: &str, value: &V, seen: u64) {
        let Some(cache) = &self.cache else {
            return;
        };
        self.cache_set(key, value).await;
        if self.generation() != seen {
            debug!(key, "Write raced a cache fill, dropping entry");
            if let Err(e) = cache.delete(&[key.to_string()]).await {
                warn!(error = %e, key, "Cache delete failed");
            }
        }
    }

    fn record_cache(&self, outcome: CacheOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache(T::ENTITY, outcome);
        }
    }

    fn snapshot(record: &T) -> Option<Value> {
        serde_json::to_value(record)
            .map_err(|e| warn!(error = %e, entity_type = T::ENTITY, "Could not snapshot record for audit"))
            .ok()
    }

    /// Record a custom audit action; a no-op without an audit logger
    pub fn audit_action(&self, ctx: &OpContext, action: &str, entity_id: impl Display, payload: Option<Value>) {
        if let Some(audit) = &self.audit {
            audit.log_action(&ctx.actor, action, T::ENTITY, entity_id, payload);
        }
    }

    fn require_id(id: Uuid) -> Result<()> {
        if id.is_nil() {
            return Err(AppError::validation(format!("{} id must not be empty", T::ENTITY)));
        }
        Ok(())
    }

    /// Assign id and timestamps to a record about to be inserted
    fn prepare_new(record: &mut T, now: DateTime<Utc>) {
        let meta: &mut RecordMeta = record.meta_mut();
        if meta.id.is_nil() {
            meta.id = Uuid::new_v4();
        }
        meta.created_at = if RecordMeta::is_unset(&meta.created_at) {
            now
        } else {
            meta.created_at.trunc_subsecs(6)
        };
        meta.updated_at = if RecordMeta::is_unset(&meta.updated_at) {
            meta.created_at
        } else {
            meta.updated_at.trunc_subsecs(6)
        };
        meta.deleted_at = None;
    }

    /// Persist a new record.
    ///
    /// A nil id is replaced with a fresh one. A pre-assigned id that is
    /// already taken, even by a soft-deleted row, is a conflict, as is any
    /// unique key violation.
    #[instrument(skip(self, ctx, record), fields(entity_type = T::ENTITY))]
    pub async fn create(&self, ctx: &OpContext, record: T) -> Result<T> {
        self.observe(ctx, "create", async {
            record.validate()?;
            let mut record = record;
            let preassigned = record.meta().has_id();
            Self::prepare_new(&mut record, now());
            let id = record.id();

            if preassigned {
                let taken = self
                    .run_store(
                        ctx,
                        "create",
                        self.store.count(T::TABLE, &Filter::by_id(id).including_deleted()),
                    )
                    .await?;
                if taken > 0 {
                    return Err(AppError::conflict(format!(
                        "{} with ID {} already exists",
                        T::ENTITY,
                        id
                    )));
                }
            }

            let row = StoredRow::from_record(&record)?;
            self.write(ctx, "create", &[id], self.store.insert(T::TABLE, &row))
                .await?;

            if let Some(audit) = &self.audit {
                audit.log_create(&ctx.actor, T::ENTITY, id, Self::snapshot(&record));
            }
            debug!(entity_type = T::ENTITY, %id, "Created record");
            Ok(record)
        })
        .await
    }

    /// Fetch a visible record, consulting the cache first
    #[instrument(skip(self, ctx), fields(entity_type = T::ENTITY))]
    pub async fn get_by_id(&self, ctx: &OpContext, id: Uuid) -> Result<T> {
        self.observe(ctx, "get_by_id", async {
            Self::require_id(id)?;
            let key = self.keys.by_id(id);
            if let Some(record) = self.cache_get::<T>(ctx, &key).await {
                if !record.meta().is_deleted() {
                    return Ok(record);
                }
            }

            let seen = self.generation();
            let row = self
                .run_store(ctx, "get_by_id", self.store.find_one(T::TABLE, &Filter::by_id(id)))
                .await?
                .ok_or_else(|| AppError::not_found(T::ENTITY, id))?;
            let record: T = row.into_record()?;

            self.cache_fill(&key, &record, seen).await;
            Ok(record)
        })
        .await
    }

    /// Fetch a record whether or not it is soft-deleted. Never cached.
    #[instrument(skip(self, ctx), fields(entity_type = T::ENTITY))]
    pub async fn get_by_id_including_deleted(&self, ctx: &OpContext, id: Uuid) -> Result<T> {
        self.observe(ctx, "get_by_id_including_deleted", async {
            Self::require_id(id)?;
            let row = self
                .run_store(
                    ctx,
                    "get_by_id_including_deleted",
                    self.store.find_one(T::TABLE, &Filter::by_id(id).including_deleted()),
                )
                .await?
                .ok_or_else(|| AppError::not_found(T::ENTITY, id))?;
            row.into_record()
        })
        .await
    }

    /// Replace a visible record. `created_at` is kept from the stored row and
    /// `updated_at` is refreshed.
    #[instrument(skip(self, ctx, record), fields(entity_type = T::ENTITY, id = %record.id()))]
    pub async fn update(&self, ctx: &OpContext, record: T) -> Result<T> {
        self.observe(ctx, "update", async {
            record.validate()?;
            let id = record.id();
            Self::require_id(id)?;

            let before: T = self
                .run_store(ctx, "update", self.store.find_one(T::TABLE, &Filter::by_id(id)))
                .await?
                .ok_or_else(|| AppError::not_found(T::ENTITY, id))?
                .into_record()?;

            let mut record = record;
            {
                let meta = record.meta_mut();
                meta.created_at = before.meta().created_at;
                meta.updated_at = now();
                meta.deleted_at = None;
            }
            let row = StoredRow::from_record(&record)?;
            let changes = [FieldChange::Data(row.data), FieldChange::UpdatedAt(row.updated_at)];

            let affected = self
                .write(
                    ctx,
                    "update",
                    &[id],
                    self.store.update_fields(T::TABLE, id, &changes, Visibility::Visible),
                )
                .await?;
            if affected == 0 {
                // Soft-deleted or removed since it was read
                return Err(AppError::not_found(T::ENTITY, id));
            }

            if let Some(audit) = &self.audit {
                audit.log_update(
                    &ctx.actor,
                    T::ENTITY,
                    id,
                    Self::snapshot(&before),
                    Self::snapshot(&record),
                );
            }
            Ok(record)
        })
        .await
    }

    /// Hide a record from default reads by stamping `deleted_at`
    #[instrument(skip(self, ctx), fields(entity_type = T::ENTITY))]
    pub async fn soft_delete(&self, ctx: &OpContext, id: Uuid) -> Result<()> {
        self.observe(ctx, "soft_delete", async {
            Self::require_id(id)?;

            // The pre-image is only needed for the audit trail
            let before = match &self.audit {
                Some(_) => self
                    .run_store(ctx, "soft_delete", self.store.find_one(T::TABLE, &Filter::by_id(id)))
                    .await?
                    .map(StoredRow::into_record::<T>)
                    .transpose()?,
                None => None,
            };

            let now = now();
            let changes = [FieldChange::DeletedAt(Some(now)), FieldChange::UpdatedAt(now)];
            let affected = self
                .write(
                    ctx,
                    "soft_delete",
                    &[id],
                    self.store.update_fields(T::TABLE, id, &changes, Visibility::Visible),
                )
                .await?;
            if affected == 0 {
                return Err(AppError::not_found(T::ENTITY, id));
            }

            if let Some(audit) = &self.audit {
                audit.log_delete(&ctx.actor, T::ENTITY, id, before.as_ref().and_then(Self::snapshot));
            }
            Ok(())
        })
        .await
    }

    /// Remove a row permanently, soft-deleted or not. Reserved for erasure flows.
    #[instrument(skip(self, ctx), fields(entity_type = T::ENTITY))]
    pub async fn delete(&self, ctx: &OpContext, id: Uuid) -> Result<()> {
        self.observe(ctx, "delete", async {
            Self::require_id(id)?;

            let before = match &self.audit {
                Some(_) => self
                    .run_store(
                        ctx,
                        "delete",
                        self.store.find_one(T::TABLE, &Filter::by_id(id).including_deleted()),
                    )
                    .await?
                    .map(StoredRow::into_record::<T>)
                    .transpose()?,
                None => None,
            };

            let affected = self
                .write(ctx, "delete", &[id], self.store.delete(T::TABLE, id))
                .await?;
            if affected == 0 {
                return Err(AppError::not_found(T::ENTITY, id));
            }

            if let Some(audit) = &self.audit {
                audit.log_delete(&ctx.actor, T::ENTITY, id, before.as_ref().and_then(Self::snapshot));
            }
            Ok(())
        })
        .await
    }

    /// Clear the soft-delete timestamp of a record and return it
    #[instrument(skip(self, ctx), fields(entity_type = T::ENTITY))]
    pub async fn restore(&self, ctx: &OpContext, id: Uuid) -> Result<T> {
        self.observe(ctx, "restore", async {
            Self::require_id(id)?;
            let now = now();
            let changes = [FieldChange::DeletedAt(None), FieldChange::UpdatedAt(now)];
            let affected = self
                .write(
                    ctx,
                    "restore",
                    &[id],
                    self.store.update_fields(T::TABLE, id, &changes, Visibility::Any),
                )
                .await?;
            if affected == 0 {
                return Err(AppError::not_found(T::ENTITY, id));
            }

            let record: T = self
                .run_store(ctx, "restore", self.store.find_one(T::TABLE, &Filter::by_id(id)))
                .await?
                .ok_or_else(|| AppError::not_found(T::ENTITY, id))?
                .into_record()?;

            self.audit_action(ctx, "restore", id, Self::snapshot(&record));
            Ok(record)
        })
        .await
    }

    /// One page of visible records matching `filter`.
    ///
    /// Runs a count and a fetch as two independent reads, so under concurrent
    /// writes the total and the page may disagree slightly.
    #[instrument(skip(self, ctx), fields(entity_type = T::ENTITY))]
    pub async fn list(&self, ctx: &OpContext, filter: Filter, page: PageRequest) -> Result<Page<T>> {
        let filter = Filter {
            visibility: Visibility::Visible,
            ..filter
        };
        self.observe(ctx, "list", self.list_page(ctx, "list", filter, page))
            .await
    }

    /// Like [`list`](Self::list) but soft-deleted records are included
    #[instrument(skip(self, ctx), fields(entity_type = T::ENTITY))]
    pub async fn list_including_deleted(
        &self,
        ctx: &OpContext,
        filter: Filter,
        page: PageRequest,
    ) -> Result<Page<T>> {
        let filter = filter.including_deleted();
        self.observe(
            ctx,
            "list_including_deleted",
            self.list_page(ctx, "list_including_deleted", filter, page),
        )
        .await
    }

    async fn list_page(
        &self,
        ctx: &OpContext,
        operation: &'static str,
        filter: Filter,
        page: PageRequest,
    ) -> Result<Page<T>> {
        filter.validate()?;
        let page = page.normalize(self.limits);
        let key = self.keys.list(&filter, page);
        if let Some(cached) = self.cache_get::<Page<T>>(ctx, &key).await {
            return Ok(cached);
        }

        let seen = self.generation();
        let total = self
            .run_store(ctx, operation, self.store.count(T::TABLE, &filter))
            .await?;
        let items = self
            .run_store(ctx, operation, self.store.find_many(T::TABLE, &filter, page.window()))
            .await?
            .into_iter()
            .map(StoredRow::into_record)
            .collect::<Result<Vec<T>>>()?;

        let result = Page {
            items,
            info: PageInfo::new(page, total),
        };
        self.cache_fill(&key, &result, seen).await;
        Ok(result)
    }

    /// Number of records matching `filter`, honouring its visibility
    #[instrument(skip(self, ctx), fields(entity_type = T::ENTITY))]
    pub async fn count(&self, ctx: &OpContext, filter: Filter) -> Result<i64> {
        self.observe(ctx, "count", async {
            filter.validate()?;
            let key = self.keys.count(&filter);
            if let Some(total) = self.cache_get::<i64>(ctx, &key).await {
                return Ok(total);
            }
            let seen = self.generation();
            let total = self
                .run_store(ctx, "count", self.store.count(T::TABLE, &filter))
                .await?;
            self.cache_fill(&key, &total, seen).await;
            Ok(total)
        })
        .await
    }

    /// Whether a visible record with this id exists
    #[instrument(skip(self, ctx), fields(entity_type = T::ENTITY))]
    pub async fn exists(&self, ctx: &OpContext, id: Uuid) -> Result<bool> {
        self.observe(ctx, "exists", async {
            Self::require_id(id)?;
            let total = self
                .run_store(ctx, "exists", self.store.count(T::TABLE, &Filter::by_id(id)))
                .await?;
            Ok(total > 0)
        })
        .await
    }

    /// First record matching `filter`, uncached
    #[instrument(skip(self, ctx), fields(entity_type = T::ENTITY))]
    pub async fn find_one(&self, ctx: &OpContext, filter: Filter) -> Result<Option<T>> {
        self.observe(ctx, "find_one", async {
            filter.validate()?;
            self.run_store(ctx, "find_one", self.store.find_one(T::TABLE, &filter))
                .await?
                .map(StoredRow::into_record)
                .transpose()
        })
        .await
    }

    /// First record matching `filter`, cached under `discriminator` in the
    /// query namespace so that any write to this repository drops it
    #[instrument(skip(self, ctx, filter), fields(entity_type = T::ENTITY))]
    pub async fn find_one_cached(
        &self,
        ctx: &OpContext,
        discriminator: &str,
        filter: Filter,
    ) -> Result<Option<T>> {
        self.observe(ctx, "find_one_cached", async {
            filter.validate()?;
            let key = self.keys.query(discriminator);
            if let Some(record) = self.cache_get::<T>(ctx, &key).await {
                return Ok(Some(record));
            }

            let seen = self.generation();
            let record = self
                .run_store(ctx, "find_one_cached", self.store.find_one(T::TABLE, &filter))
                .await?
                .map(StoredRow::into_record::<T>)
                .transpose()?;
            if let Some(record) = &record {
                self.cache_fill(&key, record, seen).await;
            }
            Ok(record)
        })
        .await
    }

    /// Every record matching `filter` within `window`, uncached
    #[instrument(skip(self, ctx), fields(entity_type = T::ENTITY))]
    pub async fn find_many(&self, ctx: &OpContext, filter: Filter, window: Window) -> Result<Vec<T>> {
        self.observe(ctx, "find_many", async {
            filter.validate()?;
            self.run_store(ctx, "find_many", self.store.find_many(T::TABLE, &filter, window))
                .await?
                .into_iter()
                .map(StoredRow::into_record)
                .collect()
        })
        .await
    }

    /// Insert several records in one transaction; all or none are created
    #[instrument(skip(self, ctx, records), fields(entity_type = T::ENTITY, count = records.len()))]
    pub async fn batch_create(&self, ctx: &OpContext, records: Vec<T>) -> Result<Vec<T>> {
        self.observe(ctx, "batch_create", async {
            if records.is_empty() {
                return Ok(records);
            }
            for record in &records {
                record.validate()?;
            }

            let now = now();
            let mut records = records;
            let mut ops = Vec::with_capacity(records.len());
            for record in records.iter_mut() {
                Self::prepare_new(record, now);
                ops.push(WriteOp::Insert {
                    table: T::TABLE,
                    row: StoredRow::from_record(record)?,
                });
            }
            let ids: Vec<Uuid> = records.iter().map(Record::id).collect();

            self.write(ctx, "batch_create", &ids, self.store.transaction(ops))
                .await?;

            if let Some(audit) = &self.audit {
                for record in &records {
                    audit.log_create(&ctx.actor, T::ENTITY, record.id(), Self::snapshot(record));
                }
            }
            Ok(records)
        })
        .await
    }

    /// Soft-delete several records in one transaction. Fails with not found,
    /// deleting nothing, if any id is not visible. Duplicate ids are rejected.
    #[instrument(skip(self, ctx, ids), fields(entity_type = T::ENTITY, count = ids.len()))]
    pub async fn batch_soft_delete(&self, ctx: &OpContext, ids: &[Uuid]) -> Result<u64> {
        self.observe(ctx, "batch_soft_delete", async {
            if ids.is_empty() {
                return Ok(0);
            }
            let mut seen = HashSet::with_capacity(ids.len());
            for id in ids {
                Self::require_id(*id)?;
                if !seen.insert(*id) {
                    return Err(AppError::validation(format!(
                        "duplicate id {id} in batch soft delete"
                    )));
                }
            }

            let before: Vec<T> = match &self.audit {
                Some(_) => self
                    .run_store(
                        ctx,
                        "batch_soft_delete",
                        self.store.find_many(
                            T::TABLE,
                            &Filter::new().is_in("id", ids.iter().map(Uuid::to_string)),
                            Window::all(),
                        ),
                    )
                    .await?
                    .into_iter()
                    .map(StoredRow::into_record)
                    .collect::<Result<_>>()?,
                None => Vec::new(),
            };

            let now = now();
            let ops = ids
                .iter()
                .map(|id| WriteOp::UpdateFields {
                    table: T::TABLE,
                    id: *id,
                    changes: vec![FieldChange::DeletedAt(Some(now)), FieldChange::UpdatedAt(now)],
                    visibility: Visibility::Visible,
                })
                .collect();
            let affected = self
                .write(ctx, "batch_soft_delete", ids, self.store.transaction(ops))
                .await?;

            if let Some(audit) = &self.audit {
                for record in &before {
                    audit.log_delete(&ctx.actor, T::ENTITY, record.id(), Self::snapshot(record));
                }
            }
            Ok(affected.iter().sum())
        })
        .await
    }
}

/// Repository contract shared by every entity repository.
///
/// Implementors only provide [`base`](Repository::base); every operation
/// delegates to the generic core.
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    fn base(&self) -> &BaseRepository<T>;

    async fn create(&self, ctx: &OpContext, record: T) -> Result<T> {
        self.base().create(ctx, record).await
    }

    async fn get_by_id(&self, ctx: &OpContext, id: Uuid) -> Result<T> {
        self.base().get_by_id(ctx, id).await
    }

    async fn get_by_id_including_deleted(&self, ctx: &OpContext, id: Uuid) -> Result<T> {
        self.base().get_by_id_including_deleted(ctx, id).await
    }

    async fn update(&self, ctx: &OpContext, record: T) -> Result<T> {
        self.base().update(ctx, record).await
    }

    async fn soft_delete(&self, ctx: &OpContext, id: Uuid) -> Result<()> {
        self.base().soft_delete(ctx, id).await
    }

    async fn delete(&self, ctx: &OpContext, id: Uuid) -> Result<()> {
        self.base().delete(ctx, id).await
    }

    async fn restore(&self, ctx: &OpContext, id: Uuid) -> Result<T> {
        self.base().restore(ctx, id).await
    }

    async fn list(&self, ctx: &OpContext, filter: Filter, page: PageRequest) -> Result<Page<T>> {
        self.base().list(ctx, filter, page).await
    }

    async fn list_including_deleted(
        &self,
        ctx: &OpContext,
        filter: Filter,
        page: PageRequest,
    ) -> Result<Page<T>> {
        self.base().list_including_deleted(ctx, filter, page).await
    }

    async fn count(&self, ctx: &OpContext, filter: Filter) -> Result<i64> {
        self.base().count(ctx, filter).await
    }

    async fn exists(&self, ctx: &OpContext, id: Uuid) -> Result<bool> {
        self.base().exists(ctx, id).await
    }

    async fn batch_create(&self, ctx: &OpContext, records: Vec<T>) -> Result<Vec<T>> {
        self.base().batch_create(ctx, records).await
    }

    async fn batch_soft_delete(&self, ctx: &OpContext, ids: &[Uuid]) -> Result<u64> {
        self.base().batch_soft_delete(ctx, ids).await
    }
}

/// The core is itself a repository, for callers that need no finders
impl<T: Record> Repository<T> for BaseRepository<T> {
    fn base(&self) -> &BaseRepository<T> {
        self
    }
}
