use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::storage::filter::{Filter, Visibility};
use crate::storage::query_builder::EnhancedQueryBuilder;
use crate::storage::store::{FieldChange, Store, StoredRow, Window, WriteOp, parse_timestamp};

/// [`Store`] backed by a sqlx SQLite pool
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_from_sqlite(row: &SqliteRow) -> Result<StoredRow> {
    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let deleted_at: Option<String> = row.try_get("deleted_at")?;
    let data: String = row.try_get("data")?;

    Ok(StoredRow {
        id: Uuid::parse_str(&id)
            .map_err(|e| AppError::store("deserialize", "unknown", format!("bad id {id:?}: {e}")))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        deleted_at: deleted_at.as_deref().map(parse_timestamp).transpose()?,
        data: serde_json::from_str(&data)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(level = "trace", skip(self, row), fields(id = %row.id))]
    async fn insert(&self, table: &str, row: &StoredRow) -> Result<()> {
        let mut qb = EnhancedQueryBuilder::insert(table, row)?;
        qb.build_query().execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    async fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<StoredRow>> {
        let mut qb = EnhancedQueryBuilder::select(table)?;
        qb.add_filter(filter)?;
        qb.add_sort(filter)?;
        qb.add_window(Window::new(0, 1));
        trace!(sql = qb.sql(), "find_one");

        let row = qb.build_query().fetch_optional(&self.pool).await?;
        row.as_ref().map(row_from_sqlite).transpose()
    }

    #[instrument(level = "trace", skip(self))]
    async fn find_many(&self, table: &str, filter: &Filter, window: Window) -> Result<Vec<StoredRow>> {
        let mut qb = EnhancedQueryBuilder::select(table)?;
        qb.add_filter(filter)?;
        qb.add_sort(filter)?;
        qb.add_window(window);
        trace!(sql = qb.sql(), "find_many");

        let rows = qb.build_query().fetch_all(&self.pool).await?;
        rows.iter().map(row_from_sqlite).collect()
    }

    #[instrument(level = "trace", skip(self))]
    async fn count(&self, table: &str, filter: &Filter) -> Result<i64> {
        let mut qb = EnhancedQueryBuilder::count(table)?;
        qb.add_filter(filter)?;
        trace!(sql = qb.sql(), "count");

        let total: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(total)
    }

    #[instrument(level = "trace", skip(self, changes))]
    async fn update_fields(
        &self,
        table: &str,
        id: Uuid,
        changes: &[FieldChange],
        visibility: Visibility,
    ) -> Result<u64> {
        let mut qb = EnhancedQueryBuilder::update(table, id, changes, visibility)?;
        let result = qb.build_query().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    #[instrument(level = "trace", skip(self))]
    async fn delete(&self, table: &str, id: Uuid) -> Result<u64> {
        let mut qb = EnhancedQueryBuilder::delete(table, id)?;
        let result = qb.build_query().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    #[instrument(level = "trace", skip(self, ops), fields(ops = ops.len()))]
    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<u64>> {
        // Render everything first so a bad statement fails before BEGIN
        let mut statements = Vec::with_capacity(ops.len());
        for op in &ops {
            let (qb, target) = match op {
                WriteOp::Insert { table, row } => (EnhancedQueryBuilder::insert(table, row)?, None),
                WriteOp::UpdateFields {
                    table,
                    id,
                    changes,
                    visibility,
                } => (
                    EnhancedQueryBuilder::update(table, *id, changes, *visibility)?,
                    Some((*table, *id)),
                ),
                WriteOp::Delete { table, id } => {
                    (EnhancedQueryBuilder::delete(table, *id)?, Some((*table, *id)))
                }
            };
            statements.push((qb, target));
        }

        let mut tx = self.pool.begin().await?;
        let mut affected = Vec::with_capacity(statements.len());
        for (mut qb, target) in statements {
            let rows = qb.build_query().execute(&mut *tx).await?.rows_affected();
            if rows == 0 {
                if let Some((table, id)) = target {
                    // Dropping the transaction rolls it back
                    return Err(AppError::not_found(table, id));
                }
            }
            affected.push(rows);
        }
        tx.commit().await?;

        debug!(statements = affected.len(), "Committed transaction");
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::repositories::tests::setup_test_db;

    fn row(data: serde_json::Value) -> StoredRow {
        let now = Utc::now();
        StoredRow {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            data,
        }
    }

    #[tokio::test]
    async fn test_insert_find_and_soft_delete_visibility() {
        let db = setup_test_db().await;
        let store = SqliteStore::new(db.pool.clone());
        let stored = row(json!({"name": "Acme", "slug": "acme"}));
        store.insert("tenants", &stored).await.unwrap();

        let found = store
            .find_one("tenants", &Filter::new().eq("slug", "acme"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, stored.id);
        assert_eq!(found.data["name"], "Acme");

        let affected = store
            .update_fields(
                "tenants",
                stored.id,
                &[FieldChange::DeletedAt(Some(Utc::now()))],
                Visibility::Visible,
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        assert!(store.find_one("tenants", &Filter::by_id(stored.id)).await.unwrap().is_none());
        assert_eq!(
            store
                .count("tenants", &Filter::by_id(stored.id).including_deleted())
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_duplicate_unique_key_is_conflict() {
        let db = setup_test_db().await;
        let store = SqliteStore::new(db.pool.clone());
        store.insert("users", &row(json!({"email": "a@x.com"}))).await.unwrap();
        let err = store
            .insert("users", &row(json!({"email": "a@x.com"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_attribute_update_keeps_json_types() {
        let db = setup_test_db().await;
        let store = SqliteStore::new(db.pool.clone());
        let stored = row(json!({"title": "a", "position": 0, "active": false}));
        store.insert("tasks", &stored).await.unwrap();

        store
            .update_fields(
                "tasks",
                stored.id,
                &[
                    FieldChange::attr("position", 4),
                    FieldChange::attr("active", true),
                    FieldChange::attr("tags", json!(["x"])),
                ],
                Visibility::Visible,
            )
            .await
            .unwrap();

        let found = store.find_one("tasks", &Filter::by_id(stored.id)).await.unwrap().unwrap();
        assert_eq!(found.data["position"], 4);
        assert_eq!(found.data["active"], true);
        assert_eq!(found.data["tags"], json!(["x"]));
        assert_eq!(found.data["title"], "a");
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_missing_row() {
        let db = setup_test_db().await;
        let store = SqliteStore::new(db.pool.clone());
        let first = row(json!({"title": "first"}));

        let err = store
            .transaction(vec![
                WriteOp::Insert {
                    table: "tasks",
                    row: first.clone(),
                },
                WriteOp::Delete {
                    table: "tasks",
                    id: Uuid::new_v4(),
                },
            ])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            store.count("tasks", &Filter::new().including_deleted()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_find_many_window_and_order() {
        let db = setup_test_db().await;
        let store = SqliteStore::new(db.pool.clone());
        for position in 0..5 {
            store
                .insert("tasks", &row(json!({"title": "t", "position": position})))
                .await
                .unwrap();
        }

        let filter = Filter::new()
            .gte("position", 1)
            .order_by("position", crate::storage::OrderDirection::Desc);
        let rows = store.find_many("tasks", &filter, Window::new(1, 2)).await.unwrap();
        let positions: Vec<i64> = rows.iter().filter_map(|r| r.data["position"].as_i64()).collect();
        assert_eq!(positions, vec![3, 2]);
    }
}
