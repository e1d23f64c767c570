//! Persistence adapter seam
//!
//! Repositories talk to storage only through [`Store`]. Rows keep record
//! metadata in columns and every other attribute in a JSON document.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::entities::{META_FIELDS, Record};
use crate::error::{AppError, Result};
use crate::storage::filter::{Filter, Visibility};

/// A persisted row as the store sees it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Record attributes other than the metadata
    pub data: Value,
}

impl StoredRow {
    /// Split a record into metadata columns and payload
    pub fn from_record<T: Record>(record: &T) -> Result<Self> {
        let meta = record.meta();
        let data = match serde_json::to_value(record)? {
            Value::Object(mut map) => {
                for field in META_FIELDS {
                    map.remove(field);
                }
                Value::Object(map)
            }
            other => {
                return Err(AppError::store(
                    "serialize",
                    T::ENTITY,
                    format!("expected an object, got {other}"),
                ));
            }
        };

        Ok(Self {
            id: meta.id,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            deleted_at: meta.deleted_at,
            data,
        })
    }

    /// Rebuild the typed record from the row
    pub fn into_record<T: Record>(self) -> Result<T> {
        let mut map = match self.data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(AppError::store(
                    "deserialize",
                    T::ENTITY,
                    format!("payload is not an object: {other}"),
                ));
            }
        };
        map.insert("id".to_string(), Value::String(self.id.to_string()));
        map.insert(
            "created_at".to_string(),
            Value::String(format_timestamp(&self.created_at)),
        );
        map.insert(
            "updated_at".to_string(),
            Value::String(format_timestamp(&self.updated_at)),
        );
        map.insert(
            "deleted_at".to_string(),
            self.deleted_at
                .map(|ts| Value::String(format_timestamp(&ts)))
                .unwrap_or(Value::Null),
        );

        serde_json::from_value(Value::Object(map))
            .map_err(|e| AppError::store("deserialize", T::ENTITY, e.to_string()))
    }
}

/// Offset/limit window of a multi-row read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub offset: i64,
    /// `None` reads to the end
    pub limit: Option<i64>,
}

impl Window {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }
}

/// A single column or payload change applied by [`Store::update_fields`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    /// Replace the whole payload
    Data(Value),
    UpdatedAt(DateTime<Utc>),
    DeletedAt(Option<DateTime<Utc>>),
    /// Set one payload attribute, leaving the rest untouched
    Attr { field: String, value: Value },
}

impl FieldChange {
    pub fn attr(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Attr {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// One statement of an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert {
        table: &'static str,
        row: StoredRow,
    },
    /// Fails the whole batch when no row matches
    UpdateFields {
        table: &'static str,
        id: Uuid,
        changes: Vec<FieldChange>,
        visibility: Visibility,
    },
    /// Fails the whole batch when no row matches
    Delete { table: &'static str, id: Uuid },
}

/// Relational persistence used by the generic repository
#[async_trait]
pub trait Store: Send + Sync + Debug {
    /// Insert a new row; a duplicate id or unique key is a conflict
    async fn insert(&self, table: &str, row: &StoredRow) -> Result<()>;

    /// First row matching the filter in its ordering
    async fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<StoredRow>>;

    async fn find_many(&self, table: &str, filter: &Filter, window: Window) -> Result<Vec<StoredRow>>;

    async fn count(&self, table: &str, filter: &Filter) -> Result<i64>;

    /// Apply changes to one row, returning the number of rows affected
    async fn update_fields(
        &self,
        table: &str,
        id: Uuid,
        changes: &[FieldChange],
        visibility: Visibility,
    ) -> Result<u64>;

    /// Remove a row permanently, soft-deleted or not
    async fn delete(&self, table: &str, id: Uuid) -> Result<u64>;

    /// Apply every operation or none of them
    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<u64>>;
}

/// Fixed-width UTC text form so that stored timestamps order lexically
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::store("deserialize", "unknown", format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::entities::{RecordMeta, Tenant};

    #[test]
    fn test_row_split_and_rebuild() {
        let mut tenant = Tenant::new("Acme", "acme");
        tenant.meta = RecordMeta {
            id: Uuid::new_v4(),
            created_at: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 6).unwrap(),
            deleted_at: None,
        };

        let row = StoredRow::from_record(&tenant).unwrap();
        assert_eq!(row.id, tenant.meta.id);
        assert!(row.data.get("id").is_none());
        assert!(row.data.get("created_at").is_none());
        assert_eq!(row.data["slug"], "acme");

        let rebuilt: Tenant = row.into_record().unwrap();
        assert_eq!(rebuilt, tenant);
    }

    #[test]
    fn test_timestamps_order_lexically() {
        let early = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::microseconds(1);
        assert!(format_timestamp(&early) < format_timestamp(&late));
        assert_eq!(parse_timestamp(&format_timestamp(&late)).unwrap(), late);
    }
}
