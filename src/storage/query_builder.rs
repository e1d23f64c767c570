//! SQL rendering for the SQLite store
//!
//! Wraps sqlx's `QueryBuilder` so that filters, orderings and field changes
//! are rendered the same way by every statement. Record metadata lives in
//! columns; other attributes are read with `json_extract` on the payload.

use sqlx::{QueryBuilder, Sqlite};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::META_FIELDS;
use crate::error::{AppError, Result};
use crate::storage::filter::{
    ConditionOperator, Filter, OrderDirection, Visibility, validate_identifier,
};
use crate::storage::store::{FieldChange, StoredRow, Window, format_timestamp, parse_timestamp};

const ROW_COLUMNS: &str = "id, created_at, updated_at, deleted_at, data";

/// Logical operator for combining conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    /// AND
    And,
}

impl LogicalOperator {
    /// Get the SQL representation of the operator
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::And => "AND",
        }
    }
}

/// Query builder that knows the row layout shared by all entity tables
pub struct EnhancedQueryBuilder<'a> {
    /// The underlying SQLx query builder
    builder: QueryBuilder<'a, Sqlite>,
    /// Whether a WHERE clause has been added
    has_where: bool,
    /// Whether an ORDER BY clause has been added
    has_order_by: bool,
}

impl<'a> EnhancedQueryBuilder<'a> {
    /// Create a new enhanced query builder with the given base query
    pub fn new(base_query: &str) -> Self {
        Self {
            builder: QueryBuilder::new(base_query),
            has_where: false,
            has_order_by: false,
        }
    }

    /// `SELECT` of full rows from `table`
    pub fn select(table: &str) -> Result<Self> {
        validate_identifier(table)?;
        Ok(Self::new(&format!("SELECT {ROW_COLUMNS} FROM {table}")))
    }

    /// `SELECT COUNT(*)` over `table`
    pub fn count(table: &str) -> Result<Self> {
        validate_identifier(table)?;
        Ok(Self::new(&format!("SELECT COUNT(*) FROM {table}")))
    }

    pub fn insert(table: &str, row: &StoredRow) -> Result<Self> {
        validate_identifier(table)?;
        let mut qb = Self::new(&format!("INSERT INTO {table} ({ROW_COLUMNS}) VALUES ("));
        let b = &mut qb.builder;
        b.push_bind(row.id.to_string());
        b.push(", ");
        b.push_bind(format_timestamp(&row.created_at));
        b.push(", ");
        b.push_bind(format_timestamp(&row.updated_at));
        b.push(", ");
        b.push_bind(row.deleted_at.as_ref().map(format_timestamp));
        b.push(", ");
        b.push_bind(row.data.to_string());
        b.push(")");
        Ok(qb)
    }

    /// `UPDATE` of one row by id. Payload attribute changes are folded into a
    /// single `json_set` since SQLite keeps only the last assignment to a column.
    pub fn update(
        table: &str,
        id: Uuid,
        changes: &[FieldChange],
        visibility: Visibility,
    ) -> Result<Self> {
        validate_identifier(table)?;
        if changes.is_empty() {
            return Err(AppError::validation("update needs at least one field change"));
        }

        let mut qb = Self::new(&format!("UPDATE {table} SET "));
        let mut payload: Option<&Value> = None;
        let mut attrs: Vec<(&str, &Value)> = Vec::new();
        let mut first = true;

        for change in changes {
            match change {
                FieldChange::Data(data) => payload = Some(data),
                FieldChange::Attr { field, value } => {
                    validate_identifier(field)?;
                    if META_FIELDS.contains(&field.as_str()) {
                        return Err(AppError::validation(format!(
                            "{field} is managed by the repository"
                        )));
                    }
                    attrs.push((field.as_str(), value));
                }
                FieldChange::UpdatedAt(ts) => {
                    qb.push_separator(&mut first);
                    qb.builder.push("updated_at = ");
                    qb.builder.push_bind(format_timestamp(ts));
                }
                FieldChange::DeletedAt(ts) => {
                    qb.push_separator(&mut first);
                    qb.builder.push("deleted_at = ");
                    qb.builder.push_bind(ts.as_ref().map(format_timestamp));
                }
            }
        }

        if payload.is_some() || !attrs.is_empty() {
            qb.push_separator(&mut first);
            qb.builder.push("data = ");
            if !attrs.is_empty() {
                qb.builder.push("json_set(");
            }
            match payload {
                Some(data) => {
                    qb.builder.push("json(");
                    qb.builder.push_bind(data.to_string());
                    qb.builder.push(")");
                }
                None => {
                    qb.builder.push("data");
                }
            }
            if !attrs.is_empty() {
                for (field, value) in attrs {
                    qb.builder.push(format!(", '$.{field}', "));
                    qb.push_json_value(value);
                }
                qb.builder.push(")");
            }
        }

        qb.add_where_clause(None);
        qb.builder.push("id = ");
        qb.builder.push_bind(id.to_string());
        if visibility == Visibility::Visible {
            qb.builder.push(" AND deleted_at IS NULL");
        }
        Ok(qb)
    }

    pub fn delete(table: &str, id: Uuid) -> Result<Self> {
        validate_identifier(table)?;
        let mut qb = Self::new(&format!("DELETE FROM {table} WHERE id = "));
        qb.builder.push_bind(id.to_string());
        Ok(qb)
    }

    fn push_separator(&mut self, first: &mut bool) {
        if !*first {
            self.builder.push(", ");
        }
        *first = false;
    }

    /// Add a WHERE clause if one hasn't been added yet, otherwise add the given logical operator
    pub fn add_where_clause(&mut self, logical_op: Option<LogicalOperator>) -> &mut Self {
        if !self.has_where {
            self.builder.push(" WHERE ");
            self.has_where = true;
        } else if let Some(op) = logical_op {
            self.builder.push(format!(" {} ", op.as_sql()));
        }
        self
    }

    /// Add the visibility rule and every condition of `filter`
    pub fn add_filter(&mut self, filter: &Filter) -> Result<&mut Self> {
        filter.validate()?;
        if filter.visibility == Visibility::Visible {
            self.add_where_clause(Some(LogicalOperator::And));
            self.builder.push("deleted_at IS NULL");
        }
        for condition in &filter.conditions {
            self.add_condition(&condition.field, condition.op, &condition.value)?;
        }
        Ok(self)
    }

    /// Add a condition to the query
    pub fn add_condition(
        &mut self,
        field: &str,
        op: ConditionOperator,
        value: &Value,
    ) -> Result<&mut Self> {
        let expr = column_expr(field)?;
        self.add_where_clause(Some(LogicalOperator::And));

        match op {
            ConditionOperator::IsNull | ConditionOperator::IsNotNull => {
                self.builder.push(format!("{} {}", expr, op.as_sql()));
            }
            ConditionOperator::In => {
                let values = value.as_array().map(Vec::as_slice).unwrap_or_default();
                if values.is_empty() {
                    // Nothing can match an empty list
                    self.builder.push("1 = 0");
                } else {
                    self.builder.push(format!("{} IN (", expr));
                    for (i, item) in values.iter().enumerate() {
                        if i > 0 {
                            self.builder.push(", ");
                        }
                        self.push_comparable(field, item)?;
                    }
                    self.builder.push(")");
                }
            }
            _ => {
                self.builder.push(format!("{} {} ", expr, op.as_sql()));
                self.push_comparable(field, value)?;
            }
        }

        Ok(self)
    }

    /// Add the effective ordering of `filter`
    pub fn add_sort(&mut self, filter: &Filter) -> Result<&mut Self> {
        for sort in filter.effective_sort() {
            let expr = column_expr(&sort.field)?;
            self.add_order_by(&expr, sort.direction);
        }
        Ok(self)
    }

    /// Add an ORDER BY clause
    pub fn add_order_by(&mut self, expr: &str, direction: OrderDirection) -> &mut Self {
        if !self.has_order_by {
            self.builder.push(" ORDER BY ");
            self.has_order_by = true;
        } else {
            self.builder.push(", ");
        }

        self.builder.push(format!("{} {}", expr, direction.as_sql()));
        self
    }

    /// Add LIMIT/OFFSET. SQLite needs a LIMIT before any OFFSET, so an
    /// unbounded window uses `LIMIT -1`.
    pub fn add_window(&mut self, window: Window) -> &mut Self {
        self.builder.push(" LIMIT ");
        self.builder.push_bind(window.limit.unwrap_or(-1));
        if window.offset > 0 {
            self.builder.push(" OFFSET ");
            self.builder.push_bind(window.offset);
        }
        self
    }

    /// Bind a value for comparison against a column or `json_extract` result
    fn push_comparable(&mut self, field: &str, value: &Value) -> Result<()> {
        match value {
            Value::Null => {
                self.builder.push("NULL");
            }
            Value::Bool(b) => {
                self.builder.push_bind(*b);
            }
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    self.builder.push_bind(i);
                } else if let Some(f) = n.as_f64() {
                    self.builder.push_bind(f);
                } else {
                    self.builder.push_bind(n.to_string());
                }
            }
            Value::String(s) if is_timestamp_column(field) => {
                self.builder.push_bind(format_timestamp(&parse_timestamp(s)?));
            }
            Value::String(s) => {
                self.builder.push_bind(s.clone());
            }
            Value::Array(_) | Value::Object(_) => {
                self.builder.push("json(");
                self.builder.push_bind(value.to_string());
                self.builder.push(")");
            }
        }
        Ok(())
    }

    /// Bind a value so that `json_set` stores it with its JSON type intact
    fn push_json_value(&mut self, value: &Value) {
        match value {
            Value::String(s) => {
                self.builder.push_bind(s.clone());
            }
            Value::Number(n) if n.is_i64() => {
                self.builder.push_bind(n.as_i64().unwrap_or_default());
            }
            other => {
                self.builder.push("json(");
                self.builder.push_bind(other.to_string());
                self.builder.push(")");
            }
        }
    }

    /// Build the query
    pub fn build_query(
        &mut self,
    ) -> sqlx::query::Query<'_, Sqlite, <Sqlite as sqlx::Database>::Arguments<'a>> {
        self.builder.build()
    }

    /// Build a query returning a single scalar column
    pub fn build_query_scalar<T>(
        &mut self,
    ) -> sqlx::query::QueryScalar<'_, Sqlite, T, <Sqlite as sqlx::Database>::Arguments<'a>>
    where
        T: Send + Unpin,
        (T,): for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow>,
    {
        self.builder.build_query_scalar()
    }

    /// Rendered SQL, for logs and tests
    pub fn sql(&self) -> &str {
        self.builder.sql()
    }
}

fn is_timestamp_column(field: &str) -> bool {
    matches!(field, "created_at" | "updated_at" | "deleted_at")
}

/// SQL expression that reads `field` from a row
fn column_expr(field: &str) -> Result<String> {
    validate_identifier(field)?;
    if META_FIELDS.contains(&field) {
        Ok(field.to_string())
    } else {
        Ok(format!("json_extract(data, '$.{field}')"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_select_renders_visibility_conditions_and_order() {
        let filter = Filter::new()
            .eq("tenant_id", "t1")
            .is_in("role", ["admin", "provider"])
            .order_by("email", OrderDirection::Desc);
        let mut qb = EnhancedQueryBuilder::select("users").unwrap();
        qb.add_filter(&filter).unwrap();
        qb.add_sort(&filter).unwrap();
        qb.add_window(Window::new(20, 10));

        assert_eq!(
            qb.sql(),
            "SELECT id, created_at, updated_at, deleted_at, data FROM users \
             WHERE deleted_at IS NULL AND json_extract(data, '$.tenant_id') = ? \
             AND json_extract(data, '$.role') IN (?, ?) \
             ORDER BY json_extract(data, '$.email') DESC, id ASC LIMIT ? OFFSET ?"
        );
    }

    #[test]
    fn test_including_deleted_drops_visibility_rule() {
        let mut qb = EnhancedQueryBuilder::count("users").unwrap();
        qb.add_filter(&Filter::new().including_deleted()).unwrap();
        assert_eq!(qb.sql(), "SELECT COUNT(*) FROM users");
    }

    #[test]
    fn test_update_folds_attribute_changes() {
        let id = Uuid::new_v4();
        let qb = EnhancedQueryBuilder::update(
            "tasks",
            id,
            &[
                FieldChange::attr("status", "completed"),
                FieldChange::attr("position", 3),
                FieldChange::UpdatedAt(chrono::Utc::now()),
            ],
            Visibility::Visible,
        )
        .unwrap();
        assert_eq!(
            qb.sql(),
            "UPDATE tasks SET updated_at = ?, data = json_set(data, '$.status', ?, '$.position', ?) \
             WHERE id = ? AND deleted_at IS NULL"
        );
    }

    #[test]
    fn test_update_rejects_meta_attributes() {
        let err = EnhancedQueryBuilder::update(
            "tasks",
            Uuid::new_v4(),
            &[FieldChange::attr("id", json!("x"))],
            Visibility::Any,
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("managed by the repository"));
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let mut qb = EnhancedQueryBuilder::select("users").unwrap();
        qb.add_filter(&Filter::new().is_in("role", Vec::<String>::new()).including_deleted())
            .unwrap();
        assert!(qb.sql().ends_with("WHERE 1 = 0"));
    }
}
