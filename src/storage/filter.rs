//! Query predicates understood by every [`Store`](crate::storage::Store)
//!
//! A [`Filter`] is a conjunction of field conditions plus a visibility flag
//! and an ordering. Soft-deleted rows are hidden unless the filter explicitly
//! asks for them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Condition operator for query building
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    /// Equal (=)
    Equal,
    /// Not equal (!=)
    NotEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal (>=)
    GreaterThanOrEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal (<=)
    LessThanOrEqual,
    /// Like (LIKE)
    Like,
    /// In (IN)
    In,
    /// Is null (IS NULL)
    IsNull,
    /// Is not null (IS NOT NULL)
    IsNotNull,
}

impl ConditionOperator {
    /// Get the SQL representation of the operator
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// Short stable token used in cache keys
    fn token(&self) -> &'static str {
        match self {
            Self::Equal => "eq",
            Self::NotEqual => "ne",
            Self::GreaterThan => "gt",
            Self::GreaterThanOrEqual => "gte",
            Self::LessThan => "lt",
            Self::LessThanOrEqual => "lte",
            Self::Like => "like",
            Self::In => "in",
            Self::IsNull => "null",
            Self::IsNotNull => "notnull",
        }
    }
}

/// Order direction for sorting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

impl OrderDirection {
    /// Get the SQL representation of the direction
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Which rows a read or write may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Visibility {
    /// Rows without a soft-delete timestamp
    #[default]
    Visible,
    /// Every row, soft-deleted or not
    Any,
}

/// Single field predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOperator,
    /// Ignored by `IsNull`/`IsNotNull`; an array for `In`
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: OrderDirection,
}

/// Conjunction of conditions with visibility and ordering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    pub visibility: Visibility,
    pub sort: Vec<Sort>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter matching exactly one id
    pub fn by_id(id: Uuid) -> Self {
        Self::new().eq("id", id.to_string())
    }

    pub fn with_condition(
        mut self,
        field: impl Into<String>,
        op: ConditionOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_condition(field, ConditionOperator::Equal, value)
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_condition(field, ConditionOperator::NotEqual, value)
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_condition(field, ConditionOperator::GreaterThan, value)
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_condition(field, ConditionOperator::GreaterThanOrEqual, value)
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_condition(field, ConditionOperator::LessThan, value)
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_condition(field, ConditionOperator::LessThanOrEqual, value)
    }

    pub fn like(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.with_condition(field, ConditionOperator::Like, pattern.into())
    }

    pub fn is_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.with_condition(field, ConditionOperator::In, Value::Array(values))
    }

    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.with_condition(field, ConditionOperator::IsNull, Value::Null)
    }

    pub fn is_not_null(self, field: impl Into<String>) -> Self {
        self.with_condition(field, ConditionOperator::IsNotNull, Value::Null)
    }

    /// Make soft-deleted rows visible to this filter
    pub fn including_deleted(mut self) -> Self {
        self.visibility = Visibility::Any;
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.sort.push(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn includes_deleted(&self) -> bool {
        self.visibility == Visibility::Any
    }

    /// Effective ordering. Defaults to creation order, and always ends on
    /// `id` so that paging is deterministic.
    pub fn effective_sort(&self) -> Vec<Sort> {
        let mut sort = if self.sort.is_empty() {
            vec![Sort {
                field: "created_at".to_string(),
                direction: OrderDirection::Asc,
            }]
        } else {
            self.sort.clone()
        };
        if !sort.iter().any(|s| s.field == "id") {
            sort.push(Sort {
                field: "id".to_string(),
                direction: OrderDirection::Asc,
            });
        }
        sort
    }

    /// Reject malformed field names and operands before any I/O
    pub fn validate(&self) -> Result<()> {
        for condition in &self.conditions {
            validate_identifier(&condition.field)?;
            match condition.op {
                ConditionOperator::In if !condition.value.is_array() => {
                    return Err(AppError::validation(format!(
                        "IN condition on {} needs a list of values",
                        condition.field
                    )));
                }
                ConditionOperator::Like if !condition.value.is_string() => {
                    return Err(AppError::validation(format!(
                        "LIKE condition on {} needs a string pattern",
                        condition.field
                    )));
                }
                _ => {}
            }
        }
        for sort in &self.sort {
            validate_identifier(&sort.field)?;
        }
        Ok(())
    }

    /// Canonical predicate text for cache keys; condition order does not matter
    pub fn cache_fragment(&self) -> String {
        let mut parts: Vec<String> = self
            .conditions
            .iter()
            .map(|c| match c.op {
                ConditionOperator::IsNull | ConditionOperator::IsNotNull => {
                    format!("{}.{}", c.field, c.op.token())
                }
                _ => format!("{}.{}={}", c.field, c.op.token(), c.value),
            })
            .collect();
        parts.sort();
        if self.includes_deleted() {
            parts.push("deleted".to_string());
        }
        if parts.is_empty() {
            "all".to_string()
        } else {
            parts.join("&")
        }
    }

    /// Canonical ordering text for cache keys
    pub fn sort_fragment(&self) -> String {
        self.effective_sort()
            .iter()
            .map(|s| format!("{}.{}", s.field, s.direction.as_sql().to_lowercase()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} order {}", self.cache_fragment(), self.sort_fragment())
    }
}

/// Field and table names are spliced into SQL, so only `[A-Za-z0-9_]` passes
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::validation(format!("invalid field name: {name:?}")));
    }
    Ok(())
}
