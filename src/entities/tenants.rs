use serde::{Deserialize, Serialize};

use crate::entities::{Record, RecordMeta};
use crate::error::{AppError, Result};
use crate::repositories::validation::{StringLength, Validator};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    /// URL-safe unique handle
    pub slug: String,
}

impl Tenant {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::default(),
            name: name.into(),
            slug: slug.into(),
        }
    }
}

impl Record for Tenant {
    const ENTITY: &'static str = "Tenant";
    const TABLE: &'static str = "tenants";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<()> {
        Validator::new()
            .check("name", &StringLength::between(1, 255), self.name.as_str())
            .check("slug", &StringLength::between(2, 63), self.slug.as_str())
            .finish()?;

        if !self
            .slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(AppError::validation(
                "slug: Only lowercase letters, digits and dashes are allowed",
            ));
        }
        Ok(())
    }
}
