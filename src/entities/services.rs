use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::entities::{Record, RecordMeta};
use crate::error::Result;
use crate::repositories::validation::{NonNegative, StringLength, Validator};

/// A bookable offering of a provider
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub tenant_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub duration_minutes: i64,
    /// Display order within the tenant catalogue
    #[serde(default)]
    pub position: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Service {
    pub fn new(tenant_id: Uuid, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::default(),
            tenant_id,
            provider_id: None,
            name: name.into(),
            category: category.into(),
            description: None,
            price_cents: 0,
            duration_minutes: 60,
            position: 0,
            active: true,
        }
    }

    pub fn with_price(mut self, price_cents: i64) -> Self {
        self.price_cents = price_cents;
        self
    }
}

impl Record for Service {
    const ENTITY: &'static str = "Service";
    const TABLE: &'static str = "services";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<()> {
        Validator::new()
            .check("name", &StringLength::between(1, 255), self.name.as_str())
            .check("category", &StringLength::between(1, 64), self.category.as_str())
            .check("price_cents", &NonNegative, &self.price_cents)
            .check("duration_minutes", &NonNegative, &self.duration_minutes)
            .finish()
    }
}
