use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::{Record, RecordMeta};
use crate::error::Result;
use crate::repositories::validation::{StringLength, Validator};

/// Tenant-scoped key/value configuration entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Setting {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub tenant_id: Uuid,
    pub key: String,
    pub value: Value,
}

impl Setting {
    pub fn new(tenant_id: Uuid, key: impl Into<String>, value: Value) -> Self {
        Self {
            meta: RecordMeta::default(),
            tenant_id,
            key: key.into(),
            value,
        }
    }
}

impl Record for Setting {
    const ENTITY: &'static str = "Setting";
    const TABLE: &'static str = "settings";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<()> {
        Validator::new()
            .check("key", &StringLength::between(1, 128), self.key.as_str())
            .finish()
    }
}
