//! Persisted entities
//!
//! Every entity embeds a [`RecordMeta`] and implements [`Record`], which is
//! all the generic repository needs to know about it.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::error::Result;

pub mod services;
pub mod settings;
pub mod tasks;
pub mod tenants;
pub mod users;

pub use services::Service;
pub use settings::Setting;
pub use tasks::{Task, TaskStatus};
pub use tenants::Tenant;
pub use users::{User, UserRole};

/// Names of the metadata attributes stored as columns rather than in the payload
pub const META_FIELDS: [&str; 4] = ["id", "created_at", "updated_at", "deleted_at"];

/// Identity and lifecycle timestamps shared by every record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Nil until the repository assigns one on create
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RecordMeta {
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_nil()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Timestamps at the Unix epoch are treated as never set
    pub fn is_unset(timestamp: &DateTime<Utc>) -> bool {
        *timestamp == DateTime::<Utc>::default()
    }
}

/// Capability set the generic repository operates over
pub trait Record: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Entity name used in errors, audit entries and cache namespaces
    const ENTITY: &'static str;
    /// Backing table
    const TABLE: &'static str;

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    fn id(&self) -> Uuid {
        self.meta().id
    }

    /// Entity-specific field checks, run before create and update
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}
