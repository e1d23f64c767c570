use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::entities::{Record, RecordMeta};
use crate::error::Result;
use crate::repositories::validation::{EmailFormat, StringLength, Validator};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Customer,
    Provider,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Provider => "provider",
            Self::Admin => "admin",
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub role: UserRole,
    pub phone: Option<String>,
}

impl User {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::default(),
            tenant_id: None,
            email: email.into(),
            display_name: display_name.into(),
            role: UserRole::default(),
            phone: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }
}

impl Record for User {
    const ENTITY: &'static str = "User";
    const TABLE: &'static str = "users";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<()> {
        Validator::new()
            .check("email", &EmailFormat, self.email.as_str())
            .check("email", &StringLength::between(3, 254), self.email.as_str())
            .check("display_name", &StringLength::between(1, 120), self.display_name.as_str())
            .finish()
    }
}
