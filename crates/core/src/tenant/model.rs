//! Tenant and user model definitions

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Superadmin,
    Admin,
    Manager,
    Staff,
    Agent,
    Technician,
    Editor,
    Customer,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Superadmin => "superadmin",
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Staff => "staff",
            Self::Agent => "agent",
            Self::Technician => "technician",
            Self::Editor => "editor",
            Self::Customer => "customer",
        }
    }
}

impl FromStr for UserRole {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "superadmin" => Ok(Self::Superadmin),
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "staff" => Ok(Self::Staff),
            "agent" => Ok(Self::Agent),
            "technician" => Ok(Self::Technician),
            "editor" => Ok(Self::Editor),
            "customer" => Ok(Self::Customer),
            _ => Err(Error::InvalidInput(format!("Unsupported role '{}'", value))),
        }
    }
}

/// A system principal.
///
/// Top-level tenants have no `owner_id`; everyone else belongs to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub is_auto_isolation_enabled: bool,
    /// Day of month (1-31) on which unpaid customers are isolated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_isolation_date: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Share of a completed payment earned as agent or technician
    #[serde(default)]
    pub commission_percent: u32,
    /// Profile used when restoring a customer whose original profile is unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_fallback_profile: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            role,
            owner_id: None,
            is_auto_isolation_enabled: false,
            auto_isolation_date: None,
            phone: None,
            commission_percent: 0,
            isolation_fallback_profile: None,
            created_at: Utc::now(),
        }
    }

    /// Attach the user to a tenant
    pub fn with_owner(mut self, owner_id: Uuid) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// Enable auto isolation on the given day of month
    pub fn with_auto_isolation(mut self, day: u32) -> Self {
        self.is_auto_isolation_enabled = true;
        self.auto_isolation_date = Some(day);
        self
    }

    /// Set the commission percentage
    pub fn with_commission_percent(mut self, percent: u32) -> Self {
        self.commission_percent = percent;
        self
    }

    pub fn is_top_level(&self) -> bool {
        self.owner_id.is_none()
    }
}

/// Connection settings for a tenant's access-control device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConnection {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub base_url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl RouterConnection {
    pub fn new(owner_id: Uuid, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            base_url: base_url.into(),
            username: String::new(),
            password: String::new(),
        }
    }

    /// Set login credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }
}

/// Payment provider keys for one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCredentials {
    pub owner_id: Uuid,
    pub server_key: String,
    #[serde(default)]
    pub client_key: String,
    #[serde(default)]
    pub is_production: bool,
}
