//! Customer model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A subscriber owned by exactly one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    /// Public-facing customer number
    pub customer_id: String,
    /// Login identity, equal to the secret name on the access device
    pub username: String,
    pub name: String,
    pub owner_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technician_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_id: Option<Uuid>,
    /// Service plan name, which is also the device profile name
    pub plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(
        username: impl Into<String>,
        name: impl Into<String>,
        owner_id: Uuid,
        plan: impl Into<String>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            customer_id: format!("CUST-{}", &id.simple().to_string()[..8].to_uppercase()),
            username: username.into(),
            name: name.into(),
            owner_id,
            agent_id: None,
            technician_id: None,
            router_id: None,
            plan: plan.into(),
            phone: None,
            created_at: Utc::now(),
        }
    }

    /// Set the commission agent
    pub fn with_agent(mut self, agent_id: Uuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Set the commission technician
    pub fn with_technician(mut self, technician_id: Uuid) -> Self {
        self.technician_id = Some(technician_id);
        self
    }

    /// Set the router the customer is provisioned on
    pub fn with_router(mut self, router_id: Uuid) -> Self {
        self.router_id = Some(router_id);
        self
    }
}

/// A priced plan offered by a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePlan {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub price: i64,
}

impl ServicePlan {
    pub fn new(owner_id: Uuid, name: impl Into<String>, price: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            price,
        }
    }
}
