//! The device command executor seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A PPP secret row: one subscriber's access policy on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSecret {
    #[serde(rename = ".id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub comment: String,
}

impl DeviceSecret {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            profile: profile.into(),
            comment: String::new(),
        }
    }

    /// Set the comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

/// A live session authenticated under some secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    #[serde(rename = ".id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Fields to change on a secret; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecretUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl SecretUpdate {
    pub fn profile_and_comment(profile: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            profile: Some(profile.into()),
            comment: Some(comment.into()),
        }
    }
}

/// Commands the billing engine issues against one tenant's device.
///
/// An executor instance is bound to a single device connection.
#[async_trait]
pub trait DeviceExecutor: Send + Sync {
    /// List every secret on the device
    async fn list_secrets(&self) -> Result<Vec<DeviceSecret>>;

    /// Find a secret by subscriber name
    async fn find_secret(&self, name: &str) -> Result<Option<DeviceSecret>> {
        let secrets = self.list_secrets().await?;
        Ok(secrets.into_iter().find(|secret| secret.name == name))
    }

    /// Change fields on the secret with the given device id
    async fn set_secret_fields(&self, id: &str, update: &SecretUpdate) -> Result<()>;

    /// List active sessions, optionally only those for one subscriber
    async fn list_active_sessions(&self, name_filter: Option<&str>) -> Result<Vec<ActiveSession>>;

    /// Disconnect one active session
    async fn remove_active_session(&self, id: &str) -> Result<()>;

    /// Cheap round trip used by health checks
    async fn ping(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_uses_device_id_field() {
        let raw = r#"{".id":"*1A","name":"alice","profile":"basic","service":"pppoe"}"#;
        let secret: DeviceSecret = serde_json::from_str(raw).unwrap();
        assert_eq!(secret.id, "*1A");
        assert_eq!(secret.profile, "basic");
        assert_eq!(secret.comment, "");
    }

    #[test]
    fn test_update_skips_unset_fields() {
        let update = SecretUpdate {
            profile: Some("DROP".to_string()),
            comment: None,
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["profile"], "DROP");
        assert!(value.get("comment").is_none());
    }
}
