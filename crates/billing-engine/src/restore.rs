//! Restorer - brings a suspended customer back to their original profile

use std::sync::Arc;

use device_link::{DeviceHandle, DeviceRegistry, SecretUpdate};
use netbill_core::ledger::LedgerStore;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditSink, SYSTEM_ACTOR};
use crate::error::{EngineError, Result};
use crate::locks::KeyedLocks;
use crate::sentinel::{self, SUSPENDED_PROFILE};

/// Where the restored profile came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    SuspensionRecord,
    Comment,
    TenantFallback,
    GlobalFallback,
}

impl ProfileSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuspensionRecord => "suspension_record",
            Self::Comment => "comment",
            Self::TenantFallback => "tenant_fallback",
            Self::GlobalFallback => "global_fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ProfileSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub sessions_dropped: usize,
}

pub struct Restorer {
    ledger: Arc<dyn LedgerStore>,
    registry: Arc<DeviceRegistry>,
    locks: Arc<KeyedLocks>,
    audit: Arc<dyn AuditSink>,
    fallback_profile: String,
}

impl Restorer {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        registry: Arc<DeviceRegistry>,
        locks: Arc<KeyedLocks>,
        audit: Arc<dyn AuditSink>,
        fallback_profile: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            registry,
            locks,
            audit,
            fallback_profile: fallback_profile.into(),
        }
    }

    /// Restore a customer found by username, optionally within one tenant
    pub async fn restore_customer(&self, owner_id: Option<Uuid>, username: &str) -> Result<RestoreOutcome> {
        let customer = self
            .ledger
            .find_customer(owner_id, username)
            .await?
            .ok_or_else(|| EngineError::CustomerNotFound {
                username: username.to_string(),
            })?;
        self.restore(customer.owner_id, &customer.username).await
    }

    /// Put the customer's original profile back and clear the suspension
    pub async fn restore(&self, owner_id: Uuid, username: &str) -> Result<RestoreOutcome> {
        let router = self
            .ledger
            .router_for_owner(owner_id)
            .await?
            .ok_or_else(|| EngineError::config(format!("Tenant {} has no router connection", owner_id)))?;
        let handle = self.registry.handle_for(&router).await?;

        let _guard = self.locks.lock(owner_id, username).await;
        let secret = handle
            .find_secret(username)
            .await?
            .ok_or_else(|| EngineError::SecretNotFound {
                username: username.to_string(),
            })?;

        let (profile, source) = match self.resolve_profile(owner_id, username, &secret.profile, &secret.comment).await? {
            Some(resolved) => resolved,
            None => {
                info!(owner_id = %owner_id, username, profile = %secret.profile, "Customer already active");
                return Ok(RestoreOutcome {
                    success: true,
                    profile: Some(secret.profile),
                    source: None,
                    message: Some("already active".to_string()),
                    sessions_dropped: 0,
                });
            }
        };

        let comment = sentinel::strip(&secret.comment);
        handle
            .set_secret_fields(&secret.id, &SecretUpdate::profile_and_comment(&profile, comment))
            .await?;
        self.ledger.clear_suspension(owner_id, username).await?;

        let sessions_dropped = self.drop_sessions(&handle, username).await;
        info!(
            owner_id = %owner_id,
            username,
            profile = %profile,
            source = source.as_str(),
            "Customer restored"
        );

        self.audit
            .record(
                AuditEntry::new(owner_id, SYSTEM_ACTOR, "isolation.restored")
                    .with_username(username)
                    .with_status("restored")
                    .with_detail(json!({
                        "profile": profile,
                        "source": source.as_str(),
                        "sessionsDropped": sessions_dropped,
                    })),
            )
            .await;

        Ok(RestoreOutcome {
            success: true,
            profile: Some(profile),
            source: Some(source),
            message: None,
            sessions_dropped,
        })
    }

    /// `None` means the customer is not suspended and nothing has to change
    async fn resolve_profile(
        &self,
        owner_id: Uuid,
        username: &str,
        current_profile: &str,
        comment: &str,
    ) -> Result<Option<(String, ProfileSource)>> {
        let comment_profile = sentinel::original_profile(comment);
        if current_profile != SUSPENDED_PROFILE && comment_profile.is_none() {
            // The device is the authority; a leftover record must not rewrite an active plan
            if self.ledger.clear_suspension(owner_id, username).await? {
                warn!(
                    owner_id = %owner_id,
                    username,
                    profile = %current_profile,
                    "Dropped suspension record for a customer that is not suspended"
                );
            }
            return Ok(None);
        }

        if let Some(record) = self.ledger.get_suspension(owner_id, username).await? {
            return Ok(Some((record.original_profile, ProfileSource::SuspensionRecord)));
        }
        if let Some(profile) = comment_profile {
            return Ok(Some((profile.to_string(), ProfileSource::Comment)));
        }

        let tenant_fallback = self
            .ledger
            .get_user(owner_id)
            .await?
            .and_then(|owner| owner.isolation_fallback_profile)
            .filter(|profile| !profile.trim().is_empty());
        if let Some(profile) = tenant_fallback {
            warn!(
                owner_id = %owner_id,
                username,
                profile = %profile,
                "Original profile unknown, restoring tenant fallback"
            );
            return Ok(Some((profile, ProfileSource::TenantFallback)));
        }

        warn!(
            owner_id = %owner_id,
            username,
            profile = %self.fallback_profile,
            "Original profile unknown and tenant has no fallback, restoring global default"
        );
        Ok(Some((self.fallback_profile.clone(), ProfileSource::GlobalFallback)))
    }

    async fn drop_sessions(&self, handle: &DeviceHandle, username: &str) -> usize {
        match handle.kick_sessions(username).await {
            Ok(count) => count,
            Err(err) => {
                warn!(
                    username,
                    error = %err,
                    "Profile restored but active sessions could not be dropped"
                );
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use netbill_core::isolation::SuspensionRecord;

    use super::*;
    use crate::testing::Fixture;

    fn restorer(fixture: &Fixture) -> Restorer {
        Restorer::new(
            fixture.ledger.clone(),
            fixture.registry.clone(),
            fixture.locks.clone(),
            fixture.audit.clone(),
            "default",
        )
    }

    #[tokio::test]
    async fn test_restore_prefers_suspension_record() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", None).await;
        let device = fixture.device(&router).await;
        device
            .add_secret("alice", SUSPENDED_PROFILE, "fiber AUTO-ISOLIR | OLD:from-comment")
            .await;
        device.connect_session("alice").await;
        fixture
            .ledger
            .record_suspension(SuspensionRecord::new(owner.id, "alice", "plan-10mbps"))
            .await
            .unwrap();

        let outcome = restorer(&fixture).restore(owner.id, "alice").await.unwrap();

        assert_eq!(outcome.profile.as_deref(), Some("plan-10mbps"));
        assert_eq!(outcome.source, Some(ProfileSource::SuspensionRecord));
        assert_eq!(outcome.sessions_dropped, 1);

        let secret = device.secret("alice").await.unwrap();
        assert_eq!(secret.profile, "plan-10mbps");
        assert_eq!(secret.comment, "fiber");
        assert!(fixture.ledger.get_suspension(owner.id, "alice").await.unwrap().is_none());
        assert_eq!(fixture.audit.actions().await, vec!["isolation.restored"]);
    }

    #[tokio::test]
    async fn test_restore_falls_back_to_comment() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", None).await;
        let device = fixture.device(&router).await;
        device
            .add_secret("alice", SUSPENDED_PROFILE, "AUTO-ISOLIR | OLD:basic-plan")
            .await;

        let outcome = restorer(&fixture).restore(owner.id, "alice").await.unwrap();
        assert_eq!(outcome.source, Some(ProfileSource::Comment));

        let secret = device.secret("alice").await.unwrap();
        assert_eq!(secret.profile, "basic-plan");
        assert_eq!(secret.comment, "");
    }

    #[tokio::test]
    async fn test_already_active_is_noop() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", None).await;
        let device = fixture.device(&router).await;
        device.add_secret("alice", "plan-10mbps", "vip").await;

        let outcome = restorer(&fixture).restore(owner.id, "alice").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("already active"));
        assert_eq!(device.secret_writes(), 0);
    }

    #[tokio::test]
    async fn test_stale_record_does_not_touch_active_customer() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", None).await;
        let device = fixture.device(&router).await;
        device.add_secret("bob", "plan-20mbps", "").await;
        fixture
            .ledger
            .record_suspension(SuspensionRecord::new(owner.id, "bob", "basic-plan"))
            .await
            .unwrap();

        let outcome = restorer(&fixture).restore(owner.id, "bob").await.unwrap();
        assert_eq!(outcome.message.as_deref(), Some("already active"));
        assert_eq!(outcome.source, None);
        assert_eq!(device.secret("bob").await.unwrap().profile, "plan-20mbps");
        assert_eq!(device.secret_writes(), 0);
        assert!(fixture.ledger.get_suspension(owner.id, "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_profile_uses_tenant_then_global_fallback() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", None).await;
        let device = fixture.device(&router).await;
        device.add_secret("alice", SUSPENDED_PROFILE, "edited by hand").await;
        device.add_secret("bob", SUSPENDED_PROFILE, "").await;

        let outcome = restorer(&fixture).restore(owner.id, "alice").await.unwrap();
        assert_eq!(outcome.source, Some(ProfileSource::GlobalFallback));
        assert_eq!(device.secret("alice").await.unwrap().profile, "default");

        let mut configured = owner.clone();
        configured.isolation_fallback_profile = Some("plan-5mbps".to_string());
        fixture.ledger.save_user(configured).await.unwrap();

        let outcome = restorer(&fixture).restore(owner.id, "bob").await.unwrap();
        assert_eq!(outcome.source, Some(ProfileSource::TenantFallback));
        assert_eq!(device.secret("bob").await.unwrap().profile, "plan-5mbps");
    }

    #[tokio::test]
    async fn test_missing_secret_and_customer() {
        let fixture = Fixture::new().await;
        let (owner, _) = fixture.tenant("isp-one", None).await;
        let restorer = restorer(&fixture);

        let result = restorer.restore(owner.id, "ghost").await;
        assert!(matches!(result, Err(EngineError::SecretNotFound { .. })));

        let result = restorer.restore_customer(Some(owner.id), "ghost").await;
        assert!(matches!(result, Err(EngineError::CustomerNotFound { .. })));
    }

    #[tokio::test]
    async fn test_tenant_without_router_is_config_error() {
        let fixture = Fixture::new().await;
        let result = restorer(&fixture).restore(Uuid::new_v4(), "alice").await;
        assert!(matches!(result, Err(EngineError::Config { .. })));
    }
}
