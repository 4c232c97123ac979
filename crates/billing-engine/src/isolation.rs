//! Isolation enforcer - suspends customers with no completed payment
//!
//! The device's profile/comment pair is the suspension state. Before the
//! device is touched, the original profile is recorded in the ledger so the
//! restorer never depends on the comment alone.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use device_link::{DeviceHandle, DeviceRegistry, SecretUpdate};
use futures::stream::{self, StreamExt};
use netbill_core::customer::Customer;
use netbill_core::isolation::SuspensionRecord;
use netbill_core::ledger::{CustomerFilter, LedgerStore};
use netbill_core::payment::BillingPeriod;
use netbill_core::tenant::User;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditSink, SYSTEM_ACTOR};
use crate::error::{EngineError, Result};
use crate::locks::KeyedLocks;
use crate::sentinel::{self, SUSPENDED_PROFILE};

/// Configuration for the isolation enforcer
#[derive(Debug, Clone)]
pub struct EnforcerConfig {
    /// How many tenants are processed at the same time
    pub max_parallel_owners: usize,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            max_parallel_owners: 4,
        }
    }
}

/// Request to run the enforcer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforceRequest {
    /// Ignore each tenant's configured isolation day
    #[serde(default)]
    pub manual: bool,
    /// Only this tenant; also ignores the isolation day
    #[serde(default)]
    pub specific_owner_id: Option<Uuid>,
    /// Day of month to match, today's when absent
    #[serde(default)]
    pub target_date: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolationFailure {
    pub username: String,
    pub error: String,
}

/// What happened to one tenant during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OwnerReport {
    #[serde(rename_all = "camelCase")]
    Processed {
        owner_id: Uuid,
        owner_name: String,
        isolated_count: usize,
        users: Vec<String>,
        /// Customers that were already suspended
        skipped: usize,
        failures: Vec<IsolationFailure>,
    },
    #[serde(rename_all = "camelCase")]
    AllPaid {
        owner_id: Uuid,
        owner_name: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        owner_id: Uuid,
        owner_name: String,
        error: String,
    },
}

impl OwnerReport {
    pub fn owner_id(&self) -> Uuid {
        match self {
            Self::Processed { owner_id, .. }
            | Self::AllPaid { owner_id, .. }
            | Self::Failed { owner_id, .. } => *owner_id,
        }
    }
}

enum SuspendOutcome {
    Suspended,
    AlreadySuspended,
    /// Paid after the run read the paid set
    PaidMeanwhile,
}

pub struct IsolationEnforcer {
    ledger: Arc<dyn LedgerStore>,
    registry: Arc<DeviceRegistry>,
    locks: Arc<KeyedLocks>,
    audit: Arc<dyn AuditSink>,
    config: EnforcerConfig,
}

impl IsolationEnforcer {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        registry: Arc<DeviceRegistry>,
        locks: Arc<KeyedLocks>,
        audit: Arc<dyn AuditSink>,
        config: EnforcerConfig,
    ) -> Self {
        Self {
            ledger,
            registry,
            locks,
            audit,
            config,
        }
    }

    /// Suspend unpaid customers of every eligible tenant.
    ///
    /// `today` fixes the billing period and the default isolation day. Tenant
    /// and customer failures are reported inline; only a bad request or an
    /// unreadable tenant list fails the whole run.
    pub async fn enforce(&self, request: EnforceRequest, today: NaiveDate) -> Result<Vec<OwnerReport>> {
        let period = BillingPeriod::containing(today);
        let target_day = match request.target_date {
            Some(day) if !(1..=31).contains(&day) => {
                return Err(EngineError::invalid_input(format!(
                    "targetDate must be between 1 and 31, got {}",
                    day
                )))
            }
            Some(day) => period.clamp_day(day),
            None => today.day(),
        };
        let ignore_day = request.manual || request.specific_owner_id.is_some();

        let owners: Vec<User> = self
            .ledger
            .list_auto_isolation_owners()
            .await?
            .into_iter()
            .filter(|owner| request.specific_owner_id.map_or(true, |id| owner.id == id))
            .filter(|owner| {
                ignore_day
                    || owner
                        .auto_isolation_date
                        .map(|day| period.clamp_day(day))
                        == Some(target_day)
            })
            .collect();

        info!(
            period = %period,
            target_day,
            manual = request.manual,
            owners = owners.len(),
            "Running isolation"
        );

        let reports = stream::iter(owners)
            .map(|owner| self.enforce_owner(owner, period))
            .buffered(self.config.max_parallel_owners.max(1))
            .collect::<Vec<_>>()
            .await;
        Ok(reports)
    }

    async fn enforce_owner(&self, owner: User, period: BillingPeriod) -> OwnerReport {
        match self.try_enforce_owner(&owner, period).await {
            Ok(report) => report,
            Err(err) => {
                warn!(owner = %owner.username, error = %err, "Isolation failed for tenant");
                OwnerReport::Failed {
                    owner_id: owner.id,
                    owner_name: owner.username,
                    error: err.to_string(),
                }
            }
        }
    }

    async fn try_enforce_owner(&self, owner: &User, period: BillingPeriod) -> Result<OwnerReport> {
        let router = self
            .ledger
            .router_for_owner(owner.id)
            .await?
            .ok_or_else(|| {
                EngineError::config(format!("Tenant '{}' has no router connection", owner.username))
            })?;
        let handle = self.registry.handle_for(&router).await?;

        let customers = self
            .ledger
            .list_customers(&CustomerFilter {
                owner_id: Some(owner.id),
                router_id: None,
            })
            .await?;
        let paid = self.ledger.completed_usernames(owner.id, period).await?;
        let unpaid: Vec<Customer> = customers
            .into_iter()
            .filter(|customer| !paid.contains(&customer.username))
            .collect();

        if unpaid.is_empty() {
            debug!(owner = %owner.username, "All customers paid");
            return Ok(OwnerReport::AllPaid {
                owner_id: owner.id,
                owner_name: owner.username.clone(),
                message: "all paid".to_string(),
            });
        }

        let mut users = Vec::new();
        let mut skipped = 0;
        let mut failures = Vec::new();
        for customer in &unpaid {
            match self.suspend(&handle, owner, &customer.username, period).await {
                Ok(SuspendOutcome::Suspended) => users.push(customer.username.clone()),
                Ok(SuspendOutcome::AlreadySuspended) => skipped += 1,
                Ok(SuspendOutcome::PaidMeanwhile) => {}
                Err(err) => {
                    warn!(
                        owner = %owner.username,
                        username = %customer.username,
                        error = %err,
                        "Failed to isolate customer"
                    );
                    failures.push(IsolationFailure {
                        username: customer.username.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            owner = %owner.username,
            isolated = users.len(),
            skipped,
            failed = failures.len(),
            "Tenant isolation finished"
        );
        Ok(OwnerReport::Processed {
            owner_id: owner.id,
            owner_name: owner.username.clone(),
            isolated_count: users.len(),
            users,
            skipped,
            failures,
        })
    }

    async fn suspend(
        &self,
        handle: &DeviceHandle,
        owner: &User,
        username: &str,
        period: BillingPeriod,
    ) -> Result<SuspendOutcome> {
        let _guard = self.locks.lock(owner.id, username).await;

        // A payment can complete between the paid-set read and this lock;
        // its restore may already have run and found nothing to undo.
        let paid = self
            .ledger
            .find_payment_for_period(owner.id, username, period)
            .await?
            .is_some_and(|payment| payment.is_completed());
        if paid {
            debug!(owner = %owner.username, username, "Paid during the run, not suspending");
            return Ok(SuspendOutcome::PaidMeanwhile);
        }

        let secret = handle
            .find_secret(username)
            .await?
            .ok_or_else(|| EngineError::SecretNotFound {
                username: username.to_string(),
            })?;
        if secret.profile == SUSPENDED_PROFILE {
            return Ok(SuspendOutcome::AlreadySuspended);
        }

        self.ledger
            .record_suspension(SuspensionRecord::new(owner.id, username, &secret.profile))
            .await?;
        let comment = sentinel::mark(&secret.comment, &secret.profile);
        if let Err(err) = handle
            .set_secret_fields(
                &secret.id,
                &SecretUpdate::profile_and_comment(SUSPENDED_PROFILE, comment),
            )
            .await
        {
            // Nothing was suspended, so the record goes too
            if let Err(clear_err) = self.ledger.clear_suspension(owner.id, username).await {
                warn!(
                    username,
                    error = %clear_err,
                    "Failed to clear suspension record after device write failed"
                );
            }
            return Err(err.into());
        }

        // Sessions keep their old policy until they reconnect
        let sessions_dropped = match handle.kick_sessions(username).await {
            Ok(count) => count,
            Err(err) => {
                warn!(
                    username,
                    error = %err,
                    "Customer suspended but active sessions could not be dropped"
                );
                0
            }
        };

        self.audit
            .record(
                AuditEntry::new(owner.id, SYSTEM_ACTOR, "isolation.suspended")
                    .with_username(username)
                    .with_status("suspended")
                    .with_detail(json!({
                        "originalProfile": secret.profile,
                        "sessionsDropped": sessions_dropped,
                    })),
            )
            .await;
        Ok(SuspendOutcome::Suspended)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use netbill_core::payment::{Payment, PaymentStatus, StatusUpdate};

    use super::*;
    use crate::restore::Restorer;
    use crate::testing::Fixture;

    fn enforcer(fixture: &Fixture) -> IsolationEnforcer {
        IsolationEnforcer::new(
            fixture.ledger.clone(),
            fixture.registry.clone(),
            fixture.locks.clone(),
            fixture.audit.clone(),
            EnforcerConfig::default(),
        )
    }

    fn day(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn manual() -> EnforceRequest {
        EnforceRequest {
            manual: true,
            ..EnforceRequest::default()
        }
    }

    #[tokio::test]
    async fn test_scheduled_run_isolates_unpaid_on_configured_day() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", Some(5)).await;
        let device = fixture.device(&router).await;
        fixture.customer(&owner, "alice", "basic-plan").await;
        fixture.customer(&owner, "bob", "basic-plan").await;
        device.add_secret("alice", "basic-plan", "").await;
        device.add_secret("bob", "basic-plan", "").await;
        device.connect_session("alice").await;
        fixture
            .paid(&owner, "bob", BillingPeriod::containing(day(5)))
            .await;
        let enforcer = enforcer(&fixture);

        let reports = enforcer.enforce(EnforceRequest::default(), day(5)).await.unwrap();
        assert_eq!(reports.len(), 1);
        match &reports[0] {
            OwnerReport::Processed {
                isolated_count,
                users,
                failures,
                ..
            } => {
                assert_eq!(*isolated_count, 1);
                assert_eq!(users, &vec!["alice".to_string()]);
                assert!(failures.is_empty());
            }
            other => panic!("Expected Processed report, got: {:?}", other),
        }

        let alice = device.secret("alice").await.unwrap();
        assert_eq!(alice.profile, SUSPENDED_PROFILE);
        assert!(alice.comment.contains("OLD:basic-plan"));
        assert!(device.sessions_for("alice").await.is_empty());
        assert_eq!(device.secret("bob").await.unwrap().profile, "basic-plan");

        let writes = device.secret_writes();
        let next_day = enforcer.enforce(EnforceRequest::default(), day(6)).await.unwrap();
        assert!(next_day.is_empty());
        assert_eq!(device.secret_writes(), writes);
    }

    #[tokio::test]
    async fn test_suspension_is_idempotent() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", Some(5)).await;
        let device = fixture.device(&router).await;
        fixture.customer(&owner, "alice", "basic-plan").await;
        device.add_secret("alice", "basic-plan", "").await;
        let enforcer = enforcer(&fixture);

        enforcer.enforce(manual(), day(10)).await.unwrap();
        let reports = enforcer.enforce(manual(), day(10)).await.unwrap();

        assert_eq!(device.secret_writes(), 1);
        match &reports[0] {
            OwnerReport::Processed {
                isolated_count,
                skipped,
                ..
            } => assert_eq!((*isolated_count, *skipped), (0, 1)),
            other => panic!("Expected Processed report, got: {:?}", other),
        }
        assert_eq!(fixture.audit.actions().await, vec!["isolation.suspended"]);
    }

    #[tokio::test]
    async fn test_suspend_then_restore_roundtrip() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", Some(5)).await;
        let device = fixture.device(&router).await;
        fixture.customer(&owner, "alice", "plan-10mbps").await;
        device.add_secret("alice", "plan-10mbps", "tower B").await;

        enforcer(&fixture).enforce(manual(), day(5)).await.unwrap();
        let record = fixture.ledger.get_suspension(owner.id, "alice").await.unwrap();
        assert_eq!(record.unwrap().original_profile, "plan-10mbps");

        let restorer = Restorer::new(
            fixture.ledger.clone(),
            fixture.registry.clone(),
            fixture.locks.clone(),
            fixture.audit.clone(),
            "default",
        );
        restorer.restore(owner.id, "alice").await.unwrap();

        let secret = device.secret("alice").await.unwrap();
        assert_eq!(secret.profile, "plan-10mbps");
        assert_eq!(secret.comment, "tower B");
    }

    #[tokio::test]
    async fn test_restore_survives_operator_comment_edit() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", Some(5)).await;
        let device = fixture.device(&router).await;
        fixture.customer(&owner, "alice", "plan-10mbps").await;
        device.add_secret("alice", "plan-10mbps", "").await;

        enforcer(&fixture).enforce(manual(), day(5)).await.unwrap();
        device.edit_comment("alice", "call before visiting").await;

        let restorer = Restorer::new(
            fixture.ledger.clone(),
            fixture.registry.clone(),
            fixture.locks.clone(),
            fixture.audit.clone(),
            "default",
        );
        restorer.restore(owner.id, "alice").await.unwrap();
        assert_eq!(device.secret("alice").await.unwrap().profile, "plan-10mbps");
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_customer_and_owner() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", Some(5)).await;
        let device = fixture.device(&router).await;
        for username in ["alice", "bob", "carol"] {
            fixture.customer(&owner, username, "basic-plan").await;
        }
        device.add_secret("alice", "basic-plan", "").await;
        device.add_secret("bob", "basic-plan", "").await;
        device.fail_writes_for("bob").await;

        let (broken, broken_router) = fixture.tenant("isp-two", Some(5)).await;
        fixture.customer(&broken, "zed", "basic-plan").await;
        fixture.device(&broken_router).await.set_unreachable(true).await;

        let reports = enforcer(&fixture).enforce(manual(), day(5)).await.unwrap();
        assert_eq!(reports.len(), 2);

        let first = reports.iter().find(|report| report.owner_id() == owner.id).unwrap();
        match first {
            OwnerReport::Processed { users, failures, .. } => {
                assert_eq!(users, &vec!["alice".to_string()]);
                let mut failed: Vec<&str> = failures.iter().map(|f| f.username.as_str()).collect();
                failed.sort();
                assert_eq!(failed, vec!["bob", "carol"]);
            }
            other => panic!("Expected Processed report, got: {:?}", other),
        }

        let second = reports.iter().find(|report| report.owner_id() == broken.id).unwrap();
        assert!(matches!(second, OwnerReport::Failed { .. }));
    }

    #[tokio::test]
    async fn test_failed_device_write_leaves_no_suspension_record() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", Some(5)).await;
        let device = fixture.device(&router).await;
        fixture.customer(&owner, "alice", "basic-plan").await;
        device.add_secret("alice", "basic-plan", "").await;
        device.fail_writes_for("alice").await;

        let reports = enforcer(&fixture).enforce(manual(), day(5)).await.unwrap();
        match &reports[0] {
            OwnerReport::Processed { failures, .. } => assert_eq!(failures.len(), 1),
            other => panic!("Expected Processed report, got: {:?}", other),
        }
        assert!(fixture.ledger.get_suspension(owner.id, "alice").await.unwrap().is_none());
        assert_eq!(device.secret("alice").await.unwrap().profile, "basic-plan");
    }

    #[tokio::test]
    async fn test_customer_paying_mid_run_is_not_suspended() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", Some(5)).await;
        let device = fixture.device(&router).await;
        for username in ["aaron", "zoe"] {
            fixture.customer(&owner, username, "basic-plan").await;
            device.add_secret(username, "basic-plan", "").await;
        }
        let invoice = fixture
            .ledger
            .insert_payment(Payment::pending("zoe", owner.id, 150_000, BillingPeriod::containing(day(5))))
            .await
            .unwrap();
        device.set_latency(Some(Duration::from_millis(40))).await;

        let enforcer = enforcer(&fixture);
        let restorer = Restorer::new(
            fixture.ledger.clone(),
            fixture.registry.clone(),
            fixture.locks.clone(),
            fixture.audit.clone(),
            "default",
        );
        let pay_and_restore = async {
            // Lands while aaron is still being suspended
            tokio::time::sleep(Duration::from_millis(20)).await;
            let update = StatusUpdate {
                status: PaymentStatus::Completed,
                gateway_status: Some("settlement".to_string()),
                payment_type: None,
            };
            fixture.ledger.transition_payment(invoice.id, &update).await.unwrap();
            restorer.restore(owner.id, "zoe").await.unwrap()
        };
        let (reports, restored) = tokio::join!(enforcer.enforce(manual(), day(5)), pay_and_restore);

        assert_eq!(restored.message.as_deref(), Some("already active"));
        match &reports.unwrap()[0] {
            OwnerReport::Processed { users, failures, .. } => {
                assert_eq!(users, &vec!["aaron".to_string()]);
                assert!(failures.is_empty());
            }
            other => panic!("Expected Processed report, got: {:?}", other),
        }
        let zoe = device.secret("zoe").await.unwrap();
        assert_eq!(zoe.profile, "basic-plan");
        assert_eq!(zoe.comment, "");
        assert!(fixture.ledger.get_suspension(owner.id, "zoe").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_all_paid_and_owner_filters() {
        let fixture = Fixture::new().await;
        let (owner, _) = fixture.tenant("isp-one", Some(5)).await;
        let (_other, _) = fixture.tenant("isp-two", Some(5)).await;
        let (_disabled, _) = fixture.tenant("isp-three", None).await;
        fixture.customer(&owner, "alice", "basic-plan").await;
        fixture
            .paid(&owner, "alice", BillingPeriod::containing(day(5)))
            .await;

        let request = EnforceRequest {
            specific_owner_id: Some(owner.id),
            ..EnforceRequest::default()
        };
        let reports = enforcer(&fixture).enforce(request, day(20)).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(matches!(&reports[0], OwnerReport::AllPaid { message, .. } if message == "all paid"));

        let everyone = enforcer(&fixture).enforce(manual(), day(20)).await.unwrap();
        assert_eq!(everyone.len(), 2);
    }

    #[tokio::test]
    async fn test_isolation_day_clamps_to_month_end() {
        let fixture = Fixture::new().await;
        let (owner, router) = fixture.tenant("isp-one", Some(31)).await;
        fixture.customer(&owner, "alice", "basic-plan").await;
        fixture.device(&router).await.add_secret("alice", "basic-plan", "").await;

        let june_30 = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let reports = enforcer(&fixture).enforce(EnforceRequest::default(), june_30).await.unwrap();
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_target_date() {
        let fixture = Fixture::new().await;
        let request = EnforceRequest {
            target_date: Some(32),
            ..EnforceRequest::default()
        };
        let result = enforcer(&fixture).enforce(request, day(5)).await;
        assert!(matches!(result, Err(EngineError::InvalidInput { .. })));
    }

    #[test]
    fn test_report_serialization() {
        let report = OwnerReport::AllPaid {
            owner_id: Uuid::nil(),
            owner_name: "isp-one".to_string(),
            message: "all paid".to_string(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["ownerName"], "isp-one");
        assert_eq!(value["message"], "all paid");
        assert!(value.get("isolatedCount").is_none());
    }
}
