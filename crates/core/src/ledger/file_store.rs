//! File-based ledger storage implementation
//!
//! Keeps the whole ledger in memory and writes a JSON snapshot on every
//! mutation. Snapshots go to a temp file that is renamed over the ledger, and
//! the in-memory state only changes once the snapshot is on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repository::{CustomerFilter, LedgerStore, PaymentFilter};
use crate::customer::{Customer, ServicePlan};
use crate::isolation::{RestoreJob, RestoreJobStatus, SuspensionRecord};
use crate::payment::{
    BillingPeriod, Commission, CommissionRole, Payment, PaymentWithCommissions, StatusUpdate,
};
use crate::tenant::{GatewayCredentials, RouterConnection, User};
use crate::{Error, Result};

type CommissionKey = (Uuid, Uuid, CommissionRole);
type SuspensionKey = (Uuid, String);

#[derive(Debug, Clone, Default)]
struct LedgerState {
    users: HashMap<Uuid, User>,
    customers: HashMap<Uuid, Customer>,
    plans: HashMap<Uuid, ServicePlan>,
    payments: HashMap<Uuid, Payment>,
    commissions: HashMap<CommissionKey, Commission>,
    routers: HashMap<Uuid, RouterConnection>,
    gateway_credentials: HashMap<Uuid, GatewayCredentials>,
    suspensions: HashMap<SuspensionKey, SuspensionRecord>,
    restore_jobs: HashMap<Uuid, RestoreJob>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredLedgerState {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    customers: Vec<Customer>,
    #[serde(default)]
    plans: Vec<ServicePlan>,
    #[serde(default)]
    payments: Vec<Payment>,
    #[serde(default)]
    commissions: Vec<Commission>,
    #[serde(default)]
    routers: Vec<RouterConnection>,
    #[serde(default)]
    gateway_credentials: Vec<GatewayCredentials>,
    #[serde(default)]
    suspensions: Vec<SuspensionRecord>,
    #[serde(default)]
    restore_jobs: Vec<RestoreJob>,
}

impl From<StoredLedgerState> for LedgerState {
    fn from(value: StoredLedgerState) -> Self {
        Self {
            users: value.users.into_iter().map(|item| (item.id, item)).collect(),
            customers: value
                .customers
                .into_iter()
                .map(|item| (item.id, item))
                .collect(),
            plans: value.plans.into_iter().map(|item| (item.id, item)).collect(),
            payments: value
                .payments
                .into_iter()
                .map(|item| (item.id, item))
                .collect(),
            commissions: value
                .commissions
                .into_iter()
                .map(|item| (item.key(), item))
                .collect(),
            routers: value
                .routers
                .into_iter()
                .map(|item| (item.id, item))
                .collect(),
            gateway_credentials: value
                .gateway_credentials
                .into_iter()
                .map(|item| (item.owner_id, item))
                .collect(),
            suspensions: value
                .suspensions
                .into_iter()
                .map(|item| ((item.owner_id, item.username.clone()), item))
                .collect(),
            restore_jobs: value
                .restore_jobs
                .into_iter()
                .map(|item| (item.id, item))
                .collect(),
        }
    }
}

impl From<&LedgerState> for StoredLedgerState {
    fn from(value: &LedgerState) -> Self {
        Self {
            users: value.users.values().cloned().collect(),
            customers: value.customers.values().cloned().collect(),
            plans: value.plans.values().cloned().collect(),
            payments: value.payments.values().cloned().collect(),
            commissions: value.commissions.values().cloned().collect(),
            routers: value.routers.values().cloned().collect(),
            gateway_credentials: value.gateway_credentials.values().cloned().collect(),
            suspensions: value.suspensions.values().cloned().collect(),
            restore_jobs: value.restore_jobs.values().cloned().collect(),
        }
    }
}

/// File-based ledger store using JSON
pub struct FileLedgerStore {
    /// Path to the JSON snapshot
    path: PathBuf,
    state: RwLock<LedgerState>,
}

impl FileLedgerStore {
    /// Create a new FileLedgerStore
    ///
    /// If the file doesn't exist, it will be created on first write.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = load_state(&path).await?;
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `next`, then make it the live state
    async fn commit(&self, state: &mut LedgerState, next: LedgerState) -> Result<()> {
        persist_state(&self.path, &next).await?;
        *state = next;
        Ok(())
    }
}

async fn load_state(path: &Path) -> Result<LedgerState> {
    if !path.exists() {
        return Ok(LedgerState::default());
    }
    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(LedgerState::default());
    }
    let stored: StoredLedgerState = serde_json::from_str(&content)
        .map_err(|err| Error::Storage(format!("Failed to parse ledger file: {}", err)))?;
    Ok(stored.into())
}

async fn persist_state(path: &Path, state: &LedgerState) -> Result<()> {
    let content = serde_json::to_string_pretty(&StoredLedgerState::from(state))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4().as_hyphenated()));
    tokio::fs::write(&temp_path, content)
        .await
        .map_err(|err| Error::Storage(format!("Failed to write temp ledger file: {}", err)))?;
    if let Err(err) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(Error::Storage(format!(
            "Failed to finalize ledger write: {}",
            err
        )));
    }
    Ok(())
}

fn commissions_for(state: &LedgerState, payment_id: Uuid) -> Vec<Commission> {
    let mut rows: Vec<Commission> = state
        .commissions
        .values()
        .filter(|row| row.payment_id == payment_id)
        .cloned()
        .collect();
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    rows
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.get(&id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn save_user(&self, user: User) -> Result<User> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.users.insert(user.id, user.clone());
        self.commit(&mut state, next).await?;
        Ok(user)
    }

    async fn save_customer(&self, customer: Customer) -> Result<Customer> {
        let mut state = self.state.write().await;
        let duplicate = state.customers.values().any(|existing| {
            existing.id != customer.id
                && existing.owner_id == customer.owner_id
                && existing.username == customer.username
        });
        if duplicate {
            return Err(Error::Conflict(format!(
                "Customer '{}' already exists for this owner",
                customer.username
            )));
        }
        let mut next = state.clone();
        next.customers.insert(customer.id, customer.clone());
        self.commit(&mut state, next).await?;
        Ok(customer)
    }

    async fn list_customers(&self, filter: &CustomerFilter) -> Result<Vec<Customer>> {
        let state = self.state.read().await;
        let mut customers: Vec<Customer> = state
            .customers
            .values()
            .filter(|customer| filter.matches(customer))
            .cloned()
            .collect();
        customers.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(customers)
    }

    async fn find_customer(
        &self,
        owner_id: Option<Uuid>,
        username: &str,
    ) -> Result<Option<Customer>> {
        let state = self.state.read().await;
        let mut matches = state.customers.values().filter(|customer| {
            customer.username == username && owner_id.map_or(true, |id| customer.owner_id == id)
        });
        let found = matches.next().cloned();
        if found.is_some() && matches.next().is_some() {
            return Err(Error::Conflict(format!(
                "Customer '{}' exists under more than one owner",
                username
            )));
        }
        Ok(found)
    }

    async fn save_plan(&self, plan: ServicePlan) -> Result<ServicePlan> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.plans.retain(|id, existing| {
            *id == plan.id || !(existing.owner_id == plan.owner_id && existing.name == plan.name)
        });
        next.plans.insert(plan.id, plan.clone());
        self.commit(&mut state, next).await?;
        Ok(plan)
    }

    async fn find_plan(&self, owner_id: Uuid, name: &str) -> Result<Option<ServicePlan>> {
        let state = self.state.read().await;
        Ok(state
            .plans
            .values()
            .find(|plan| plan.owner_id == owner_id && plan.name == name)
            .cloned())
    }

    async fn find_payment_for_period(
        &self,
        owner_id: Uuid,
        username: &str,
        period: BillingPeriod,
    ) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|payment| {
                payment.owner_id == owner_id
                    && payment.username == username
                    && payment.period() == period
            })
            .cloned())
    }

    async fn insert_payment(&self, payment: Payment) -> Result<Payment> {
        let mut state = self.state.write().await;
        if state.payments.contains_key(&payment.id) {
            return Err(Error::Conflict(format!(
                "Payment with ID {} already exists",
                payment.id
            )));
        }
        if state.payments.values().any(|existing| {
            existing.owner_id == payment.owner_id
                && existing.username == payment.username
                && existing.period() == payment.period()
        }) {
            return Err(Error::Conflict(format!(
                "Payment for '{}' in {} already exists",
                payment.username,
                payment.period()
            )));
        }
        if let Some(order_id) = payment.order_id.as_deref() {
            if state
                .payments
                .values()
                .any(|existing| existing.order_id.as_deref() == Some(order_id))
            {
                return Err(Error::Conflict(format!(
                    "Order id '{}' is already in use",
                    order_id
                )));
            }
        }
        let mut next = state.clone();
        next.payments.insert(payment.id, payment.clone());
        self.commit(&mut state, next).await?;
        Ok(payment)
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state.payments.get(&id).cloned())
    }

    async fn find_payment_by_order_id(&self, order_id: &str) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|payment| payment.order_id.as_deref() == Some(order_id))
            .cloned())
    }

    async fn update_payment(&self, mut payment: Payment) -> Result<Payment> {
        let mut state = self.state.write().await;
        let existing = state
            .payments
            .get(&payment.id)
            .ok_or_else(|| Error::PaymentNotFound(payment.id.to_string()))?;
        // A stale copy must not undo a completion stored since it was read
        if existing.is_completed() {
            payment.status = existing.status;
            payment.paid_at = existing.paid_at;
        }
        if let Some(order_id) = payment.order_id.as_deref() {
            if state.payments.values().any(|existing| {
                existing.id != payment.id && existing.order_id.as_deref() == Some(order_id)
            }) {
                return Err(Error::Conflict(format!(
                    "Order id '{}' is already in use",
                    order_id
                )));
            }
        }
        let mut next = state.clone();
        next.payments.insert(payment.id, payment.clone());
        self.commit(&mut state, next).await?;
        Ok(payment)
    }

    async fn transition_payment(&self, id: Uuid, update: &StatusUpdate) -> Result<(Payment, bool)> {
        let mut state = self.state.write().await;
        let mut payment = state
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::PaymentNotFound(id.to_string()))?;
        let completed_now = payment.apply_update(update);

        let mut next = state.clone();
        next.payments.insert(payment.id, payment.clone());
        self.commit(&mut state, next).await?;
        Ok((payment, completed_now))
    }

    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<PaymentWithCommissions>> {
        let state = self.state.read().await;
        let mut payments: Vec<PaymentWithCommissions> = state
            .payments
            .values()
            .filter(|payment| filter.matches(payment))
            .map(|payment| PaymentWithCommissions {
                payment: payment.clone(),
                commissions: commissions_for(&state, payment.id),
            })
            .collect();
        payments.sort_by(|a, b| a.payment.date.cmp(&b.payment.date));
        Ok(payments)
    }

    async fn upsert_commission(&self, commission: Commission) -> Result<Commission> {
        let mut state = self.state.write().await;
        if !state.payments.contains_key(&commission.payment_id) {
            return Err(Error::PaymentNotFound(commission.payment_id.to_string()));
        }
        let stored = match state.commissions.get(&commission.key()) {
            Some(existing) => Commission {
                id: existing.id,
                created_at: existing.created_at,
                ..commission
            },
            None => commission,
        };
        let mut next = state.clone();
        next.commissions.insert(stored.key(), stored.clone());
        self.commit(&mut state, next).await?;
        Ok(stored)
    }

    async fn save_router(&self, router: RouterConnection) -> Result<RouterConnection> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.routers.insert(router.id, router.clone());
        self.commit(&mut state, next).await?;
        Ok(router)
    }

    async fn router_for_owner(&self, owner_id: Uuid) -> Result<Option<RouterConnection>> {
        let state = self.state.read().await;
        let mut routers: Vec<&RouterConnection> = state
            .routers
            .values()
            .filter(|router| router.owner_id == owner_id)
            .collect();
        routers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(routers.first().map(|router| (*router).clone()))
    }

    async fn save_gateway_credentials(
        &self,
        credentials: GatewayCredentials,
    ) -> Result<GatewayCredentials> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.gateway_credentials
            .insert(credentials.owner_id, credentials.clone());
        self.commit(&mut state, next).await?;
        Ok(credentials)
    }

    async fn gateway_credentials(&self, owner_id: Uuid) -> Result<Option<GatewayCredentials>> {
        let state = self.state.read().await;
        Ok(state.gateway_credentials.get(&owner_id).cloned())
    }

    async fn record_suspension(&self, record: SuspensionRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.suspensions
            .insert((record.owner_id, record.username.clone()), record);
        self.commit(&mut state, next).await
    }

    async fn get_suspension(
        &self,
        owner_id: Uuid,
        username: &str,
    ) -> Result<Option<SuspensionRecord>> {
        let state = self.state.read().await;
        Ok(state
            .suspensions
            .get(&(owner_id, username.to_string()))
            .cloned())
    }

    async fn clear_suspension(&self, owner_id: Uuid, username: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = (owner_id, username.to_string());
        if !state.suspensions.contains_key(&key) {
            return Ok(false);
        }
        let mut next = state.clone();
        next.suspensions.remove(&key);
        self.commit(&mut state, next).await?;
        Ok(true)
    }

    async fn enqueue_restore(&self, job: RestoreJob) -> Result<RestoreJob> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.restore_jobs.values().find(|existing| {
            existing.status == RestoreJobStatus::Pending
                && existing.owner_id == job.owner_id
                && existing.username == job.username
        }) {
            return Ok(existing.clone());
        }
        let mut next = state.clone();
        next.restore_jobs.insert(job.id, job.clone());
        self.commit(&mut state, next).await?;
        Ok(job)
    }

    async fn due_restore_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<RestoreJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<RestoreJob> = state
            .restore_jobs
            .values()
            .filter(|job| job.is_due(now))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.next_attempt_at.cmp(&b.next_attempt_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn update_restore_job(&self, job: RestoreJob) -> Result<RestoreJob> {
        let mut state = self.state.write().await;
        if !state.restore_jobs.contains_key(&job.id) {
            return Err(Error::NotFound(format!("Restore job {}", job.id)));
        }
        let mut next = state.clone();
        next.restore_jobs.insert(job.id, job.clone());
        self.commit(&mut state, next).await?;
        Ok(job)
    }

    async fn list_restore_jobs(&self) -> Result<Vec<RestoreJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<RestoreJob> = state.restore_jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }
}
