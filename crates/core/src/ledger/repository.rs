//! Ledger repository trait
//!
//! Defines the interface the billing engine uses to read and write the ledger.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::customer::{Customer, ServicePlan};
use crate::isolation::{RestoreJob, SuspensionRecord};
use crate::payment::{
    BillingPeriod, Commission, Payment, PaymentStatus, PaymentWithCommissions, StatusUpdate,
};
use crate::tenant::{GatewayCredentials, RouterConnection, User};
use crate::Result;

/// Customer query
#[derive(Debug, Clone, Default)]
pub struct CustomerFilter {
    /// `None` means every tenant
    pub owner_id: Option<Uuid>,
    pub router_id: Option<Uuid>,
}

impl CustomerFilter {
    pub fn matches(&self, customer: &Customer) -> bool {
        self.owner_id.map_or(true, |id| customer.owner_id == id)
            && self
                .router_id
                .map_or(true, |id| customer.router_id == Some(id))
    }
}

/// Payment query
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub owner_id: Option<Uuid>,
    pub period: Option<BillingPeriod>,
    pub status: Option<PaymentStatus>,
    pub username: Option<String>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.owner_id.map_or(true, |id| payment.owner_id == id)
            && self.period.map_or(true, |period| payment.period() == period)
            && self.status.map_or(true, |status| payment.status == status)
            && self
                .username
                .as_deref()
                .map_or(true, |username| payment.username == username)
    }
}

/// Repository interface for the billing ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // Users

    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    async fn list_users(&self) -> Result<Vec<User>>;

    /// Insert or replace a user
    async fn save_user(&self, user: User) -> Result<User>;

    /// Tenants with auto isolation switched on
    async fn list_auto_isolation_owners(&self) -> Result<Vec<User>> {
        let users = self.list_users().await?;
        Ok(users
            .into_iter()
            .filter(|user| user.is_auto_isolation_enabled)
            .collect())
    }

    // Customers

    /// Insert or replace a customer
    async fn save_customer(&self, customer: Customer) -> Result<Customer>;

    async fn list_customers(&self, filter: &CustomerFilter) -> Result<Vec<Customer>>;

    /// Find a customer by login name, optionally within one tenant.
    ///
    /// Without an owner, a name shared by several tenants is a conflict.
    async fn find_customer(&self, owner_id: Option<Uuid>, username: &str)
        -> Result<Option<Customer>>;

    // Plans

    async fn save_plan(&self, plan: ServicePlan) -> Result<ServicePlan>;

    async fn find_plan(&self, owner_id: Uuid, name: &str) -> Result<Option<ServicePlan>>;

    // Payments

    /// The payment for a subscriber's period, whatever its status
    async fn find_payment_for_period(
        &self,
        owner_id: Uuid,
        username: &str,
        period: BillingPeriod,
    ) -> Result<Option<Payment>>;

    /// Insert a new payment; fails on a duplicate id or order id
    async fn insert_payment(&self, payment: Payment) -> Result<Payment>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>>;

    async fn find_payment_by_order_id(&self, order_id: &str) -> Result<Option<Payment>>;

    /// Replace an existing payment; a stored completion is kept
    async fn update_payment(&self, payment: Payment) -> Result<Payment>;

    /// Apply a status update to the stored row in one step, so concurrent
    /// notifications never write over a completion. Returns the stored
    /// payment and whether this update completed it.
    async fn transition_payment(&self, id: Uuid, update: &StatusUpdate) -> Result<(Payment, bool)>;

    async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<PaymentWithCommissions>>;

    /// Usernames with a completed payment for the period
    async fn completed_usernames(
        &self,
        owner_id: Uuid,
        period: BillingPeriod,
    ) -> Result<HashSet<String>> {
        let filter = PaymentFilter {
            owner_id: Some(owner_id),
            period: Some(period),
            status: Some(PaymentStatus::Completed),
            username: None,
        };
        let payments = self.list_payments(&filter).await?;
        Ok(payments
            .into_iter()
            .map(|entry| entry.payment.username)
            .collect())
    }

    // Commissions

    /// Insert or update the row keyed by `(payment_id, user_id, role)`
    async fn upsert_commission(&self, commission: Commission) -> Result<Commission>;

    // Device and gateway settings

    async fn save_router(&self, router: RouterConnection) -> Result<RouterConnection>;

    async fn router_for_owner(&self, owner_id: Uuid) -> Result<Option<RouterConnection>>;

    async fn save_gateway_credentials(
        &self,
        credentials: GatewayCredentials,
    ) -> Result<GatewayCredentials>;

    async fn gateway_credentials(&self, owner_id: Uuid) -> Result<Option<GatewayCredentials>>;

    // Suspensions

    /// Record the pre-suspension profile, replacing any older record
    async fn record_suspension(&self, record: SuspensionRecord) -> Result<()>;

    async fn get_suspension(&self, owner_id: Uuid, username: &str)
        -> Result<Option<SuspensionRecord>>;

    /// Remove a suspension record, returning whether one existed
    async fn clear_suspension(&self, owner_id: Uuid, username: &str) -> Result<bool>;

    // Restore outbox

    /// Queue a restore; an already pending job for the same customer is returned instead
    async fn enqueue_restore(&self, job: RestoreJob) -> Result<RestoreJob>;

    async fn due_restore_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<RestoreJob>>;

    async fn update_restore_job(&self, job: RestoreJob) -> Result<RestoreJob>;

    async fn list_restore_jobs(&self) -> Result<Vec<RestoreJob>>;
}
