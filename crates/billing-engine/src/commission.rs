//! Commission attribution
//!
//! Rolls payments up into per-partner and per-tenant totals, and writes the
//! commission rows a completed payment earns.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use netbill_core::ledger::{LedgerStore, PaymentFilter};
use netbill_core::payment::{BillingPeriod, Commission, CommissionRole, Payment, PaymentWithCommissions};
use netbill_core::tenant::User;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::scope::OwnerScope;

const UNKNOWN_OWNER: &str = "unknown owner";

/// Totals for one partner, or for a tenant acting as its own partner
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerSummary {
    /// `None` for the unknown owner bucket
    pub user_id: Option<Uuid>,
    pub username: String,
    pub role: String,
    /// Pseudo-partner standing for the tenant itself
    pub is_owner: bool,
    pub revenue: i64,
    pub total_commission: i64,
    pub paid_count: u32,
    pub unpaid_count: u32,
}

/// Totals for one tenant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSummary {
    pub owner_id: Option<Uuid>,
    pub owner_name: String,
    pub total_billed: i64,
    pub collected: i64,
    pub paid_count: u32,
    pub unpaid_count: u32,
    pub commission_paid: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrandTotal {
    pub revenue: i64,
    pub commission: i64,
    pub paid_count: u32,
    pub unpaid_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionReport {
    pub partners: Vec<PartnerSummary>,
    pub owners: Vec<OwnerSummary>,
    pub grand_total: GrandTotal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PartnerKey {
    Owner(Option<Uuid>),
    User(Uuid),
}

fn owner_identity(users: &HashMap<Uuid, User>, owner_id: Uuid) -> (Option<Uuid>, String) {
    match users.get(&owner_id) {
        Some(owner) => (Some(owner.id), owner.username.clone()),
        None => (None, UNKNOWN_OWNER.to_string()),
    }
}

fn sort_partners(partners: &mut [PartnerSummary]) {
    partners.sort_by(|a, b| match (a.is_owner, b.is_owner) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => b
            .revenue
            .cmp(&a.revenue)
            .then_with(|| a.username.cmp(&b.username)),
    });
}

/// Aggregate payments, already scoped by tenant and period, into a report.
///
/// A payment's revenue is credited at most once to each partner even when the
/// partner holds several commission rows on it.
pub fn attribute(payments: &[PaymentWithCommissions], users: &HashMap<Uuid, User>) -> CommissionReport {
    let mut partners: HashMap<PartnerKey, PartnerSummary> = HashMap::new();
    let mut owners: HashMap<Option<Uuid>, OwnerSummary> = HashMap::new();
    let mut grand_total = GrandTotal::default();

    for PaymentWithCommissions {
        payment,
        commissions,
    } in payments
    {
        let completed = payment.is_completed();
        let commission_sum: i64 = commissions.iter().map(|row| row.amount).sum();
        let (owner_key, owner_name) = owner_identity(users, payment.owner_id);

        let owner = owners.entry(owner_key).or_insert_with(|| OwnerSummary {
            owner_id: owner_key,
            owner_name: owner_name.clone(),
            total_billed: 0,
            collected: 0,
            paid_count: 0,
            unpaid_count: 0,
            commission_paid: 0,
        });
        owner.total_billed += payment.amount;
        owner.commission_paid += commission_sum;
        grand_total.commission += commission_sum;
        if completed {
            owner.collected += payment.amount;
            owner.paid_count += 1;
            grand_total.revenue += payment.amount;
            grand_total.paid_count += 1;
        } else {
            owner.unpaid_count += 1;
            grand_total.unpaid_count += 1;
        }

        if commissions.is_empty() {
            let entry = partners
                .entry(PartnerKey::Owner(owner_key))
                .or_insert_with(|| PartnerSummary {
                    user_id: owner_key,
                    username: owner_name,
                    role: "owner".to_string(),
                    is_owner: true,
                    revenue: 0,
                    total_commission: 0,
                    paid_count: 0,
                    unpaid_count: 0,
                });
            credit(entry, payment, completed);
            continue;
        }

        let mut counted = HashSet::new();
        for row in commissions {
            let entry = partners
                .entry(PartnerKey::User(row.user_id))
                .or_insert_with(|| PartnerSummary {
                    user_id: Some(row.user_id),
                    username: row.username.clone(),
                    role: users
                        .get(&row.user_id)
                        .map(|user| user.role.as_str())
                        .unwrap_or_else(|| row.role.as_str())
                        .to_string(),
                    is_owner: false,
                    revenue: 0,
                    total_commission: 0,
                    paid_count: 0,
                    unpaid_count: 0,
                });
            entry.total_commission += row.amount;
            if counted.insert(row.user_id) {
                credit(entry, payment, completed);
            }
        }
    }

    let mut partners: Vec<PartnerSummary> = partners.into_values().collect();
    sort_partners(&mut partners);

    let mut owners: Vec<OwnerSummary> = owners.into_values().collect();
    owners.sort_by(|a, b| {
        b.collected
            .cmp(&a.collected)
            .then_with(|| a.owner_name.cmp(&b.owner_name))
    });

    CommissionReport {
        partners,
        owners,
        grand_total,
    }
}

fn credit(entry: &mut PartnerSummary, payment: &Payment, completed: bool) {
    if completed {
        entry.revenue += payment.amount;
        entry.paid_count += 1;
    } else {
        entry.unpaid_count += 1;
    }
}

/// Reads payments for reports and writes commission rows
pub struct CommissionAttributor {
    ledger: Arc<dyn LedgerStore>,
}

impl CommissionAttributor {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Build the report for a period within the caller's scope
    pub async fn aggregate(&self, scope: OwnerScope, period: BillingPeriod) -> Result<CommissionReport> {
        let filter = PaymentFilter {
            owner_id: scope.owner_id(),
            period: Some(period),
            ..PaymentFilter::default()
        };
        let payments = self.ledger.list_payments(&filter).await?;
        let users: HashMap<Uuid, User> = self
            .ledger
            .list_users()
            .await?
            .into_iter()
            .map(|user| (user.id, user))
            .collect();

        debug!(period = %period, payments = payments.len(), "Aggregating commissions");
        Ok(attribute(&payments, &users))
    }

    /// Upsert the agent and technician rows a completed payment earns
    pub async fn record_for_payment(&self, payment: &Payment) -> Result<Vec<Commission>> {
        let Some(customer) = self
            .ledger
            .find_customer(Some(payment.owner_id), &payment.username)
            .await?
        else {
            warn!(
                username = %payment.username,
                payment_id = %payment.id,
                "No customer record for payment, skipping commissions"
            );
            return Ok(Vec::new());
        };

        let partners = [
            (CommissionRole::Agent, customer.agent_id),
            (CommissionRole::Technician, customer.technician_id),
        ];

        let mut rows = Vec::new();
        for (role, user_id) in partners {
            let Some(user_id) = user_id else {
                continue;
            };
            let Some(user) = self.ledger.get_user(user_id).await? else {
                warn!(
                    user_id = %user_id,
                    role = role.as_str(),
                    "Commission partner no longer exists"
                );
                continue;
            };

            let amount = payment.amount * i64::from(user.commission_percent) / 100;
            let row = self
                .ledger
                .upsert_commission(Commission::new(payment.id, user.id, &user.username, role, amount))
                .await?;
            debug!(
                payment_id = %payment.id,
                partner = %user.username,
                role = role.as_str(),
                amount,
                "Commission recorded"
            );
            rows.push(row);
        }
        Ok(rows)
    }
}
