//! Payment and commission model definitions

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::period::BillingPeriod;

/// Ledger status of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// An invoice for one subscriber and one billing period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    /// Human-facing number, may repeat across gateway retries
    pub invoice_number: String,
    /// Gateway order identifier, assigned when a checkout is started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub username: String,
    pub owner_id: Uuid,
    pub amount: i64,
    pub month: u32,
    pub year: i32,
    pub status: PaymentStatus,
    /// Raw status string last reported by the payment provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_type: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Create a pending invoice for the given period
    pub fn pending(
        username: impl Into<String>,
        owner_id: Uuid,
        amount: i64,
        period: BillingPeriod,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            invoice_number: generate_invoice_number(period),
            order_id: None,
            username: username.into(),
            owner_id,
            amount,
            month: period.month,
            year: period.year,
            status: PaymentStatus::Pending,
            gateway_status: None,
            payment_type: None,
            date: Utc::now(),
            paid_at: None,
        }
    }

    /// Set the gateway order id
    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    /// Set the ledger status
    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.status = status;
        if status == PaymentStatus::Completed && self.paid_at.is_none() {
            self.paid_at = Some(Utc::now());
        }
        self
    }

    pub fn period(&self) -> BillingPeriod {
        BillingPeriod {
            month: self.month,
            year: self.year,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    /// Apply a status update in place, returning whether it completed the payment.
    ///
    /// A completed payment never leaves completed; later updates only refresh
    /// the raw gateway fields.
    pub fn apply_update(&mut self, update: &StatusUpdate) -> bool {
        if update.gateway_status.is_some() {
            self.gateway_status = update.gateway_status.clone();
        }
        if update.payment_type.is_some() {
            self.payment_type = update.payment_type.clone();
        }
        if self.is_completed() {
            return false;
        }
        self.status = update.status;
        if self.is_completed() && self.paid_at.is_none() {
            self.paid_at = Some(Utc::now());
        }
        self.is_completed()
    }
}

/// A status change reported for a payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: PaymentStatus,
    pub gateway_status: Option<String>,
    pub payment_type: Option<String>,
}

/// `INV-YYYYMM-XXXXXX` with a random uppercase suffix
pub fn generate_invoice_number(period: BillingPeriod) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!(
        "INV-{:04}{:02}-{}",
        period.year,
        period.month,
        suffix.to_uppercase()
    )
}

/// Role a partner plays on a customer's account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionRole {
    Agent,
    Technician,
}

impl CommissionRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Technician => "technician",
        }
    }
}

/// A partner's share of one payment.
///
/// At most one row exists per `(payment_id, user_id, role)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commission {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub user_id: Uuid,
    /// Denormalized for display
    pub username: String,
    pub role: CommissionRole,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl Commission {
    pub fn new(
        payment_id: Uuid,
        user_id: Uuid,
        username: impl Into<String>,
        role: CommissionRole,
        amount: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            user_id,
            username: username.into(),
            role,
            amount,
            created_at: Utc::now(),
        }
    }

    /// Uniqueness key for upserts
    pub fn key(&self) -> (Uuid, Uuid, CommissionRole) {
        (self.payment_id, self.user_id, self.role)
    }
}

/// A payment joined with its commission rows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWithCommissions {
    #[serde(flatten)]
    pub payment: Payment,
    #[serde(default)]
    pub commissions: Vec<Commission>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period() -> BillingPeriod {
        BillingPeriod::new(5, 2024).unwrap()
    }

    #[test]
    fn test_apply_update_keeps_completed() {
        let mut payment = Payment::pending("alice", Uuid::new_v4(), 150_000, period());
        let settle = StatusUpdate {
            status: PaymentStatus::Completed,
            gateway_status: Some("settlement".to_string()),
            payment_type: Some("qris".to_string()),
        };
        assert!(payment.apply_update(&settle));
        assert!(payment.paid_at.is_some());
        assert!(!payment.apply_update(&settle));

        let expire = StatusUpdate {
            status: PaymentStatus::Failed,
            gateway_status: Some("expire".to_string()),
            payment_type: None,
        };
        assert!(!payment.apply_update(&expire));
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.gateway_status.as_deref(), Some("expire"));
        assert_eq!(payment.payment_type.as_deref(), Some("qris"));
    }

    #[test]
    fn test_pending_payment() {
        let owner = Uuid::new_v4();
        let payment = Payment::pending("alice", owner, 150_000, period());

        assert_eq!(payment.username, "alice");
        assert_eq!(payment.owner_id, owner);
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.period(), period());
        assert!(payment.order_id.is_none());
        assert!(payment.paid_at.is_none());
    }

    #[test]
    fn test_invoice_number_format() {
        let number = generate_invoice_number(period());
        assert!(number.starts_with("INV-202405-"));
        assert_eq!(number.len(), "INV-202405-".len() + 6);
    }

    #[test]
    fn test_completed_status_sets_paid_at() {
        let payment = Payment::pending("alice", Uuid::new_v4(), 1, period())
            .with_status(PaymentStatus::Completed);
        assert!(payment.is_completed());
        assert!(payment.paid_at.is_some());
    }

    #[test]
    fn test_payment_serializes_camel_case() {
        let payment = Payment::pending("alice", Uuid::new_v4(), 1, period()).with_order_id("ORD-1");
        let value = serde_json::to_value(&payment).unwrap();
        assert_eq!(value["invoiceNumber"], payment.invoice_number.as_str());
        assert_eq!(value["orderId"], "ORD-1");
        assert_eq!(value["status"], "pending");
        assert!(value.get("gatewayStatus").is_none());
    }
}
