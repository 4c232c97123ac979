//! Gateway reconciler - applies signed payment notifications to the ledger

use std::sync::Arc;

use netbill_core::ledger::LedgerStore;
use netbill_core::payment::{Payment, PaymentStatus};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::payments::{PaymentService, StatusUpdate};

/// Notification body posted by the payment gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub signature_key: String,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
}

/// The gateway's verdict on a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOutcome {
    Success,
    Challenge,
    Failed,
    Pending,
}

impl GatewayOutcome {
    pub fn from_statuses(transaction_status: &str, fraud_status: Option<&str>) -> Self {
        match (transaction_status, fraud_status) {
            ("capture", Some("accept")) => Self::Success,
            ("capture", Some("challenge")) => Self::Challenge,
            ("settlement", _) => Self::Success,
            ("cancel" | "deny" | "expire", _) => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn ledger_status(self) -> PaymentStatus {
        match self {
            Self::Success => PaymentStatus::Completed,
            Self::Failed => PaymentStatus::Failed,
            Self::Challenge | Self::Pending => PaymentStatus::Pending,
        }
    }
}

/// Hex SHA-512 over `order_id + status_code + gross_amount + server_key`
pub fn expected_signature(order_id: &str, status_code: &str, gross_amount: &str, server_key: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_signature(notification: &PaymentNotification, server_key: &str) -> bool {
    let expected = expected_signature(
        &notification.order_id,
        &notification.status_code,
        &notification.gross_amount,
        server_key,
    );
    expected
        .as_bytes()
        .ct_eq(notification.signature_key.as_bytes())
        .into()
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub payment: Payment,
    pub outcome: GatewayOutcome,
    pub completed_now: bool,
}

pub struct GatewayReconciler {
    ledger: Arc<dyn LedgerStore>,
    payments: Arc<PaymentService>,
}

impl GatewayReconciler {
    pub fn new(ledger: Arc<dyn LedgerStore>, payments: Arc<PaymentService>) -> Self {
        Self { ledger, payments }
    }

    /// Verify a notification and apply it.
    ///
    /// Nothing is written unless the signature matches the tenant's server key.
    /// Device work for a completed payment is queued, never awaited here.
    pub async fn reconcile(&self, notification: &PaymentNotification) -> Result<ReconcileOutcome> {
        let payment = self
            .ledger
            .find_payment_by_order_id(&notification.order_id)
            .await?
            .ok_or_else(|| EngineError::PaymentNotFound {
                reference: notification.order_id.clone(),
            })?;

        let credentials = self
            .ledger
            .gateway_credentials(payment.owner_id)
            .await?
            .ok_or_else(|| {
                EngineError::config(format!(
                    "Tenant {} has no payment gateway credentials",
                    payment.owner_id
                ))
            })?;

        if !verify_signature(notification, &credentials.server_key) {
            warn!(order_id = %notification.order_id, "Rejected notification with bad signature");
            return Err(EngineError::SignatureMismatch {
                order_id: notification.order_id.clone(),
            });
        }

        if !amount_matches(&notification.gross_amount, payment.amount) {
            warn!(
                order_id = %notification.order_id,
                gross_amount = %notification.gross_amount,
                expected = payment.amount,
                "Gross amount differs from invoice"
            );
        }

        let outcome = GatewayOutcome::from_statuses(
            &notification.transaction_status,
            notification.fraud_status.as_deref(),
        );
        let change = self
            .payments
            .apply(
                payment.id,
                StatusUpdate {
                    status: outcome.ledger_status(),
                    gateway_status: Some(notification.transaction_status.clone()),
                    payment_type: notification.payment_type.clone(),
                },
            )
            .await?;

        info!(
            order_id = %notification.order_id,
            transaction_status = %notification.transaction_status,
            status = change.payment.status.as_str(),
            "Payment notification applied"
        );
        Ok(ReconcileOutcome {
            payment: change.payment,
            outcome,
            completed_now: change.completed_now,
        })
    }
}

/// Gateways send amounts like `"150000.00"`
fn amount_matches(gross_amount: &str, amount: i64) -> bool {
    let whole = gross_amount.split('.').next().unwrap_or_default();
    whole.parse::<i64>().map_or(false, |value| value == amount)
}

#[cfg(test)]
mod tests {
    use netbill_core::payment::BillingPeriod;
    use tokio::sync::Notify;

    use super::*;
    use crate::commission::CommissionAttributor;
    use crate::testing::{Fixture, SERVER_KEY};

    fn reconciler(fixture: &Fixture) -> GatewayReconciler {
        let commissions = Arc::new(CommissionAttributor::new(fixture.ledger.clone()));
        let payments = Arc::new(PaymentService::new(
            fixture.ledger.clone(),
            commissions,
            Arc::new(Notify::new()),
        ));
        GatewayReconciler::new(fixture.ledger.clone(), payments)
    }

    fn notification(order_id: &str, transaction_status: &str, key: &str) -> PaymentNotification {
        PaymentNotification {
            order_id: order_id.to_string(),
            status_code: "200".to_string(),
            gross_amount: "150000.00".to_string(),
            signature_key: expected_signature(order_id, "200", "150000.00", key),
            transaction_status: transaction_status.to_string(),
            fraud_status: Some("accept".to_string()),
            payment_type: Some("bank_transfer".to_string()),
        }
    }

    async fn pending_order(fixture: &Fixture, order_id: &str) -> Payment {
        let (owner, _) = fixture.tenant("isp-one", None).await;
        fixture.customer(&owner, "alice", "plan-10mbps").await;
        fixture
            .ledger
            .insert_payment(
                Payment::pending("alice", owner.id, 150_000, BillingPeriod::new(5, 2024).unwrap())
                    .with_order_id(order_id),
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_status_mapping() {
        use GatewayOutcome::*;
        assert_eq!(GatewayOutcome::from_statuses("capture", Some("accept")), Success);
        assert_eq!(GatewayOutcome::from_statuses("capture", Some("challenge")), Challenge);
        assert_eq!(GatewayOutcome::from_statuses("settlement", None), Success);
        assert_eq!(GatewayOutcome::from_statuses("expire", None), Failed);
        assert_eq!(GatewayOutcome::from_statuses("deny", Some("accept")), Failed);
        assert_eq!(GatewayOutcome::from_statuses("pending", None), Pending);
        assert_eq!(GatewayOutcome::from_statuses("refund", None), Pending);

        assert_eq!(Challenge.ledger_status(), PaymentStatus::Pending);
        assert_eq!(Success.ledger_status(), PaymentStatus::Completed);
    }

    #[test]
    fn test_signature_is_hex_sha512() {
        let signature = expected_signature("ORD-1", "200", "1000.00", "key");
        assert_eq!(signature.len(), 128);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_settlement_completes_payment() {
        let fixture = Fixture::new().await;
        let payment = pending_order(&fixture, "ORD-1").await;

        let outcome = reconciler(&fixture)
            .reconcile(&notification("ORD-1", "settlement", SERVER_KEY))
            .await
            .unwrap();

        assert!(outcome.completed_now);
        assert_eq!(outcome.outcome, GatewayOutcome::Success);
        let stored = fixture.ledger.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert_eq!(stored.gateway_status.as_deref(), Some("settlement"));
        assert_eq!(stored.payment_type.as_deref(), Some("bank_transfer"));
        assert_eq!(fixture.ledger.list_restore_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let fixture = Fixture::new().await;
        let payment = pending_order(&fixture, "ORD-1").await;

        let result = reconciler(&fixture)
            .reconcile(&notification("ORD-1", "settlement", "wrong-key"))
            .await;

        assert!(matches!(result, Err(EngineError::SignatureMismatch { .. })));
        let stored = fixture.ledger.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored, payment);
        assert!(fixture.ledger.list_restore_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let fixture = Fixture::new().await;
        let result = reconciler(&fixture)
            .reconcile(&notification("ORD-404", "settlement", SERVER_KEY))
            .await;
        assert!(matches!(result, Err(EngineError::PaymentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_notification_queues_one_restore() {
        let fixture = Fixture::new().await;
        pending_order(&fixture, "ORD-1").await;
        let reconciler = reconciler(&fixture);

        let first = reconciler
            .reconcile(&notification("ORD-1", "settlement", SERVER_KEY))
            .await
            .unwrap();
        let second = reconciler
            .reconcile(&notification("ORD-1", "settlement", SERVER_KEY))
            .await
            .unwrap();
        let late_expiry = reconciler
            .reconcile(&notification("ORD-1", "expire", SERVER_KEY))
            .await
            .unwrap();

        assert!(first.completed_now);
        assert!(!second.completed_now);
        assert_eq!(late_expiry.payment.status, PaymentStatus::Completed);
        assert_eq!(fixture.ledger.list_restore_jobs().await.unwrap().len(), 1);
    }

    #[test]
    fn test_amount_matches() {
        assert!(amount_matches("150000.00", 150_000));
        assert!(amount_matches("150000", 150_000));
        assert!(!amount_matches("149000.00", 150_000));
        assert!(!amount_matches("abc", 150_000));
    }
}
