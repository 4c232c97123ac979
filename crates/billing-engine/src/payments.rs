//! Payment status transitions
//!
//! The only place a payment becomes completed. Completion writes commissions
//! and queues a restore job for the outbox worker.

use std::sync::Arc;

use netbill_core::isolation::RestoreJob;
use netbill_core::ledger::LedgerStore;
use netbill_core::payment::{Payment, PaymentStatus};
pub use netbill_core::payment::StatusUpdate;
use tokio::sync::Notify;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::commission::CommissionAttributor;
use crate::error::{EngineError, Result};
use crate::scope::OwnerScope;

/// The stored payment after an update
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub payment: Payment,
    /// The update moved the payment into completed
    pub completed_now: bool,
}

pub struct PaymentService {
    ledger: Arc<dyn LedgerStore>,
    commissions: Arc<CommissionAttributor>,
    outbox_signal: Arc<Notify>,
}

impl PaymentService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        commissions: Arc<CommissionAttributor>,
        outbox_signal: Arc<Notify>,
    ) -> Self {
        Self {
            ledger,
            commissions,
            outbox_signal,
        }
    }

    /// Payment by id, hidden when outside the caller's scope
    pub async fn get_scoped(&self, payment_id: Uuid, scope: OwnerScope) -> Result<Payment> {
        self.ledger
            .get_payment(payment_id)
            .await?
            .filter(|payment| scope.allows(payment.owner_id))
            .ok_or_else(|| EngineError::PaymentNotFound {
                reference: payment_id.to_string(),
            })
    }

    /// Apply a status update to the stored payment. A completed payment never
    /// leaves completed; later updates only refresh the raw gateway fields.
    pub async fn apply(&self, payment_id: Uuid, update: StatusUpdate) -> Result<StatusChange> {
        let (payment, completed_now) = self.ledger.transition_payment(payment_id, &update).await?;
        if completed_now {
            info!(
                payment_id = %payment.id,
                username = %payment.username,
                amount = payment.amount,
                "Payment completed"
            );
            self.on_completed(&payment).await;
        } else if payment.is_completed() && update.status != PaymentStatus::Completed {
            debug!(
                payment_id = %payment.id,
                ignored = update.status.as_str(),
                "Payment already completed, keeping status"
            );
        }

        Ok(StatusChange {
            payment,
            completed_now,
        })
    }

    /// Administrative correction: complete a payment without a gateway notification
    pub async fn mark_paid(&self, payment_id: Uuid, scope: OwnerScope) -> Result<StatusChange> {
        let payment = self.get_scoped(payment_id, scope).await?;
        self.apply(
            payment.id,
            StatusUpdate {
                status: PaymentStatus::Completed,
                gateway_status: None,
                payment_type: Some("manual".to_string()),
            },
        )
        .await
    }

    async fn on_completed(&self, payment: &Payment) {
        if let Err(err) = self.commissions.record_for_payment(payment).await {
            error!(
                payment_id = %payment.id,
                error = %err,
                "Failed to record commissions"
            );
        }

        let job = RestoreJob::new(payment.owner_id, &payment.username, Some(payment.id));
        match self.ledger.enqueue_restore(job).await {
            Ok(job) => {
                debug!(job_id = %job.id, username = %job.username, "Restore queued");
                self.outbox_signal.notify_one();
            }
            Err(err) => error!(
                payment_id = %payment.id,
                username = %payment.username,
                error = %err,
                "Failed to queue restore"
            ),
        }
    }
}
