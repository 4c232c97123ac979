//! Billing Engine - subscription lifecycle and revenue attribution
//!
//! This crate provides:
//! - Invoice generation per billing period
//! - Commission attribution and the commission write path
//! - Isolation of unpaid customers on their access device, and restoration
//! - Reconciliation of signed payment gateway notifications
//! - A durable restore outbox drained by a background worker

pub mod audit;
pub mod checkout;
pub mod commission;
mod engine;
mod error;
pub mod invoice;
pub mod isolation;
mod locks;
pub mod outbox;
pub mod payments;
pub mod reconcile;
pub mod restore;
mod scope;
pub mod sentinel;

#[cfg(test)]
mod testing;

pub use audit::{AuditEntry, AuditSink, LogAuditSink};
pub use checkout::{CheckoutGateway, CheckoutService, CheckoutSession, SnapClient};
pub use commission::{CommissionAttributor, CommissionReport};
pub use engine::{BillingEngine, EngineConfig};
pub use error::{EngineError, Result};
pub use invoice::{InvoiceGenerator, InvoiceSummary};
pub use isolation::{EnforceRequest, EnforcerConfig, IsolationEnforcer, OwnerReport};
pub use locks::KeyedLocks;
pub use outbox::{start_restore_worker, OutboxConfig, RestoreWorker};
pub use payments::PaymentService;
pub use reconcile::{GatewayReconciler, PaymentNotification};
pub use restore::{RestoreOutcome, Restorer};
pub use scope::OwnerScope;
