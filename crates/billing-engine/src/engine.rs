//! Wires the engine components around one ledger and one device registry

use std::sync::Arc;

use device_link::DeviceRegistry;
use netbill_core::ledger::LedgerStore;
use tokio::sync::Notify;

use crate::audit::AuditSink;
use crate::checkout::{CheckoutGateway, CheckoutService};
use crate::commission::CommissionAttributor;
use crate::invoice::InvoiceGenerator;
use crate::isolation::{EnforcerConfig, IsolationEnforcer};
use crate::locks::KeyedLocks;
use crate::outbox::{OutboxConfig, RestoreWorker};
use crate::payments::PaymentService;
use crate::reconcile::GatewayReconciler;
use crate::restore::Restorer;

/// Configuration for the billing engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub enforcer: EnforcerConfig,
    pub outbox: OutboxConfig,
    /// Profile restored when neither the ledger nor the device remembers one
    pub fallback_profile: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enforcer: EnforcerConfig::default(),
            outbox: OutboxConfig::default(),
            fallback_profile: "default".to_string(),
        }
    }
}

/// All billing components, sharing one set of customer locks
pub struct BillingEngine {
    pub invoices: InvoiceGenerator,
    pub commissions: Arc<CommissionAttributor>,
    pub enforcer: IsolationEnforcer,
    pub restorer: Arc<Restorer>,
    pub payments: Arc<PaymentService>,
    pub reconciler: GatewayReconciler,
    pub checkout: CheckoutService,
    pub outbox: Arc<RestoreWorker>,
}

impl BillingEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        registry: Arc<DeviceRegistry>,
        gateway: Arc<dyn CheckoutGateway>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let outbox_signal = Arc::new(Notify::new());

        let commissions = Arc::new(CommissionAttributor::new(Arc::clone(&ledger)));
        let payments = Arc::new(PaymentService::new(
            Arc::clone(&ledger),
            Arc::clone(&commissions),
            Arc::clone(&outbox_signal),
        ));
        let restorer = Arc::new(Restorer::new(
            Arc::clone(&ledger),
            Arc::clone(&registry),
            Arc::clone(&locks),
            Arc::clone(&audit),
            config.fallback_profile,
        ));

        Self {
            invoices: InvoiceGenerator::new(Arc::clone(&ledger)),
            enforcer: IsolationEnforcer::new(
                Arc::clone(&ledger),
                registry,
                locks,
                audit,
                config.enforcer,
            ),
            reconciler: GatewayReconciler::new(Arc::clone(&ledger), Arc::clone(&payments)),
            checkout: CheckoutService::new(Arc::clone(&ledger), Arc::clone(&payments), gateway),
            outbox: Arc::new(RestoreWorker::new(
                ledger,
                Arc::clone(&restorer),
                config.outbox,
                outbox_signal,
            )),
            commissions,
            restorer,
            payments,
        }
    }
}
