//! Invoice generator - one pending payment per customer and period

use std::sync::Arc;

use netbill_core::customer::Customer;
use netbill_core::ledger::{CustomerFilter, LedgerStore};
use netbill_core::payment::{BillingPeriod, Payment};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::scope::OwnerScope;

/// A customer that could not be invoiced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceFailure {
    pub username: String,
    pub error: String,
}

/// Result of one generation run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub generated: usize,
    pub skipped: usize,
    pub failed: Vec<InvoiceFailure>,
    pub month: u32,
    pub year: i32,
}

impl InvoiceSummary {
    fn empty(period: BillingPeriod) -> Self {
        Self {
            generated: 0,
            skipped: 0,
            failed: Vec::new(),
            month: period.month,
            year: period.year,
        }
    }
}

enum InvoiceOutcome {
    Generated,
    Skipped,
}

pub struct InvoiceGenerator {
    ledger: Arc<dyn LedgerStore>,
}

impl InvoiceGenerator {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Create pending invoices for every customer in scope that has none for the period.
    ///
    /// Customers that already have a payment for the period, in any status, are
    /// skipped. A customer whose plan has no price is reported and the run goes on.
    pub async fn generate(
        &self,
        period: BillingPeriod,
        router_id: Option<Uuid>,
        scope: OwnerScope,
    ) -> Result<InvoiceSummary> {
        let filter = CustomerFilter {
            owner_id: scope.owner_id(),
            router_id,
        };
        let customers = self.ledger.list_customers(&filter).await?;
        info!(
            period = %period,
            customers = customers.len(),
            "Generating invoices"
        );

        let mut summary = InvoiceSummary::empty(period);
        for customer in &customers {
            match self.invoice_customer(customer, period).await {
                Ok(InvoiceOutcome::Generated) => summary.generated += 1,
                Ok(InvoiceOutcome::Skipped) => summary.skipped += 1,
                Err(err) => {
                    warn!(
                        username = %customer.username,
                        owner_id = %customer.owner_id,
                        error = %err,
                        "Failed to invoice customer"
                    );
                    summary.failed.push(InvoiceFailure {
                        username: customer.username.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            period = %period,
            generated = summary.generated,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            "Invoice generation finished"
        );
        Ok(summary)
    }

    async fn invoice_customer(
        &self,
        customer: &Customer,
        period: BillingPeriod,
    ) -> Result<InvoiceOutcome> {
        if self
            .ledger
            .find_payment_for_period(customer.owner_id, &customer.username, period)
            .await?
            .is_some()
        {
            return Ok(InvoiceOutcome::Skipped);
        }

        let plan = self
            .ledger
            .find_plan(customer.owner_id, &customer.plan)
            .await?
            .ok_or_else(|| {
                EngineError::config(format!("No price configured for plan '{}'", customer.plan))
            })?;

        let payment = Payment::pending(&customer.username, customer.owner_id, plan.price, period);
        match self.ledger.insert_payment(payment).await {
            Ok(payment) => {
                debug!(
                    username = %customer.username,
                    invoice = %payment.invoice_number,
                    "Invoice created"
                );
                Ok(InvoiceOutcome::Generated)
            }
            // Lost a race with a concurrent run for the same period
            Err(netbill_core::Error::Conflict(_)) => Ok(InvoiceOutcome::Skipped),
            Err(err) => Err(err.into()),
        }
    }
}
