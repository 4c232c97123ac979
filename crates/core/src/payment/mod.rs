//! Payment module
//!
//! Invoices, gateway state and commission rows.

mod model;
mod period;

pub use model::*;
pub use period::BillingPeriod;
