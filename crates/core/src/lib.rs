//! Core library for the netbill engine
//!
//! This crate contains the ledger side of the billing platform:
//! - Tenant, customer, payment and commission models
//! - Billing periods
//! - The `LedgerStore` trait and its JSON-file implementation

pub mod customer;
pub mod error;
pub mod isolation;
pub mod ledger;
pub mod payment;
pub mod tenant;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
