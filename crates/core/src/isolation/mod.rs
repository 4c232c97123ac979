//! Isolation module
//!
//! Ledger-side bookkeeping for suspended customers and pending restores.

mod model;

pub use model::*;
