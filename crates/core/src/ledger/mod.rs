//! Ledger module
//!
//! The storage seam between the billing engine and whatever holds the books.

mod file_store;
mod repository;

pub use file_store::FileLedgerStore;
pub use repository::{CustomerFilter, LedgerStore, PaymentFilter};
