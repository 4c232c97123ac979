//! Customer module
//!
//! Subscribers and the service plans they are billed for.

mod model;

pub use model::*;
