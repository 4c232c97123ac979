//! Tenant module
//!
//! System principals plus the per-tenant device and gateway settings.

mod model;

pub use model::*;
