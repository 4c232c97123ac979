//! Device Link - command execution against subscriber access devices
//!
//! This crate treats the router that holds the PPP secret and session tables
//! as an opaque command executor, and owns the per-tenant connections to it.

mod error;
mod executor;
mod memory;
mod registry;
mod rest;

pub use error::{DeviceError, Result};
pub use executor::{ActiveSession, DeviceExecutor, DeviceSecret, SecretUpdate};
pub use memory::{MemoryConnector, MemoryDevice};
pub use registry::{
    start_health_checker, DeviceConnector, DeviceHandle, DeviceRegistry, RegistryConfig,
};
pub use rest::{RestConnector, RestDevice};
