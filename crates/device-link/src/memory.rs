//! In-memory access device
//!
//! Mirrors the secret and session tables of a real router. Used for local
//! development and as the device double in tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netbill_core::tenant::RouterConnection;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{DeviceError, Result};
use crate::executor::{ActiveSession, DeviceExecutor, DeviceSecret, SecretUpdate};
use crate::registry::DeviceConnector;

#[derive(Debug, Default)]
struct DeviceTables {
    secrets: Vec<DeviceSecret>,
    sessions: Vec<ActiveSession>,
    next_id: u32,
    /// Secret names whose writes are rejected
    failing_writes: HashSet<String>,
    latency: Option<Duration>,
    unreachable: bool,
}

impl DeviceTables {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("*{:X}", self.next_id)
    }
}

/// A device whose tables live in memory
#[derive(Debug, Default)]
pub struct MemoryDevice {
    tables: RwLock<DeviceTables>,
    secret_writes: AtomicUsize,
    session_removals: AtomicUsize,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret, returning its device id
    pub async fn add_secret(&self, name: &str, profile: &str, comment: &str) -> String {
        let mut tables = self.tables.write().await;
        let id = tables.allocate_id();
        tables
            .secrets
            .push(DeviceSecret::new(id.clone(), name, profile).with_comment(comment));
        id
    }

    /// Open a session for a subscriber, returning its device id
    pub async fn connect_session(&self, name: &str) -> String {
        let mut tables = self.tables.write().await;
        let id = tables.allocate_id();
        tables.sessions.push(ActiveSession {
            id: id.clone(),
            name: name.to_string(),
            address: None,
        });
        id
    }

    pub async fn secret(&self, name: &str) -> Option<DeviceSecret> {
        let tables = self.tables.read().await;
        tables.secrets.iter().find(|secret| secret.name == name).cloned()
    }

    pub async fn sessions_for(&self, name: &str) -> Vec<ActiveSession> {
        let tables = self.tables.read().await;
        tables
            .sessions
            .iter()
            .filter(|session| session.name == name)
            .cloned()
            .collect()
    }

    /// Overwrite a secret's comment as an operator would
    pub async fn edit_comment(&self, name: &str, comment: &str) {
        let mut tables = self.tables.write().await;
        if let Some(secret) = tables.secrets.iter_mut().find(|secret| secret.name == name) {
            secret.comment = comment.to_string();
        }
    }

    /// Number of successful `set_secret_fields` calls
    pub fn secret_writes(&self) -> usize {
        self.secret_writes.load(Ordering::SeqCst)
    }

    /// Number of successful `remove_active_session` calls
    pub fn session_removals(&self) -> usize {
        self.session_removals.load(Ordering::SeqCst)
    }

    /// Make writes to one secret fail
    pub async fn fail_writes_for(&self, name: &str) {
        self.tables.write().await.failing_writes.insert(name.to_string());
    }

    /// Delay every command by the given duration
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.tables.write().await.latency = latency;
    }

    /// Make every command fail with a connection error
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.tables.write().await.unreachable = unreachable;
    }

    async fn simulate_link(&self) -> Result<()> {
        let (latency, unreachable) = {
            let tables = self.tables.read().await;
            (tables.latency, tables.unreachable)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if unreachable {
            return Err(DeviceError::connection("device unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceExecutor for MemoryDevice {
    async fn list_secrets(&self) -> Result<Vec<DeviceSecret>> {
        self.simulate_link().await?;
        Ok(self.tables.read().await.secrets.clone())
    }

    async fn set_secret_fields(&self, id: &str, update: &SecretUpdate) -> Result<()> {
        self.simulate_link().await?;
        let mut tables = self.tables.write().await;
        let name = tables
            .secrets
            .iter()
            .find(|secret| secret.id == id)
            .map(|secret| secret.name.clone())
            .ok_or_else(|| DeviceError::command("set_secret_fields", format!("no such item {}", id)))?;
        if tables.failing_writes.contains(&name) {
            return Err(DeviceError::command(
                "set_secret_fields",
                format!("write rejected for {}", name),
            ));
        }

        if let Some(secret) = tables.secrets.iter_mut().find(|secret| secret.id == id) {
            if let Some(profile) = &update.profile {
                secret.profile = profile.clone();
            }
            if let Some(comment) = &update.comment {
                secret.comment = comment.clone();
            }
        }
        self.secret_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_active_sessions(&self, name_filter: Option<&str>) -> Result<Vec<ActiveSession>> {
        self.simulate_link().await?;
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .iter()
            .filter(|session| name_filter.map_or(true, |name| session.name == name))
            .cloned()
            .collect())
    }

    async fn remove_active_session(&self, id: &str) -> Result<()> {
        self.simulate_link().await?;
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|session| session.id != id);
        if tables.sessions.len() == before {
            return Err(DeviceError::command(
                "remove_active_session",
                format!("no such item {}", id),
            ));
        }
        self.session_removals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.simulate_link().await
    }
}

/// Hands out one shared `MemoryDevice` per router
#[derive(Default)]
pub struct MemoryConnector {
    devices: RwLock<HashMap<Uuid, Arc<MemoryDevice>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The device behind a router, created on first use
    pub async fn device(&self, router_id: Uuid) -> Arc<MemoryDevice> {
        let mut devices = self.devices.write().await;
        Arc::clone(
            devices
                .entry(router_id)
                .or_insert_with(|| Arc::new(MemoryDevice::new())),
        )
    }
}

#[async_trait]
impl DeviceConnector for MemoryConnector {
    async fn connect(&self, router: &RouterConnection) -> Result<Arc<dyn DeviceExecutor>> {
        let device = self.device(router.id).await;
        device.ping().await?;
        Ok(device)
    }
}
