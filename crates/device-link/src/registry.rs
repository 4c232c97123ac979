//! Device Registry - owns the per-tenant device connections
//!
//! Connections are opened lazily, reused until they age out, and evicted when a
//! health check fails. Every command goes through a `DeviceHandle`, which
//! serializes commands on one connection and bounds each call with a timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use netbill_core::tenant::RouterConnection;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DeviceError, Result};
use crate::executor::{ActiveSession, DeviceExecutor, DeviceSecret, SecretUpdate};

/// Opens executors for a router's connection settings
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, router: &RouterConnection) -> Result<Arc<dyn DeviceExecutor>>;
}

/// Configuration for the device registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Upper bound for a single device command, including the wait for the connection
    pub command_timeout: Duration,
    /// Connections older than this are reopened
    pub max_connection_age: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            max_connection_age: Duration::from_secs(15 * 60),
        }
    }
}

/// A serialized, time-bounded view of one device connection
#[derive(Clone)]
pub struct DeviceHandle {
    router_id: Uuid,
    owner_id: Uuid,
    executor: Arc<dyn DeviceExecutor>,
    command_lock: Arc<Mutex<()>>,
    timeout: Duration,
}

impl DeviceHandle {
    pub fn new(router: &RouterConnection, executor: Arc<dyn DeviceExecutor>, timeout: Duration) -> Self {
        Self {
            router_id: router.id,
            owner_id: router.owner_id,
            executor,
            command_lock: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    pub fn router_id(&self) -> Uuid {
        self.router_id
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    async fn run<T, F>(&self, command: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let lock = Arc::clone(&self.command_lock);
        let guarded = async move {
            let _guard = lock.lock().await;
            call.await
        };
        match tokio::time::timeout(self.timeout, guarded).await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout {
                command,
                millis: self.timeout.as_millis() as u64,
            }),
        }
    }

    pub async fn list_secrets(&self) -> Result<Vec<DeviceSecret>> {
        self.run("list_secrets", self.executor.list_secrets()).await
    }

    pub async fn find_secret(&self, name: &str) -> Result<Option<DeviceSecret>> {
        self.run("find_secret", self.executor.find_secret(name)).await
    }

    pub async fn set_secret_fields(&self, id: &str, update: &SecretUpdate) -> Result<()> {
        self.run("set_secret_fields", self.executor.set_secret_fields(id, update))
            .await
    }

    pub async fn list_active_sessions(&self, name_filter: Option<&str>) -> Result<Vec<ActiveSession>> {
        self.run(
            "list_active_sessions",
            self.executor.list_active_sessions(name_filter),
        )
        .await
    }

    pub async fn remove_active_session(&self, id: &str) -> Result<()> {
        self.run("remove_active_session", self.executor.remove_active_session(id))
            .await
    }

    /// Disconnect every session of one subscriber, returning how many were dropped
    pub async fn kick_sessions(&self, name: &str) -> Result<usize> {
        let sessions = self.list_active_sessions(Some(name)).await?;
        let mut removed = 0;
        for session in sessions.iter().filter(|session| session.name == name) {
            self.remove_active_session(&session.id).await?;
            removed += 1;
        }
        Ok(removed)
    }

    pub async fn ping(&self) -> Result<()> {
        self.run("ping", self.executor.ping()).await
    }
}

struct CachedConnection {
    handle: DeviceHandle,
    settings: RouterConnection,
    opened_at: Instant,
}

/// Registry of open device connections keyed by router id
pub struct DeviceRegistry {
    connector: Arc<dyn DeviceConnector>,
    config: RegistryConfig,
    connections: RwLock<HashMap<Uuid, CachedConnection>>,
}

impl DeviceRegistry {
    pub fn new(connector: Arc<dyn DeviceConnector>, config: RegistryConfig) -> Self {
        Self {
            connector,
            config,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Get a handle for the router, opening a connection if needed
    pub async fn handle_for(&self, router: &RouterConnection) -> Result<DeviceHandle> {
        {
            let connections = self.connections.read().await;
            if let Some(cached) = connections.get(&router.id) {
                if cached.settings == *router
                    && cached.opened_at.elapsed() < self.config.max_connection_age
                {
                    return Ok(cached.handle.clone());
                }
            }
        }

        let executor = match tokio::time::timeout(
            self.config.command_timeout,
            self.connector.connect(router),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(DeviceError::Timeout {
                    command: "connect",
                    millis: self.config.command_timeout.as_millis() as u64,
                })
            }
        };

        let handle = DeviceHandle::new(router, executor, self.config.command_timeout);
        let mut connections = self.connections.write().await;
        if connections.contains_key(&router.id) {
            debug!("Replacing connection for router {}", router.name);
        } else {
            info!("Opened connection to router {} ({})", router.name, router.id);
        }
        connections.insert(
            router.id,
            CachedConnection {
                handle: handle.clone(),
                settings: router.clone(),
                opened_at: Instant::now(),
            },
        );
        Ok(handle)
    }

    /// Drop a cached connection
    pub async fn evict(&self, router_id: Uuid) -> bool {
        self.connections.write().await.remove(&router_id).is_some()
    }

    /// Ping every cached connection and drop the ones that are stale or failing
    pub async fn check_health(&self) -> usize {
        let snapshot: Vec<(Uuid, DeviceHandle, Instant)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .map(|(id, cached)| (*id, cached.handle.clone(), cached.opened_at))
                .collect()
        };

        let mut evicted = 0;
        for (router_id, handle, opened_at) in snapshot {
            let reason = if opened_at.elapsed() >= self.config.max_connection_age {
                Some("connection expired".to_string())
            } else {
                handle.ping().await.err().map(|err| err.to_string())
            };

            if let Some(reason) = reason {
                warn!("Evicting router connection {}: {}", router_id, reason);
                if self.evict(router_id).await {
                    evicted += 1;
                }
            }
        }
        evicted
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

/// Periodically health-check the registry's connections
pub fn start_health_checker(registry: Arc<DeviceRegistry>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            registry.check_health().await;
        }
    });
}
