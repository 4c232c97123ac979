//! Application state

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use billing_engine::{AuditSink, BillingEngine, CheckoutGateway, SnapClient};
use device_link::{DeviceConnector, DeviceRegistry, MemoryConnector, RegistryConfig, RestConnector};
use netbill_core::ledger::{FileLedgerStore, LedgerStore};

use crate::audit::AuditStore;
use crate::config::{DeviceMode, ServerConfig};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    ledger: Arc<dyn LedgerStore>,
    registry: Arc<DeviceRegistry>,
    engine: BillingEngine,
    audit_store: Arc<AuditStore>,
}

impl AppState {
    /// Open the stores under the data directory and connect the engine
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let ledger_path = config.data_dir.join("ledger.json");
        let ledger = FileLedgerStore::new(ledger_path.clone())
            .await
            .with_context(|| format!("Failed to open ledger at {}", ledger_path.display()))?;

        let connector: Arc<dyn DeviceConnector> = match config.device_mode {
            DeviceMode::Memory => Arc::new(MemoryConnector::new()),
            DeviceMode::Rest => Arc::new(
                RestConnector::new(config.device_timeout)
                    .context("Failed to build device HTTP client")?,
            ),
        };

        let gateway = SnapClient::new(
            config.gateway_sandbox_url.clone(),
            config.gateway_production_url.clone(),
            Duration::from_secs(15),
        )
        .context("Failed to build payment gateway client")?;

        Self::with_components(config, Arc::new(ledger), connector, Arc::new(gateway)).await
    }

    /// Assemble state around externally built components
    pub async fn with_components(
        config: ServerConfig,
        ledger: Arc<dyn LedgerStore>,
        connector: Arc<dyn DeviceConnector>,
        gateway: Arc<dyn CheckoutGateway>,
    ) -> anyhow::Result<Self> {
        let audit_dir = config.data_dir.join("audit");
        let audit_store = Arc::new(
            AuditStore::new(audit_dir.clone())
                .await
                .with_context(|| format!("Failed to open audit log at {}", audit_dir.display()))?,
        );

        let registry = Arc::new(DeviceRegistry::new(
            connector,
            RegistryConfig {
                command_timeout: config.device_timeout,
                ..RegistryConfig::default()
            },
        ));

        let audit: Arc<dyn AuditSink> = audit_store.clone();
        let engine = BillingEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&registry),
            gateway,
            audit,
            config.engine_config(),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                ledger,
                registry,
                engine,
                audit_store,
            }),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.inner.ledger
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    pub fn engine(&self) -> &BillingEngine {
        &self.inner.engine
    }

    pub fn audit_store(&self) -> &Arc<AuditStore> {
        &self.inner.audit_store
    }
}
