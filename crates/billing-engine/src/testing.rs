//! Shared fixtures for engine tests

use std::sync::Arc;
use std::time::Duration;

use device_link::{DeviceRegistry, MemoryConnector, MemoryDevice, RegistryConfig};
use netbill_core::customer::{Customer, ServicePlan};
use netbill_core::ledger::{FileLedgerStore, LedgerStore};
use netbill_core::payment::{BillingPeriod, Payment, PaymentStatus};
use netbill_core::tenant::{GatewayCredentials, RouterConnection, User, UserRole};
use tempfile::TempDir;

use crate::audit::recording::RecordingAuditSink;
use crate::locks::KeyedLocks;

pub const SERVER_KEY: &str = "SB-Mid-server-test";

pub struct Fixture {
    pub ledger: Arc<FileLedgerStore>,
    pub connector: Arc<MemoryConnector>,
    pub registry: Arc<DeviceRegistry>,
    pub locks: Arc<KeyedLocks>,
    pub audit: Arc<RecordingAuditSink>,
    _temp_dir: TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let ledger = FileLedgerStore::new(temp_dir.path().join("ledger.json"))
            .await
            .unwrap();
        let connector = Arc::new(MemoryConnector::new());
        let registry = DeviceRegistry::new(
            connector.clone(),
            RegistryConfig {
                command_timeout: Duration::from_millis(500),
                max_connection_age: Duration::from_secs(60),
            },
        );

        Self {
            ledger: Arc::new(ledger),
            connector,
            registry: Arc::new(registry),
            locks: Arc::new(KeyedLocks::new()),
            audit: Arc::new(RecordingAuditSink::default()),
            _temp_dir: temp_dir,
        }
    }

    /// A top-level tenant with a router and gateway keys
    pub async fn tenant(&self, name: &str, isolation_day: Option<u32>) -> (User, RouterConnection) {
        let mut owner = User::new(name, UserRole::Admin);
        if let Some(day) = isolation_day {
            owner = owner.with_auto_isolation(day);
        }
        let owner = self.ledger.save_user(owner).await.unwrap();

        let router = self
            .ledger
            .save_router(
                RouterConnection::new(owner.id, format!("{}-core", name), "memory://core")
                    .with_credentials("api", "secret"),
            )
            .await
            .unwrap();

        self.ledger
            .save_gateway_credentials(GatewayCredentials {
                owner_id: owner.id,
                server_key: SERVER_KEY.to_string(),
                client_key: "SB-Mid-client-test".to_string(),
                is_production: false,
            })
            .await
            .unwrap();

        (owner, router)
    }

    pub async fn device(&self, router: &RouterConnection) -> Arc<MemoryDevice> {
        self.connector.device(router.id).await
    }

    /// A customer on a priced plan
    pub async fn customer(&self, owner: &User, username: &str, plan: &str) -> Customer {
        if self.ledger.find_plan(owner.id, plan).await.unwrap().is_none() {
            self.ledger
                .save_plan(ServicePlan::new(owner.id, plan, 150_000))
                .await
                .unwrap();
        }
        self.ledger
            .save_customer(Customer::new(username, username, owner.id, plan))
            .await
            .unwrap()
    }

    /// A completed payment for the period
    pub async fn paid(&self, owner: &User, username: &str, period: BillingPeriod) -> Payment {
        self.ledger
            .insert_payment(
                Payment::pending(username, owner.id, 150_000, period)
                    .with_status(PaymentStatus::Completed),
            )
            .await
            .unwrap()
    }
}
