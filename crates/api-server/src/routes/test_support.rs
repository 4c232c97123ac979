//! Shared state builder for route tests

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, Response},
};
use billing_engine::checkout::{CheckoutRequest, GatewayToken};
use billing_engine::{CheckoutGateway, Result as EngineResult};
use device_link::{MemoryConnector, MemoryDevice};
use netbill_core::customer::{Customer, ServicePlan};
use netbill_core::ledger::{FileLedgerStore, LedgerStore};
use netbill_core::payment::{BillingPeriod, Payment, PaymentStatus};
use netbill_core::tenant::{GatewayCredentials, RouterConnection, User, UserRole};
use serde_json::Value;
use tempfile::TempDir;

use crate::config::{DeviceMode, ServerConfig};
use crate::routes::USER_HEADER;
use crate::state::AppState;

pub const SERVER_KEY: &str = "SB-Mid-server-route-test";

pub struct StubGateway;

#[async_trait]
impl CheckoutGateway for StubGateway {
    async fn create_transaction(
        &self,
        _credentials: &GatewayCredentials,
        request: &CheckoutRequest,
    ) -> EngineResult<GatewayToken> {
        Ok(GatewayToken {
            token: format!("snap-{}", request.order_id),
            redirect_url: Some(format!("https://pay.test/{}", request.order_id)),
        })
    }
}

pub struct TestEnv {
    pub state: AppState,
    pub connector: Arc<MemoryConnector>,
    _temp_dir: TempDir,
}

pub async fn build_state() -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let config = ServerConfig {
        data_dir: temp_dir.path().to_path_buf(),
        device_mode: DeviceMode::Memory,
        scheduler_enabled: false,
        ..ServerConfig::default()
    };
    let ledger = FileLedgerStore::new(temp_dir.path().join("ledger.json"))
        .await
        .unwrap();
    let connector = Arc::new(MemoryConnector::new());
    let state = AppState::with_components(
        config,
        Arc::new(ledger),
        connector.clone(),
        Arc::new(StubGateway),
    )
    .await
    .unwrap();

    TestEnv {
        state,
        connector,
        _temp_dir: temp_dir,
    }
}

impl TestEnv {
    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        self.state.ledger()
    }

    pub async fn superadmin(&self) -> User {
        self.ledger()
            .save_user(User::new("root", UserRole::Superadmin))
            .await
            .unwrap()
    }

    /// A tenant with a router, gateway keys and the given isolation day
    pub async fn tenant(&self, name: &str, isolation_day: Option<u32>) -> (User, Arc<MemoryDevice>) {
        let mut owner = User::new(name, UserRole::Admin).with_commission_percent(10);
        if let Some(day) = isolation_day {
            owner = owner.with_auto_isolation(day);
        }
        let owner = self.ledger().save_user(owner).await.unwrap();
        let router = self
            .ledger()
            .save_router(RouterConnection::new(
                owner.id,
                format!("{}-core", name),
                "memory://core",
            ))
            .await
            .unwrap();
        self.ledger()
            .save_gateway_credentials(GatewayCredentials {
                owner_id: owner.id,
                server_key: SERVER_KEY.to_string(),
                client_key: "SB-Mid-client-route-test".to_string(),
                is_production: false,
            })
            .await
            .unwrap();

        let device = self.connector.device(router.id).await;
        (owner, device)
    }

    pub async fn staff_of(&self, owner: &User, name: &str, role: UserRole) -> User {
        self.ledger()
            .save_user(User::new(name, role).with_owner(owner.id))
            .await
            .unwrap()
    }

    pub async fn customer(&self, owner: &User, username: &str, plan: &str) -> Customer {
        if self.ledger().find_plan(owner.id, plan).await.unwrap().is_none() {
            self.ledger()
                .save_plan(ServicePlan::new(owner.id, plan, 150_000))
                .await
                .unwrap();
        }
        self.ledger()
            .save_customer(Customer::new(username, username, owner.id, plan))
            .await
            .unwrap()
    }

    pub async fn invoice(
        &self,
        owner: &User,
        username: &str,
        period: BillingPeriod,
        status: PaymentStatus,
    ) -> Payment {
        self.ledger()
            .insert_payment(Payment::pending(username, owner.id, 150_000, period).with_status(status))
            .await
            .unwrap()
    }
}

/// The billing period handlers use for "now"
pub fn current_period() -> BillingPeriod {
    BillingPeriod::containing(chrono::Local::now().date_naive())
}

pub fn request(method: &str, uri: &str, caller: Option<&User>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder.header(USER_HEADER, caller.id.to_string());
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn json_body(response: Response<Body>) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}
