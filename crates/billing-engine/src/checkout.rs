//! Gateway checkout - assigns an order id and asks the gateway for a payment page

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use netbill_core::ledger::LedgerStore;
use netbill_core::tenant::GatewayCredentials;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::payments::PaymentService;
use crate::scope::OwnerScope;

pub const SANDBOX_URL: &str = "https://app.sandbox.midtrans.com";
pub const PRODUCTION_URL: &str = "https://app.midtrans.com";

/// What the customer needs to pay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub order_id: String,
    pub gross_amount: i64,
    pub customer_name: String,
    pub customer_phone: Option<String>,
}

/// A payment page issued by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub payment_id: Uuid,
    pub order_id: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayToken {
    pub token: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

/// Payment page provider
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn create_transaction(
        &self,
        credentials: &GatewayCredentials,
        request: &CheckoutRequest,
    ) -> Result<GatewayToken>;
}

/// Snap transactions API client
pub struct SnapClient {
    client: Client,
    sandbox_url: String,
    production_url: String,
}

impl SnapClient {
    pub fn new(
        sandbox_url: impl Into<String>,
        production_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| EngineError::gateway_with_source("Failed to build HTTP client", err))?;
        Ok(Self {
            client,
            sandbox_url: sandbox_url.into(),
            production_url: production_url.into(),
        })
    }

    fn transactions_url(&self, credentials: &GatewayCredentials) -> String {
        let base = if credentials.is_production {
            &self.production_url
        } else {
            &self.sandbox_url
        };
        format!("{}/snap/v1/transactions", base.trim_end_matches('/'))
    }
}

#[async_trait]
impl CheckoutGateway for SnapClient {
    async fn create_transaction(
        &self,
        credentials: &GatewayCredentials,
        request: &CheckoutRequest,
    ) -> Result<GatewayToken> {
        let body = json!({
            "transaction_details": {
                "order_id": request.order_id,
                "gross_amount": request.gross_amount,
            },
            "customer_details": {
                "first_name": request.customer_name,
                "phone": request.customer_phone,
            },
        });

        let response = self
            .client
            .post(self.transactions_url(credentials))
            .basic_auth(&credentials.server_key, Some(""))
            .json(&body)
            .send()
            .await
            .map_err(|err| EngineError::gateway_with_source("Checkout request failed", err))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::gateway(format!(
                "Gateway returned HTTP {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }

        response
            .json::<GatewayToken>()
            .await
            .map_err(|err| EngineError::gateway_with_source("Unexpected checkout response", err))
    }
}

pub struct CheckoutService {
    ledger: Arc<dyn LedgerStore>,
    payments: Arc<PaymentService>,
    gateway: Arc<dyn CheckoutGateway>,
}

impl CheckoutService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        payments: Arc<PaymentService>,
        gateway: Arc<dyn CheckoutGateway>,
    ) -> Self {
        Self {
            ledger,
            payments,
            gateway,
        }
    }

    /// Give the invoice a fresh order id and request a payment page for it.
    ///
    /// The order id is stored before the gateway call so a notification for it
    /// can always be matched.
    pub async fn start(&self, payment_id: Uuid, scope: OwnerScope) -> Result<CheckoutSession> {
        let mut payment = self.payments.get_scoped(payment_id, scope).await?;
        if payment.is_completed() {
            return Err(EngineError::invalid_input(format!(
                "Invoice {} is already paid",
                payment.invoice_number
            )));
        }

        let credentials = self
            .ledger
            .gateway_credentials(payment.owner_id)
            .await?
            .ok_or_else(|| {
                EngineError::config(format!(
                    "Tenant {} has no payment gateway credentials",
                    payment.owner_id
                ))
            })?;
        let customer = self
            .ledger
            .find_customer(Some(payment.owner_id), &payment.username)
            .await?;

        let order_id = format!("{}-{}", payment.invoice_number, Utc::now().timestamp_millis());
        payment.order_id = Some(order_id.clone());
        let payment = self.ledger.update_payment(payment).await?;
        debug!(payment_id = %payment.id, order_id = %order_id, "Order id assigned");

        let request = CheckoutRequest {
            order_id: order_id.clone(),
            gross_amount: payment.amount,
            customer_name: customer
                .as_ref()
                .map(|customer| customer.name.clone())
                .unwrap_or_else(|| payment.username.clone()),
            customer_phone: customer.and_then(|customer| customer.phone),
        };
        let token = self.gateway.create_transaction(&credentials, &request).await?;

        info!(payment_id = %payment.id, order_id = %order_id, "Checkout started");
        Ok(CheckoutSession {
            payment_id: payment.id,
            order_id,
            token: token.token,
            redirect_url: token.redirect_url,
        })
    }
}
