//! Payment gateway notifications

use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Json, Router};
use billing_engine::reconcile::GatewayOutcome;
use billing_engine::PaymentNotification;
use netbill_core::payment::PaymentStatus;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use super::{engine_error, route_error, RouteError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookResponse {
    status: &'static str,
    payment_id: Uuid,
    payment_status: PaymentStatus,
    outcome: GatewayOutcome,
}

async fn payment_notification(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, RouteError> {
    let notification: PaymentNotification = serde_json::from_slice(&body).map_err(|err| {
        warn!("Rejecting malformed payment notification: {}", err);
        route_error(StatusCode::BAD_REQUEST, format!("Malformed notification: {}", err))
    })?;

    let reconciled = state
        .engine()
        .reconciler
        .reconcile(&notification)
        .await
        .map_err(engine_error)?;

    Ok(Json(WebhookResponse {
        status: "ok",
        payment_id: reconciled.payment.id,
        payment_status: reconciled.payment.status,
        outcome: reconciled.outcome,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/webhooks/payment", post(payment_notification))
}
