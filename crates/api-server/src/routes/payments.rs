//! Checkout and manual payment correction

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use billing_engine::{AuditEntry, AuditSink, CheckoutSession};
use netbill_core::payment::Payment;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::{engine_error, Caller, RouteError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkPaidResponse {
    payment: Payment,
    completed_now: bool,
}

async fn start_checkout(
    State(state): State<AppState>,
    caller: Caller,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<CheckoutSession>, RouteError> {
    let session = state
        .engine()
        .checkout
        .start(payment_id, caller.scope)
        .await
        .map_err(engine_error)?;
    Ok(Json(session))
}

async fn mark_paid(
    State(state): State<AppState>,
    caller: Caller,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<MarkPaidResponse>, RouteError> {
    caller.require_operator()?;
    let change = state
        .engine()
        .payments
        .mark_paid(payment_id, caller.scope)
        .await
        .map_err(engine_error)?;

    if change.completed_now {
        state
            .audit_store()
            .record(
                AuditEntry::new(
                    change.payment.owner_id,
                    caller.user.username.clone(),
                    "payment.marked_paid",
                )
                .with_username(change.payment.username.clone())
                .with_status("completed")
                .with_detail(json!({
                    "paymentId": change.payment.id,
                    "invoiceNumber": change.payment.invoice_number,
                    "amount": change.payment.amount,
                })),
            )
            .await;
    }

    Ok(Json(MarkPaidResponse {
        payment: change.payment,
        completed_now: change.completed_now,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/payments/{id}/checkout", post(start_checkout))
        .route("/api/payments/{id}/mark-paid", post(mark_paid))
}
