//! Invoice generation trigger

use axum::{extract::State, routing::post, Json, Router};
use billing_engine::{AuditEntry, AuditSink, EngineError, InvoiceSummary};
use netbill_core::payment::BillingPeriod;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{engine_error, Caller, RouteError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    month: u32,
    year: i32,
    #[serde(default)]
    router_id: Option<Uuid>,
}

async fn generate_invoices(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<InvoiceSummary>, RouteError> {
    caller.require_operator()?;
    let period = BillingPeriod::new(request.month, request.year)
        .map_err(|err| engine_error(EngineError::from(err)))?;

    let summary = state
        .engine()
        .invoices
        .generate(period, request.router_id, caller.scope)
        .await
        .map_err(engine_error)?;

    state
        .audit_store()
        .record(
            AuditEntry::new(caller.audit_owner(), caller.user.username.clone(), "invoices.generated")
                .with_status("completed")
                .with_detail(json!({
                    "month": summary.month,
                    "year": summary.year,
                    "routerId": request.router_id,
                    "generated": summary.generated,
                    "skipped": summary.skipped,
                    "failed": summary.failed.len(),
                })),
        )
        .await;

    Ok(Json(summary))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/invoices/generate", post(generate_invoices))
}
