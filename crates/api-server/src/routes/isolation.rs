//! Isolation triggers: the manual enforcer run and single-customer restore

use axum::{extract::State, routing::post, Json, Router};
use billing_engine::{AuditEntry, AuditSink, EnforceRequest, OwnerReport, OwnerScope, RestoreOutcome};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{engine_error, Caller, RouteError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct RunResponse {
    report: Vec<OwnerReport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreRequest {
    username: String,
    #[serde(default)]
    owner_id: Option<Uuid>,
}

async fn run_isolation(
    State(state): State<AppState>,
    caller: Caller,
    Json(mut request): Json<EnforceRequest>,
) -> Result<Json<RunResponse>, RouteError> {
    caller.require_operator()?;
    // Tenant callers only ever run their own tenant
    if let OwnerScope::Owner(owner_id) = caller.scope {
        request.specific_owner_id = Some(owner_id);
    }

    let today = chrono::Local::now().date_naive();
    let report = state
        .engine()
        .enforcer
        .enforce(request.clone(), today)
        .await
        .map_err(engine_error)?;

    let isolated: usize = report
        .iter()
        .map(|owner| match owner {
            OwnerReport::Processed { isolated_count, .. } => *isolated_count,
            _ => 0,
        })
        .sum();
    state
        .audit_store()
        .record(
            AuditEntry::new(caller.audit_owner(), caller.user.username.clone(), "isolation.run")
                .with_status("completed")
                .with_detail(json!({
                    "manual": request.manual,
                    "specificOwnerId": request.specific_owner_id,
                    "targetDate": request.target_date,
                    "owners": report.len(),
                    "isolated": isolated,
                })),
        )
        .await;

    Ok(Json(RunResponse { report }))
}

async fn restore_customer(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<RestoreRequest>,
) -> Result<Json<RestoreOutcome>, RouteError> {
    caller.require_operator()?;
    let owner_id = match caller.scope {
        OwnerScope::All => request.owner_id,
        OwnerScope::Owner(owner_id) => Some(owner_id),
    };

    let outcome = state
        .engine()
        .restorer
        .restore_customer(owner_id, request.username.trim())
        .await
        .map_err(engine_error)?;
    Ok(Json(outcome))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/isolation/run", post(run_isolation))
        .route("/api/isolation/restore", post(restore_customer))
}
