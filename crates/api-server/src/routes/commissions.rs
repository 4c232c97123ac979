//! Commission report

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use billing_engine::{CommissionReport, EngineError};
use netbill_core::payment::BillingPeriod;
use serde::Deserialize;

use super::{engine_error, Caller, RouteError};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CommissionQuery {
    #[serde(default)]
    month: Option<u32>,
    #[serde(default)]
    year: Option<i32>,
}

async fn commission_report(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<CommissionQuery>,
) -> Result<Json<CommissionReport>, RouteError> {
    caller.require_operator()?;
    let current = BillingPeriod::containing(chrono::Local::now().date_naive());
    let period = BillingPeriod::new(
        query.month.unwrap_or(current.month),
        query.year.unwrap_or(current.year),
    )
    .map_err(|err| engine_error(EngineError::from(err)))?;

    let report = state
        .engine()
        .commissions
        .aggregate(caller.scope, period)
        .await
        .map_err(engine_error)?;
    Ok(Json(report))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/commissions", get(commission_report))
}
