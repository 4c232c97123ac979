//! Audit log listing

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use billing_engine::OwnerScope;

use super::{Caller, RouteError};
use crate::audit::{AuditListQuery, AuditListResponse};
use crate::state::AppState;

async fn list_audit(
    State(state): State<AppState>,
    caller: Caller,
    Query(mut query): Query<AuditListQuery>,
) -> Result<Json<AuditListResponse>, RouteError> {
    caller.require_operator()?;
    if let OwnerScope::Owner(owner_id) = caller.scope {
        query.owner_id = Some(owner_id);
    }

    let (items, has_more) = state.audit_store().list_paginated(&query).await;
    let offset = query.offset.unwrap_or(0);
    let next_offset = if has_more {
        Some(offset + items.len())
    } else {
        None
    };

    Ok(Json(AuditListResponse {
        items,
        has_more,
        next_offset,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/audit", get(list_audit))
}
