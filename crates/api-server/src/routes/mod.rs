//! Route handlers

pub mod audit;
pub mod commissions;
pub mod health;
pub mod invoices;
pub mod isolation;
pub mod payments;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_support;

use axum::{extract::FromRequestParts, http::request::Parts, http::StatusCode, Json};
use billing_engine::{EngineError, OwnerScope};
use netbill_core::tenant::{User, UserRole};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::state::AppState;

pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type RouteError = (StatusCode, Json<ErrorResponse>);

pub fn route_error(status: StatusCode, message: impl Into<String>) -> RouteError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map an engine failure onto an HTTP status
pub fn engine_error(err: EngineError) -> RouteError {
    let status = match &err {
        EngineError::CustomerNotFound { .. }
        | EngineError::SecretNotFound { .. }
        | EngineError::PaymentNotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::SignatureMismatch { .. } => StatusCode::FORBIDDEN,
        EngineError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        EngineError::Ledger(netbill_core::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
        EngineError::Ledger(netbill_core::Error::Conflict(_)) => StatusCode::CONFLICT,
        EngineError::Ledger(
            netbill_core::Error::NotFound(_)
            | netbill_core::Error::PaymentNotFound(_)
            | netbill_core::Error::CustomerNotFound(_),
        ) => StatusCode::NOT_FOUND,
        EngineError::Device(_) | EngineError::Gateway { .. } => StatusCode::BAD_GATEWAY,
        EngineError::Config { .. } | EngineError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(error = %err, "Request failed");
    } else {
        warn!(error = %err, "Request rejected");
    }
    route_error(status, err.to_string())
}

pub fn internal_error(message: impl Into<String>) -> RouteError {
    route_error(StatusCode::INTERNAL_SERVER_ERROR, message)
}

/// The authenticated user making the request, and the tenants they may touch
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: User,
    pub scope: OwnerScope,
}

impl Caller {
    /// Tenant used for audit records written on the caller's behalf
    pub fn audit_owner(&self) -> Uuid {
        self.scope.owner_id().unwrap_or(self.user.id)
    }

    /// Reject callers that only earn commissions
    pub fn require_operator(&self) -> Result<(), RouteError> {
        match self.user.role {
            UserRole::Superadmin | UserRole::Admin | UserRole::Manager | UserRole::Staff => Ok(()),
            role => Err(route_error(
                StatusCode::FORBIDDEN,
                format!("Role '{}' may not perform this action", role.as_str()),
            )),
        }
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = RouteError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or_else(|| route_error(StatusCode::UNAUTHORIZED, "Missing or invalid user id"))?;

        let user = state
            .ledger()
            .get_user(user_id)
            .await
            .map_err(|err| internal_error(err.to_string()))?
            .ok_or_else(|| route_error(StatusCode::UNAUTHORIZED, "Unknown user"))?;

        let scope = OwnerScope::for_caller(&user)
            .map_err(|err| route_error(StatusCode::FORBIDDEN, err.to_string()))?;

        Ok(Self { user, scope })
    }
}
