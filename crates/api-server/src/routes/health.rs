//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::config::DeviceMode;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    data_dir: String,
    device_mode: DeviceMode,
    device_connections: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = state.config();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data_dir: config.data_dir.to_string_lossy().to_string(),
        device_mode: config.device_mode,
        device_connections: state.registry().connection_count().await,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use crate::routes::test_support::{build_state, json_body, request};

    #[tokio::test]
    async fn health_reports_device_mode() {
        let env = build_state().await;
        let response = super::router()
            .with_state(env.state.clone())
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let payload = json_body(response).await;
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["deviceMode"], "memory");
        assert_eq!(payload["deviceConnections"], 0);
    }
}
