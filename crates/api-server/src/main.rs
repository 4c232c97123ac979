//! API Server for the netbill engine
//!
//! Serves the billing triggers and the payment webhook over REST, and runs
//! the restore outbox worker, the device health checker and the daily
//! isolation scheduler.

mod audit;
mod config;
mod routes;
mod scheduler;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "api_server=debug,billing_engine=debug,device_link=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("Using data directory: {:?}", config.data_dir);
    tracing::info!("Device mode: {:?}", config.device_mode);

    let app_state = AppState::new(config.clone())
        .await
        .context("Failed to initialize application state")?;

    billing_engine::start_restore_worker(Arc::clone(&app_state.engine().outbox));
    device_link::start_health_checker(Arc::clone(app_state.registry()), Duration::from_secs(60));
    if config.scheduler_enabled {
        scheduler::start_isolation_scheduler(app_state.clone());
    } else {
        tracing::info!("Isolation scheduler disabled");
    }

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::webhooks::router())
        .merge(routes::isolation::router())
        .merge(routes::invoices::router())
        .merge(routes::commissions::router())
        .merge(routes::payments::router())
        .merge(routes::audit::router())
        .with_state(app_state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("REST API listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
