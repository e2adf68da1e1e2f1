use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::clients::health::HealthChecker;
use crate::ingest::{Dispatcher, process_batch};
use crate::models::envelope::TransportBatch;
use crate::models::health::HealthStatus;

pub struct AppState {
    pub health_checker: HealthChecker,
    pub dispatcher: Dispatcher,
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ingest", post(ingest_batch))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Transport adapter for inbound notification batches. The response lists
/// only the failed record ids; the transport redelivers exactly those.
async fn ingest_batch(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<TransportBatch>,
) -> impl IntoResponse {
    let response = process_batch(&state.dispatcher, &batch).await;
    (StatusCode::OK, Json(response))
}
