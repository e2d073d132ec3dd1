use crate::api::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    postgres_connected: bool,
    database: String,
    static_tenants: usize,
    dynamic_tenants: usize,
    domains: usize,
    uptime_seconds: u64,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let postgres_connected = state.pool.is_connected().await;
    let registry = state.registry.snapshot().await;

    Json(HealthResponse {
        status: if postgres_connected {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        postgres_connected,
        database: state.pool.database().to_string(),
        static_tenants: registry.static_schemas().len(),
        dynamic_tenants: registry.dynamic_schemas().len(),
        domains: registry.domains().len(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
