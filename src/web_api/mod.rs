//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - Canonical event ingest (acknowledge first, deliver on a separate task)
//! - Health check

mod routes;

pub use routes::{create_router, decode_ingest, ingest_event};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        cameras: state.directory.len().await,
        live_motion_groups: state.frame_buffer.live_groups().await,
    };

    Json(response)
}
