use axum::{extract::State, http::StatusCode, Json};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

use mediamill_core::registry::{EngineEntry, FormatPair};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub runner_running: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        runner_running: state.runner().is_running(),
    })
}

#[derive(Serialize)]
pub struct FormatsResponse {
    /// Every conversion some engine supports.
    pub pairs: Vec<FormatPair>,
    pub engines: Vec<EngineEntry>,
}

pub async fn list_formats(State(state): State<Arc<AppState>>) -> Json<FormatsResponse> {
    let registry = state.registry();
    Json(FormatsResponse {
        pairs: registry.supported_pairs(),
        engines: registry.entries().to_vec(),
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.metrics().gather(), &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
