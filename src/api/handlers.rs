use std::sync::Arc;

use anyhow::Context;
use axum::{extract::rejection::JsonRejection, extract::State, Json};

use crate::api::models::{
    GenerateRequest, GenerateResponse, HealthResponse, RecommendationResponse,
};
use crate::app_state::AppState;
use crate::error::AppError;
use crate::llm::GenerationOptions;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.generator.model_name().to_string(),
    })
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    let Json(payload) = payload?;
    tracing::info!(
        prompt_bytes = payload.prompt.len(),
        max_length = ?payload.max_length,
        "generate request"
    );

    // Request fields override the checkpoint's decoding defaults.
    let defaults = state.generator.default_options();
    let options = GenerationOptions {
        max_length: payload
            .max_length
            .unwrap_or(state.default_max_length)
            .clamp(1, state.max_length_limit),
        temperature: payload.temperature.or(defaults.temperature),
        top_p: payload.top_p.or(defaults.top_p),
        seed: payload.seed.unwrap_or(defaults.seed),
    };

    let generator = Arc::clone(&state.generator);
    let prompt = payload.prompt;
    let response = tokio::task::spawn_blocking(move || generator.generate(&prompt, &options))
        .await
        .context("generation task panicked")??;

    tracing::debug!(response_chars = response.len(), "generate response");

    Ok(Json(GenerateResponse { response }))
}

pub async fn latest_recommendation(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RecommendationResponse>, AppError> {
    state
        .recommendations
        .latest()
        .await
        .map(|r| Json(r.into()))
        .ok_or_else(|| AppError::NotFound("No recommendation has been generated yet".to_string()))
}
