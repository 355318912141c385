use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::api::models::{GenerateResponse, PromptRequest, ValidationErrorResponse};
use crate::app_state::{AppState, HealthReport};
use crate::error::{GenerateError, PromptError};
use crate::prompt::Prompt;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.health())
}

/// `GET /api/generate/?prompt=...`
pub async fn generate_from_query(
    State(state): State<Arc<AppState>>,
    Query(request): Query<PromptRequest>,
) -> Result<Json<GenerateResponse>, PromptError> {
    generate(state, request.prompt).await
}

/// `POST /api/generate/` with `{"prompt": "..."}`
pub async fn generate_from_body(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PromptRequest>,
) -> Result<Json<GenerateResponse>, PromptError> {
    generate(state, request.prompt).await
}

async fn generate(state: Arc<AppState>, raw_prompt: String) -> Result<Json<GenerateResponse>, PromptError> {
    let prompt = Prompt::parse(raw_prompt)?;
    info!(chars = prompt.as_str().chars().count(), "generate request");

    // The forward pass is CPU/GPU bound; keep it off the async workers.
    let result = tokio::task::spawn_blocking(move || state.generate(&prompt))
        .await
        .unwrap_or_else(|e| Err(GenerateError::Inference(format!("inference task failed: {e}"))));

    Ok(Json(GenerateResponse::from(result)))
}

impl IntoResponse for PromptError {
    fn into_response(self) -> Response {
        let body = ValidationErrorResponse {
            detail: self.to_string(),
        };
        (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
    }
}
