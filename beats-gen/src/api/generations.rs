//! Generation history endpoint

use axum::{extract::State, routing::get, Extension, Json, Router};
use serde::Serialize;

use super::auth::AuthUser;
use crate::db::generations::{list_for_user, GenerationRecord};
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct GenerationHistory {
    pub generations: Vec<GenerationRecord>,
}

/// GET /api/generations
///
/// The caller's most recent generations, newest first.
pub async fn list_generations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<GenerationHistory>> {
    let generations = list_for_user(&state.db, user.user_id, state.policy.history_limit).await?;
    Ok(Json(GenerationHistory { generations }))
}

/// Build generation history routes
pub fn generation_history_routes() -> Router<AppState> {
    Router::new().route("/api/generations", get(list_generations))
}
