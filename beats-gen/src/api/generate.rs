//! Generation endpoints
//!
//! `POST /api/generate/{midi|audio|voice-clone}` runs one job to completion
//! and maps its [`GenerationResult`] onto the HTTP response:
//!
//! - success: 200 with artifact paths
//! - validation failure: 400
//! - any other failure: 500
//!
//! Outside development mode, process failures carry a generic message per
//! error kind instead of script stderr.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use serde::Serialize;
use std::path::Path as FsPath;
use tracing::{error, info};

use super::auth::AuthUser;
use crate::db::generations::record_generation;
use crate::error::{ApiError, ApiResult};
use crate::orchestrator::{
    parameters_from_json, ErrorKind, GenerationKind, GenerationResult, RawParameters,
};
use crate::AppState;

/// Body of a generation response
#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum GenerationResponse {
    Success(GenerationSuccess),
    Failure(GenerationFailure),
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSuccess {
    pub success: bool,
    pub kind: GenerationKind,
    pub stem: Option<String>,
    pub artifact_paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationFailure {
    pub success: bool,
    pub error: String,
    pub error_kind: ErrorKind,
}

impl GenerationResponse {
    /// Build the response body for `result`
    ///
    /// `development` exposes the reconciler's error detail verbatim.
    pub fn from_result(kind: GenerationKind, result: &GenerationResult, development: bool) -> Self {
        match result.error_kind() {
            None => {
                let paths: Vec<String> = result
                    .artifact_paths()
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                let find = |predicate: fn(&FsPath) -> bool| {
                    result
                        .artifact_paths()
                        .iter()
                        .find(|p| predicate(p))
                        .map(|p| p.display().to_string())
                };

                GenerationResponse::Success(GenerationSuccess {
                    success: true,
                    kind,
                    stem: result.stem().map(str::to_string),
                    artifact_paths: paths,
                    midi_path: find(|p| has_extension(p, "mid")),
                    metadata_path: find(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.ends_with("_metadata.json"))
                    }),
                    audio_path: find(|p| has_extension(p, "wav")),
                    duration_ms: result.duration_ms(),
                    report: result.report().cloned(),
                })
            }
            Some(error_kind) => {
                let error = if development || error_kind == ErrorKind::Validation {
                    result
                        .error_detail()
                        .unwrap_or(error_kind.default_detail())
                        .to_string()
                } else {
                    error_kind.public_message().to_string()
                };

                GenerationResponse::Failure(GenerationFailure {
                    success: false,
                    error,
                    error_kind,
                })
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GenerationResponse::Success(_) => StatusCode::OK,
            GenerationResponse::Failure(f) if f.error_kind == ErrorKind::Validation => {
                StatusCode::BAD_REQUEST
            }
            GenerationResponse::Failure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GenerationResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

fn has_extension(path: &FsPath, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// POST /api/generate/:kind
pub async fn generate(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<serde_json::Map<String, serde_json::Value>>, JsonRejection>,
) -> ApiResult<GenerationResponse> {
    let kind: GenerationKind = kind
        .parse()
        .map_err(|e: String| ApiError::NotFound(e))?;

    if let Err(retry_after) = state.throttle.check(user.user_id) {
        info!(user_id = %user.user_id, kind = %kind, "Generation throttled");
        return Err(ApiError::TooManyRequests {
            message: "Generation rate limit reached, try again shortly".to_string(),
            retry_after,
        });
    }

    let result = match request_parameters(body) {
        Ok(params) => state.orchestrator.generate(kind, &params).await,
        Err(detail) => {
            info!(
                user_id = %user.user_id,
                kind = %kind,
                detail = %detail,
                "Generation body rejected"
            );
            GenerationResult::failed(ErrorKind::Validation, detail)
        }
    };

    let title = result.title().unwrap_or_default();
    if let Err(e) = record_generation(&state.db, user.user_id, kind, title, &result).await {
        // History is best-effort; the job itself already finished
        error!(user_id = %user.user_id, error = %e, "Failed to record generation");
    }

    Ok(GenerationResponse::from_result(
        kind,
        &result,
        state.policy.development,
    ))
}

/// Primitive parameters from the request body, or a validation message
fn request_parameters(
    body: Result<Json<serde_json::Map<String, serde_json::Value>>, JsonRejection>,
) -> Result<RawParameters, String> {
    let Json(body) = body.map_err(|rejection| {
        format!("Request body must be a JSON object: {}", rejection.body_text())
    })?;
    parameters_from_json(body).map_err(|failure| failure.to_string())
}

/// Build generation routes
pub fn generate_routes() -> Router<AppState> {
    Router::new().route("/api/generate/:kind", post(generate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::reconciler::reconcile;
    use crate::orchestrator::{ArtifactCheck, ProcessOutcome};
    use std::path::PathBuf;

    fn success_result() -> GenerationResult {
        let outcome = ProcessOutcome {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 10,
            timed_out: false,
        };
        let checks = [
            ArtifactCheck {
                path: PathBuf::from("/out/song_1_abcd1234.mid"),
                exists: true,
            },
            ArtifactCheck {
                path: PathBuf::from("/out/song_1_abcd1234_metadata.json"),
                exists: true,
            },
        ];
        reconcile(&outcome, Some(&checks)).with_stem("song_1_abcd1234")
    }

    #[test]
    fn test_success_response_names_paths() {
        let response = GenerationResponse::from_result(GenerationKind::Midi, &success_result(), false);
        assert_eq!(response.status(), StatusCode::OK);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["kind"], "midi");
        assert_eq!(json["midiPath"], "/out/song_1_abcd1234.mid");
        assert_eq!(json["metadataPath"], "/out/song_1_abcd1234_metadata.json");
        assert!(json.get("audioPath").is_none());
        assert_eq!(json["artifactPaths"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_failure_hides_detail_outside_development() {
        let result = GenerationResult::failed(
            ErrorKind::NonzeroExit,
            "Traceback: /home/deploy/secret/path.py line 3",
        );

        let prod = GenerationResponse::from_result(GenerationKind::Audio, &result, false);
        assert_eq!(prod.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = serde_json::to_value(&prod).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Generation failed");
        assert_eq!(json["errorKind"], "nonzero-exit");

        let dev = GenerationResponse::from_result(GenerationKind::Audio, &result, true);
        let json = serde_json::to_value(&dev).unwrap();
        assert!(json["error"].as_str().unwrap().contains("Traceback"));
    }

    #[test]
    fn test_validation_failure_always_lists_fields() {
        let result = GenerationResult::failed(
            ErrorKind::Validation,
            "Missing required fields: theme, genre",
        );
        let response = GenerationResponse::from_result(GenerationKind::Midi, &result, false);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"], "Missing required fields: theme, genre");
        assert_eq!(json["errorKind"], "validation");
    }
}
