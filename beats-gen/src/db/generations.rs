//! Generation history
//!
//! One row per generation request that reached the orchestrator, successful
//! or not.

use crate::orchestrator::{GenerationKind, GenerationResult};
use beats_common::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Stored generation outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub id: Uuid,
    pub kind: String,
    pub title: String,
    pub stem: Option<String>,
    pub success: bool,
    pub error_kind: Option<String>,
    /// Not exposed over HTTP; may contain script stderr
    #[serde(skip)]
    pub error_detail: Option<String>,
    pub artifact_paths: Vec<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Persist the outcome of one generation job for `user_id`
pub async fn record_generation(
    pool: &SqlitePool,
    user_id: Uuid,
    kind: GenerationKind,
    title: &str,
    result: &GenerationResult,
) -> Result<GenerationRecord> {
    let record = GenerationRecord {
        id: Uuid::new_v4(),
        kind: kind.to_string(),
        title: title.to_string(),
        stem: result.stem().map(str::to_string),
        success: result.success(),
        error_kind: result.error_kind().map(|k| k.to_string()),
        error_detail: result.error_detail().map(str::to_string),
        artifact_paths: result
            .artifact_paths()
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        duration_ms: result.duration_ms(),
        created_at: Utc::now(),
    };

    let artifact_paths = serde_json::to_string(&record.artifact_paths)
        .map_err(|e| Error::Internal(format!("Failed to serialize artifact paths: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO generations (
            id, user_id, kind, title, stem, success,
            error_kind, error_detail, artifact_paths, duration_ms, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(user_id.to_string())
    .bind(&record.kind)
    .bind(&record.title)
    .bind(&record.stem)
    .bind(record.success)
    .bind(&record.error_kind)
    .bind(&record.error_detail)
    .bind(&artifact_paths)
    .bind(record.duration_ms as i64)
    .bind(record.created_at.to_rfc3339_opts(SecondsFormat::Millis, true))
    .execute(pool)
    .await?;

    Ok(record)
}

/// Most recent generations for `user_id`, newest first
pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: Uuid,
    limit: u32,
) -> Result<Vec<GenerationRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, kind, title, stem, success, error_kind, error_detail,
               artifact_paths, duration_ms, created_at
        FROM generations
        WHERE user_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(user_id.to_string())
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

fn record_from_row(row: &SqliteRow) -> Result<GenerationRecord> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Failed to parse generation id: {}", e)))?;

    let artifact_paths: String = row.get("artifact_paths");
    let artifact_paths: Vec<String> = serde_json::from_str(&artifact_paths)
        .map_err(|e| Error::Internal(format!("Failed to deserialize artifact paths: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&Utc);

    let duration_ms: i64 = row.get("duration_ms");

    Ok(GenerationRecord {
        id,
        kind: row.get("kind"),
        title: row.get("title"),
        stem: row.get("stem"),
        success: row.get("success"),
        error_kind: row.get("error_kind"),
        error_detail: row.get("error_detail"),
        artifact_paths,
        duration_ms: duration_ms.max(0) as u64,
        created_at,
    })
}
