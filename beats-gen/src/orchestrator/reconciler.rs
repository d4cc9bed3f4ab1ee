//! Maps a process outcome and artifact checks to a [`GenerationResult`]
//!
//! Pure: no I/O, so every classification rule is testable in isolation.
//!
//! | exit code | artifacts        | result                   |
//! |-----------|------------------|--------------------------|
//! | none      | -                | timeout / spawn failure  |
//! | non-zero  | -                | nonzero-exit             |
//! | 0         | report `status: "error"` | nonzero-exit     |
//! | 0         | any missing/none | artifact-missing         |
//! | 0         | all present      | success                  |

use super::invoker::ProcessOutcome;
use super::result::{ErrorKind, GenerationResult};
use super::verifier::ArtifactCheck;

/// Maximum bytes of stderr carried into an error detail
pub const DETAIL_LIMIT: usize = 4096;

/// Classify a finished job
///
/// `artifacts` is `None` when verification did not run (non-zero exit).
pub fn reconcile(outcome: &ProcessOutcome, artifacts: Option<&[ArtifactCheck]>) -> GenerationResult {
    let stderr = stderr_tail(&outcome.stderr);
    let report = outcome.stdout_json();

    let result = match (outcome.exit_code, reported_failure(report.as_ref())) {
        (None, _) => {
            let kind = if outcome.timed_out {
                ErrorKind::Timeout
            } else {
                ErrorKind::ProcessSpawnFailure
            };
            GenerationResult::failed(kind, stderr)
        }
        (Some(0), Some(message)) => GenerationResult::failed(ErrorKind::NonzeroExit, message),
        (Some(0), None) => match artifacts {
            Some(checks) if !checks.is_empty() => {
                let missing: Vec<String> = checks
                    .iter()
                    .filter(|check| !check.exists)
                    .map(|check| check.path.display().to_string())
                    .collect();

                if missing.is_empty() {
                    GenerationResult::succeeded(
                        checks.iter().map(|check| check.path.clone()).collect(),
                    )
                } else if stderr.is_empty() {
                    GenerationResult::failed(
                        ErrorKind::ArtifactMissing,
                        format!("Process exited 0 but did not write: {}", missing.join(", ")),
                    )
                } else {
                    GenerationResult::failed(ErrorKind::ArtifactMissing, stderr)
                }
            }
            _ => GenerationResult::failed(
                ErrorKind::ArtifactMissing,
                "No output files were verified for this job",
            ),
        },
        (Some(code), _) => {
            if stderr.is_empty() {
                GenerationResult::failed(
                    ErrorKind::NonzeroExit,
                    format!("Generation process exited with code {}", code),
                )
            } else {
                GenerationResult::failed(ErrorKind::NonzeroExit, stderr)
            }
        }
    };

    result
        .with_duration_ms(outcome.duration_ms)
        .with_report(report)
}

/// Failure message from a report whose `status` is `"error"`
fn reported_failure(report: Option<&serde_json::Value>) -> Option<String> {
    let report = report?;
    if report.get("status").and_then(serde_json::Value::as_str) != Some("error") {
        return None;
    }
    let message = report
        .get("error")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .unwrap_or("Generation script reported an error");
    Some(message.to_string())
}

/// Trimmed stderr, keeping at most the last [`DETAIL_LIMIT`] bytes
fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= DETAIL_LIMIT {
        return trimmed.to_string();
    }

    let mut start = trimmed.len() - DETAIL_LIMIT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
