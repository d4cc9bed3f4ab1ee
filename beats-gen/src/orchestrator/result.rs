//! Job outcome types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Failure category of a generation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Request parameters were missing or invalid
    Validation,
    /// The process could not be started (or its output dir created)
    ProcessSpawnFailure,
    /// The process exited with a non-zero status
    NonzeroExit,
    /// The process exited 0 but an expected file is absent
    ArtifactMissing,
    /// The process exceeded its timeout and was killed
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::ProcessSpawnFailure => "process-spawn-failure",
            ErrorKind::NonzeroExit => "nonzero-exit",
            ErrorKind::ArtifactMissing => "artifact-missing",
            ErrorKind::Timeout => "timeout",
        }
    }

    /// Detail used when the process left nothing on stderr
    pub fn default_detail(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Request parameters are invalid",
            ErrorKind::ProcessSpawnFailure => "Generation process could not be started",
            ErrorKind::NonzeroExit => "Generation process exited with an error",
            ErrorKind::ArtifactMissing => "Generation process did not produce its output files",
            ErrorKind::Timeout => "Generation process timed out",
        }
    }

    /// Message safe to show to end users outside development mode
    pub fn public_message(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Invalid generation request",
            ErrorKind::Timeout => "Generation took too long and was cancelled",
            _ => "Generation failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one generation job
///
/// A successful result always carries at least one artifact path and no
/// error kind; a failed result always carries an error kind and detail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    success: bool,
    artifact_paths: Vec<PathBuf>,
    error_kind: Option<ErrorKind>,
    error_detail: Option<String>,
    stem: Option<String>,
    /// Normalized title; absent when the request failed validation
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<serde_json::Value>,
}

impl GenerationResult {
    /// Successful result; only built once every artifact is verified
    pub(crate) fn succeeded(artifact_paths: Vec<PathBuf>) -> Self {
        debug_assert!(!artifact_paths.is_empty());
        Self {
            success: true,
            artifact_paths,
            error_kind: None,
            error_detail: None,
            stem: None,
            title: None,
            duration_ms: 0,
            report: None,
        }
    }

    /// Failed result; a blank detail falls back to the kind's default text
    pub fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let detail = if detail.trim().is_empty() {
            kind.default_detail().to_string()
        } else {
            detail
        };
        Self {
            success: false,
            artifact_paths: Vec::new(),
            error_kind: Some(kind),
            error_detail: Some(detail),
            stem: None,
            title: None,
            duration_ms: 0,
            report: None,
        }
    }

    pub fn with_stem(mut self, stem: impl Into<String>) -> Self {
        self.stem = Some(stem.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_report(mut self, report: Option<serde_json::Value>) -> Self {
        self.report = report;
        self
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn artifact_paths(&self) -> &[PathBuf] {
        &self.artifact_paths
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn stem(&self) -> Option<&str> {
        self.stem.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// JSON report the script printed on stdout, if any
    pub fn report(&self) -> Option<&serde_json::Value> {
        self.report.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_with_blank_detail_uses_default() {
        let result = GenerationResult::failed(ErrorKind::NonzeroExit, "  \n");
        assert!(!result.success());
        assert_eq!(result.error_kind(), Some(ErrorKind::NonzeroExit));
        assert_eq!(
            result.error_detail(),
            Some("Generation process exited with an error")
        );
        assert!(result.artifact_paths().is_empty());
    }

    #[test]
    fn test_error_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(ErrorKind::ProcessSpawnFailure).unwrap(),
            "process-spawn-failure"
        );
        assert_eq!(ErrorKind::ArtifactMissing.to_string(), "artifact-missing");
    }

    #[test]
    fn test_serializes_camel_case() {
        let result = GenerationResult::succeeded(vec![PathBuf::from("/out/a.wav")])
            .with_stem("a_1_deadbeef")
            .with_duration_ms(42);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["artifactPaths"][0], "/out/a.wav");
        assert_eq!(json["stem"], "a_1_deadbeef");
        assert_eq!(json["durationMs"], 42);
        assert!(json["errorKind"].is_null());
        assert!(json.get("report").is_none());
    }
}
