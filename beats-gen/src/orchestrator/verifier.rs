//! Artifact verification
//!
//! A zero exit is not trusted on its own: every expected output file must
//! exist as a regular file before a job counts as successful.

use serde::Serialize;
use std::path::PathBuf;

/// Existence check for one expected artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactCheck {
    pub path: PathBuf,
    pub exists: bool,
}

/// Check each expected path, preserving order
pub fn verify(expected: &[PathBuf]) -> Vec<ArtifactCheck> {
    expected
        .iter()
        .map(|path| ArtifactCheck {
            path: path.clone(),
            exists: std::fs::metadata(path)
                .map(|meta| meta.is_file())
                .unwrap_or(false),
        })
        .collect()
}
