//! Command line construction for each generation kind
//!
//! Every script is invoked as `<interpreter> <script> --flag value ...` with
//! arguments passed as separate argv entries. Nothing here is ever joined
//! into a shell string.

use super::request::{GenerationKind, GenerationRequest};
use super::OrchestratorSettings;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Report field the voice-clone script uses to name the file it wrote
pub const VOICE_CLONE_ARTIFACT_KEY: &str = "audio_path";

/// Fully specified subprocess invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInvocation {
    /// Executable (the configured interpreter)
    pub command: PathBuf,
    /// Argument vector, script path first
    pub arguments: Vec<String>,
    pub working_directory: PathBuf,
    #[serde(serialize_with = "serialize_millis")]
    pub timeout: Duration,
    pub started_at: DateTime<Utc>,
}

impl JobInvocation {
    /// Command line for logging (never executed)
    pub fn display(&self) -> String {
        let mut line = self.command.display().to_string();
        for arg in &self.arguments {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("{:?}", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Invocation plus the files it must leave behind
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedJob {
    pub invocation: JobInvocation,
    /// Directory that must exist before the process starts
    pub output_dir: PathBuf,
    /// Files verified after a zero exit, primary artifact first
    pub expected_artifacts: Vec<PathBuf>,
    /// Stdout report field naming the artifact, for scripts that choose
    /// their own output path
    pub reported_artifact: Option<&'static str>,
}

impl PreparedJob {
    /// Files to verify once the process has exited 0
    ///
    /// A reported artifact that is missing from the report yields no paths,
    /// which reconciles to `artifact-missing`. Relative paths resolve
    /// against the working directory.
    pub fn artifacts_to_verify(&self, report: Option<&serde_json::Value>) -> Vec<PathBuf> {
        let Some(key) = self.reported_artifact else {
            return self.expected_artifacts.clone();
        };
        report
            .and_then(|report| report.get(key))
            .and_then(serde_json::Value::as_str)
            .filter(|path| !path.trim().is_empty())
            .map(|path| vec![absolutize(Path::new(path), &self.invocation.working_directory)])
            .unwrap_or_default()
    }
}

/// Build the invocation and expected artifacts for a normalized request
pub fn prepare(request: &GenerationRequest, settings: &OrchestratorSettings) -> PreparedJob {
    let script = settings.script_for(request.kind);
    let output_dir = absolutize(&script.output_dir, &settings.working_directory);
    let params = &request.parameters;
    let stem = &request.stem;

    let mut arguments = vec![script.script.display().to_string()];
    let mut reported_artifact = None;
    let expected_artifacts = match request.kind {
        GenerationKind::Midi => {
            let midi_path = output_dir.join(format!("{}.mid", stem));
            let metadata_path = output_dir.join(format!("{}_metadata.json", stem));

            push_flag(&mut arguments, "--title", &params.title);
            push_flag(&mut arguments, "--theme", params.theme.as_deref().unwrap_or_default());
            push_flag(&mut arguments, "--genre", params.genre.as_deref().unwrap_or_default());
            push_flag(
                &mut arguments,
                "--tempo",
                &params.tempo.unwrap_or_default().to_string(),
            );
            push_flag(&mut arguments, "--output", &midi_path.display().to_string());
            if let Some(duration) = params.duration_seconds {
                push_flag(&mut arguments, "--duration", &duration.to_string());
            }
            if let Some(voice_id) = &params.voice_reference_id {
                push_flag(&mut arguments, "--voice-id", voice_id);
            }

            vec![midi_path, metadata_path]
        }
        GenerationKind::Audio => {
            let audio_path = output_dir.join(format!("{}.wav", stem));
            let model = &settings.audio_model;

            push_flag(&mut arguments, "--prompt", params.prompt.as_deref().unwrap_or_default());
            push_flag(&mut arguments, "--model_path", &model.model_path);
            push_flag(&mut arguments, "--output_file", &audio_path.display().to_string());
            push_flag(
                &mut arguments,
                "--audio_length_in_s",
                &params.duration_seconds.unwrap_or_default().to_string(),
            );
            push_flag(
                &mut arguments,
                "--num_inference_steps",
                &model.inference_steps.to_string(),
            );
            push_flag(&mut arguments, "--guidance_scale", &model.guidance_scale.to_string());

            vec![audio_path]
        }
        GenerationKind::VoiceClone => {
            push_flag(&mut arguments, "--action", "clone");
            push_flag(
                &mut arguments,
                "--voice-id",
                params.voice_reference_id.as_deref().unwrap_or_default(),
            );
            push_flag(&mut arguments, "--text", params.text.as_deref().unwrap_or_default());
            push_flag(&mut arguments, "--output", &output_dir.display().to_string());

            // The script picks the file name and reports it on stdout
            reported_artifact = Some(VOICE_CLONE_ARTIFACT_KEY);
            Vec::new()
        }
    };

    PreparedJob {
        invocation: JobInvocation {
            command: settings.interpreter.clone(),
            arguments,
            working_directory: settings.working_directory.clone(),
            timeout: script.timeout,
            started_at: Utc::now(),
        },
        output_dir,
        expected_artifacts,
        reported_artifact,
    }
}

fn push_flag(arguments: &mut Vec<String>, flag: &str, value: &str) {
    arguments.push(flag.to_string());
    arguments.push(value.to_string());
}

/// Output paths are handed to a process running in `working_directory`
/// and then checked from this process, so both must agree on them.
fn absolutize(path: &Path, working_directory: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_directory.join(path)
    }
}
