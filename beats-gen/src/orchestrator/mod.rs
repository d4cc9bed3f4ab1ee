//! Generation job orchestration
//!
//! A generation request flows through four stages:
//!
//! 1. [`request`]: normalize raw parameters into a [`GenerationRequest`]
//! 2. [`invoker`]: run the kind's script as a supervised subprocess
//! 3. [`verifier`]: confirm the expected files exist (zero exit only)
//! 4. [`reconciler`]: classify everything into one [`GenerationResult`]
//!
//! [`Orchestrator::generate`] drives the stages and never returns an error;
//! every failure is a `GenerationResult` with an [`ErrorKind`]. Jobs share
//! no mutable state, so any number may run concurrently.

pub mod command;
pub mod invoker;
pub mod reconciler;
pub mod request;
pub mod result;
pub mod verifier;

pub use command::{JobInvocation, PreparedJob};
pub use invoker::{ProcessInvoker, ProcessOutcome};
pub use request::{
    normalize, parameters_from_json, GenerationKind, GenerationParameters, GenerationRequest,
    ParamValue, RawParameters, ValidationFailure,
};
pub use result::{ErrorKind, GenerationResult};
pub use verifier::ArtifactCheck;

use beats_common::events::{BeatsEvent, EventBus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Script, output location and time limit for one generation kind
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSettings {
    /// Script path passed as the interpreter's first argument
    pub script: PathBuf,
    /// Directory artifacts are written to (relative paths resolve against
    /// the working directory)
    pub output_dir: PathBuf,
    pub timeout: Duration,
}

/// Diffusion model parameters for audio generation
#[derive(Debug, Clone, PartialEq)]
pub struct AudioModelSettings {
    pub model_path: String,
    pub inference_steps: u32,
    pub guidance_scale: f32,
}

impl Default for AudioModelSettings {
    fn default() -> Self {
        Self {
            model_path: "cvssp/audioldm2-music".to_string(),
            inference_steps: 50,
            guidance_scale: 3.5,
        }
    }
}

/// Everything the orchestrator needs to launch jobs
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Interpreter executable (e.g. `python3`)
    pub interpreter: PathBuf,
    /// Working directory for every subprocess
    pub working_directory: PathBuf,
    pub midi: ScriptSettings,
    pub audio: ScriptSettings,
    pub voice_clone: ScriptSettings,
    pub audio_model: AudioModelSettings,
}

impl OrchestratorSettings {
    /// Script settings for a kind
    pub fn script_for(&self, kind: GenerationKind) -> &ScriptSettings {
        match kind {
            GenerationKind::Midi => &self.midi,
            GenerationKind::Audio => &self.audio,
            GenerationKind::VoiceClone => &self.voice_clone,
        }
    }
}

/// Drives generation jobs from raw parameters to a [`GenerationResult`]
#[derive(Clone)]
pub struct Orchestrator {
    settings: Arc<OrchestratorSettings>,
    invoker: ProcessInvoker,
    event_bus: Option<EventBus>,
}

impl Orchestrator {
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            invoker: ProcessInvoker::new(),
            event_bus: None,
        }
    }

    /// Publish lifecycle events to `event_bus`
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_invoker(mut self, invoker: ProcessInvoker) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run one generation job of `kind` from raw parameters
    pub async fn generate(&self, kind: GenerationKind, raw: &RawParameters) -> GenerationResult {
        let job_id = Uuid::new_v4();

        match normalize(kind, raw) {
            Ok(request) => self.run(job_id, &request).await,
            Err(failure) => {
                info!(
                    job_id = %job_id,
                    kind = %kind,
                    missing = ?failure.missing_fields,
                    invalid = failure.invalid_fields.len(),
                    "Generation request rejected"
                );
                let result = GenerationResult::failed(ErrorKind::Validation, failure.to_string());
                self.emit_finished(job_id, kind, &result);
                result
            }
        }
    }

    /// Run an already-normalized request
    pub async fn run(&self, job_id: Uuid, request: &GenerationRequest) -> GenerationResult {
        let kind = request.kind;
        let job = command::prepare(request, &self.settings);

        info!(
            job_id = %job_id,
            kind = %kind,
            stem = %request.stem,
            "Starting generation job"
        );

        self.emit(BeatsEvent::GenerationStarted {
            job_id,
            kind: kind.to_string(),
            stem: request.stem.clone(),
            timestamp: chrono::Utc::now(),
        });

        let result = self
            .execute(&job)
            .await
            .with_stem(request.stem.clone())
            .with_title(request.parameters.title.clone());

        match result.error_kind() {
            None => info!(
                job_id = %job_id,
                kind = %kind,
                artifacts = result.artifact_paths().len(),
                duration_ms = result.duration_ms(),
                "Generation job completed"
            ),
            Some(error_kind) => warn!(
                job_id = %job_id,
                kind = %kind,
                error_kind = %error_kind,
                detail = result.error_detail().unwrap_or_default(),
                duration_ms = result.duration_ms(),
                "Generation job failed"
            ),
        }

        self.emit_finished(job_id, kind, &result);
        result
    }

    async fn execute(&self, job: &PreparedJob) -> GenerationResult {
        if let Err(e) = tokio::fs::create_dir_all(&job.output_dir).await {
            error!(
                output_dir = %job.output_dir.display(),
                error = %e,
                "Cannot create output directory"
            );
            return GenerationResult::failed(
                ErrorKind::ProcessSpawnFailure,
                format!(
                    "could not create output directory {}: {}",
                    job.output_dir.display(),
                    e
                ),
            );
        }

        let outcome = self.invoker.invoke(&job.invocation).await;

        // Files are only meaningful after a clean exit
        let checks = outcome.exited_cleanly().then(|| {
            let report = outcome.stdout_json();
            verifier::verify(&job.artifacts_to_verify(report.as_ref()))
        });

        reconciler::reconcile(&outcome, checks.as_deref())
    }

    fn emit_finished(&self, job_id: Uuid, kind: GenerationKind, result: &GenerationResult) {
        let event = match result.error_kind() {
            None => BeatsEvent::GenerationCompleted {
                job_id,
                kind: kind.to_string(),
                artifact_paths: result
                    .artifact_paths()
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
                duration_ms: result.duration_ms(),
                timestamp: chrono::Utc::now(),
            },
            Some(error_kind) => BeatsEvent::GenerationFailed {
                job_id,
                kind: kind.to_string(),
                error_kind: error_kind.to_string(),
                duration_ms: result.duration_ms(),
                timestamp: chrono::Utc::now(),
            },
        };
        self.emit(event);
    }

    fn emit(&self, event: BeatsEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &std::path::Path) -> OrchestratorSettings {
        let script = |name: &str| ScriptSettings {
            script: PathBuf::from(name),
            output_dir: dir.join("out"),
            timeout: Duration::from_secs(5),
        };
        OrchestratorSettings {
            interpreter: PathBuf::from("/nonexistent/interpreter"),
            working_directory: dir.to_path_buf(),
            midi: script("midi.py"),
            audio: script("audio.py"),
            voice_clone: script("rvc.py"),
            audio_model: AudioModelSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_validation_failure_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(settings(dir.path()));

        let result = orchestrator
            .generate(GenerationKind::Midi, &RawParameters::new())
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
        assert!(result
            .error_detail()
            .unwrap()
            .contains("title, theme, genre, tempo"));
        // Output dir is only created for dispatched jobs
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(settings(dir.path()));
        let raw: RawParameters = [
            ("title", ParamValue::from("x")),
            ("voiceReferenceId", ParamValue::from("v")),
            ("text", ParamValue::from("hello")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let result = orchestrator.generate(GenerationKind::VoiceClone, &raw).await;

        assert_eq!(result.error_kind(), Some(ErrorKind::ProcessSpawnFailure));
        assert!(result.stem().unwrap().starts_with("x_"));
    }

    #[tokio::test]
    async fn test_events_emitted_for_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let orchestrator = Orchestrator::new(settings(dir.path())).with_event_bus(bus);
        let raw: RawParameters = [
            ("title", ParamValue::from("x")),
            ("prompt", ParamValue::from("p")),
            ("durationSeconds", ParamValue::from(10i64)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        orchestrator.generate(GenerationKind::Audio, &raw).await;

        let started = rx.recv().await.unwrap();
        assert_eq!(started.event_type(), "GenerationStarted");
        let finished = rx.recv().await.unwrap();
        assert_eq!(finished.event_type(), "GenerationFailed");
        assert_eq!(started.job_id(), finished.job_id());
    }
}
