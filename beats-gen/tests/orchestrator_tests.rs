//! Orchestrator Integration Tests
//! Test File: orchestrator_tests.rs
//!
//! Runs real subprocesses through `Orchestrator::generate` using `sh`
//! scripts in place of the Python generators.

#![cfg(unix)]

use beats_gen::orchestrator::{
    AudioModelSettings, ErrorKind, GenerationKind, Orchestrator, OrchestratorSettings,
    ParamValue, ProcessInvoker, RawParameters, ScriptSettings,
};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Script that writes every `--output`/`--output_file` target it is given
const WRITE_OUTPUT: &str = r#"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output|--output_file) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf 'data' > "$out"
case "$out" in
  *.mid) printf '{}' > "${out%.mid}_metadata.json" ;;
esac
"#;

/// Voice-clone script that ignores `--output`, picks its own file under
/// `storage/voices` and names it in a JSON report on stdout
const RVC_CLONE: &str = r#"
voice=""
while [ $# -gt 0 ]; do
  case "$1" in
    --voice-id) voice="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "INFO:rvc:cloning voice $voice" >&2
mkdir -p storage/voices
printf 'RIFF' > "storage/voices/cloned_${voice}.wav"
printf '{\n  "voice_id": "%s",\n  "audio_path": "storage/voices/cloned_%s.wav",\n  "status": "success"\n}\n' "$voice" "$voice"
"#;

/// Script that records its argv, one argument per line, next to itself
const RECORD_ARGS: &str = r#"
for arg in "$@"; do
  printf '%s\n' "$arg"
done > "$(dirname "$0")/argv.txt"
exit 0
"#;

fn raw(pairs: &[(&str, ParamValue)]) -> RawParameters {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn midi_params(title: &str) -> RawParameters {
    raw(&[
        ("title", title.into()),
        ("theme", "love".into()),
        ("genre", "pop".into()),
        ("tempo", 120i64.into()),
    ])
}

/// Orchestrator whose MIDI kind runs `midi_script` with the given timeout
fn orchestrator(midi_script: &str, timeout: Duration) -> (Orchestrator, TempDir) {
    orchestrator_with_voice_clone(midi_script, RVC_CLONE, timeout)
}

fn orchestrator_with_voice_clone(
    midi_script: &str,
    voice_clone_script: &str,
    timeout: Duration,
) -> (Orchestrator, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("midi.sh");
    std::fs::write(&script_path, midi_script).unwrap();
    std::fs::write(dir.path().join("write.sh"), WRITE_OUTPUT).unwrap();
    std::fs::write(dir.path().join("rvc.sh"), voice_clone_script).unwrap();

    let settings = OrchestratorSettings {
        interpreter: "sh".into(),
        working_directory: dir.path().to_path_buf(),
        midi: ScriptSettings {
            script: script_path,
            output_dir: dir.path().join("out/midi"),
            timeout,
        },
        audio: ScriptSettings {
            script: dir.path().join("write.sh"),
            output_dir: dir.path().join("out/audio"),
            timeout,
        },
        voice_clone: ScriptSettings {
            script: dir.path().join("rvc.sh"),
            output_dir: "out/voices".into(),
            timeout,
        },
        audio_model: AudioModelSettings::default(),
    };

    (Orchestrator::new(settings), dir)
}

/// Script writes both files: success with the sanitized stem
#[tokio::test]
async fn test_midi_success_end_to_end() {
    // Given: a script that writes the .mid and its metadata
    let (orchestrator, dir) = orchestrator(WRITE_OUTPUT, Duration::from_secs(10));

    // When: generating "My Song!!"
    let result = orchestrator
        .generate(GenerationKind::Midi, &midi_params("My Song!!"))
        .await;

    // Then: success with both verified paths
    assert!(result.success(), "unexpected failure: {:?}", result.error_detail());
    assert_eq!(result.error_kind(), None);
    let stem = result.stem().unwrap();
    assert!(stem.starts_with("My_Song_"));

    let paths = result.artifact_paths();
    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0], dir.path().join("out/midi").join(format!("{}.mid", stem)));
    assert_eq!(
        paths[1],
        dir.path().join("out/midi").join(format!("{}_metadata.json", stem))
    );
    assert!(paths.iter().all(|p| p.is_file()));
}

/// Exit 0 without writing anything is artifact-missing, never success
#[tokio::test]
async fn test_zero_exit_without_files_is_artifact_missing() {
    let (orchestrator, _dir) = orchestrator("exit 0\n", Duration::from_secs(10));

    let result = orchestrator
        .generate(GenerationKind::Midi, &midi_params("ghost"))
        .await;

    assert!(!result.success());
    assert_eq!(result.error_kind(), Some(ErrorKind::ArtifactMissing));
    assert!(result.artifact_paths().is_empty());
    assert!(result.error_detail().unwrap().contains(".mid"));
}

/// Writing only the .mid (no metadata sidecar) still fails verification
#[tokio::test]
async fn test_partial_artifacts_fail() {
    let script = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --output) printf 'x' > "$2"; shift 2 ;;
    *) shift ;;
  esac
done
"#;
    let (orchestrator, _dir) = orchestrator(script, Duration::from_secs(10));

    let result = orchestrator
        .generate(GenerationKind::Midi, &midi_params("half"))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::ArtifactMissing));
    assert!(result.error_detail().unwrap().contains("_metadata.json"));
}

/// Non-zero exit carries the script's stderr
#[tokio::test]
async fn test_nonzero_exit_reports_stderr() {
    let (orchestrator, _dir) = orchestrator(
        "echo 'Error: tempo too fast for genre' >&2\nexit 4\n",
        Duration::from_secs(10),
    );

    let result = orchestrator
        .generate(GenerationKind::Midi, &midi_params("x"))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::NonzeroExit));
    assert_eq!(result.error_detail(), Some("Error: tempo too fast for genre"));
}

/// Files written before a failing exit are never reported
#[tokio::test]
async fn test_nonzero_exit_ignores_written_artifacts() {
    let script = format!("{}\nexit 2\n", WRITE_OUTPUT);
    let (orchestrator, dir) = orchestrator(&script, Duration::from_secs(10));

    let result = orchestrator
        .generate(GenerationKind::Midi, &midi_params("written"))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::NonzeroExit));
    assert!(result.artifact_paths().is_empty());
    assert_eq!(result.error_detail(), Some("Generation process exited with code 2"));

    // Both files are on disk; the exit code alone decides
    let stem = result.stem().unwrap();
    let out = dir.path().join("out/midi");
    assert!(out.join(format!("{}.mid", stem)).is_file());
    assert!(out.join(format!("{}_metadata.json", stem)).is_file());
}

/// A hung script is killed and reported as a timeout within timeout + grace
#[tokio::test]
async fn test_timeout_is_enforced() {
    let timeout = Duration::from_millis(300);
    let (orchestrator, _dir) = orchestrator("exec sleep 30\n", timeout);
    let orchestrator = orchestrator.with_invoker(
        ProcessInvoker::new().with_kill_grace(Duration::from_millis(500)),
    );
    let started = Instant::now();

    let result = orchestrator
        .generate(GenerationKind::Midi, &midi_params("slow"))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    assert!(result.error_detail().unwrap().contains("timeout"));
    assert!(started.elapsed() < Duration::from_secs(3));
}

/// Arguments reach the script verbatim, shell metacharacters included
#[tokio::test]
async fn test_arguments_are_not_shell_interpreted() {
    let (orchestrator, dir) = orchestrator(RECORD_ARGS, Duration::from_secs(10));
    let theme = "$(touch pwned); `touch pwned2` && rm -rf ~";

    let mut params = midi_params("x");
    params.insert("theme".to_string(), theme.into());
    orchestrator.generate(GenerationKind::Midi, &params).await;

    let argv = std::fs::read_to_string(dir.path().join("argv.txt")).unwrap();
    let lines: Vec<&str> = argv.lines().collect();
    let idx = lines.iter().position(|l| *l == "--theme").unwrap();
    assert_eq!(lines[idx + 1], theme);
    assert!(!dir.path().join("pwned").exists());
    assert!(!dir.path().join("pwned2").exists());
}

/// Concurrent jobs with identical titles never share a stem or file
#[tokio::test]
async fn test_concurrent_identical_titles_get_distinct_stems() {
    let (orchestrator, _dir) = orchestrator(WRITE_OUTPUT, Duration::from_secs(20));

    let jobs = (0..8).map(|_| {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .generate(GenerationKind::Midi, &midi_params("Same Title"))
                .await
        })
    });
    let results = futures::future::join_all(jobs).await;

    let mut stems: Vec<String> = results
        .into_iter()
        .map(|r| {
            let result = r.unwrap();
            assert!(result.success(), "{:?}", result.error_detail());
            result.stem().unwrap().to_string()
        })
        .collect();
    stems.sort();
    stems.dedup();
    assert_eq!(stems.len(), 8);
}

fn voice_clone_params(voice: &str) -> RawParameters {
    raw(&[
        ("title", "greeting".into()),
        ("voiceReferenceId", voice.into()),
        ("text", "hi".into()),
    ])
}

/// The voice-clone artifact is the file the script reports, resolved
/// against the working directory
#[tokio::test]
async fn test_voice_clone_verifies_reported_artifact() {
    let (orchestrator, dir) = orchestrator("exit 0\n", Duration::from_secs(10));

    let result = orchestrator
        .generate(GenerationKind::VoiceClone, &voice_clone_params("v1"))
        .await;

    assert!(result.success(), "{:?}", result.error_detail());
    assert_eq!(
        result.artifact_paths(),
        &[dir.path().join("storage/voices/cloned_v1.wav")]
    );
    assert!(Path::new(&result.artifact_paths()[0]).is_file());
    assert_eq!(result.report().unwrap()["voice_id"], "v1");
    // Relative output dir is still created under the working directory
    assert!(dir.path().join("out/voices").is_dir());
}

/// A report naming a file that was never written is artifact-missing
#[tokio::test]
async fn test_voice_clone_reported_path_must_exist() {
    let script = r#"printf '{"audio_path": "storage/voices/none.wav", "status": "success"}\n'"#;
    let (orchestrator, _dir) =
        orchestrator_with_voice_clone("exit 0\n", script, Duration::from_secs(10));

    let result = orchestrator
        .generate(GenerationKind::VoiceClone, &voice_clone_params("v1"))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::ArtifactMissing));
    assert!(result.error_detail().unwrap().contains("none.wav"));
}

/// `status: "error"` in the report fails the job even on exit 0
#[tokio::test]
async fn test_voice_clone_reported_error_fails() {
    let script = r#"echo 'ERROR:rvc:Voice cloning failed' >&2
printf '{"voice_id": "v1", "status": "error", "error": "Voice model not found: v1"}\n'
exit 0
"#;
    let (orchestrator, _dir) =
        orchestrator_with_voice_clone("exit 0\n", script, Duration::from_secs(10));

    let result = orchestrator
        .generate(GenerationKind::VoiceClone, &voice_clone_params("v1"))
        .await;

    assert!(!result.success());
    assert_eq!(result.error_kind(), Some(ErrorKind::NonzeroExit));
    assert_eq!(result.error_detail(), Some("Voice model not found: v1"));
    assert!(result.artifact_paths().is_empty());
}

/// Validation failures never start a process
#[tokio::test]
async fn test_validation_failure_skips_process() {
    let (orchestrator, dir) = orchestrator(RECORD_ARGS, Duration::from_secs(10));

    let result = orchestrator
        .generate(GenerationKind::Midi, &raw(&[("title", "only a title".into())]))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
    assert!(!dir.path().join("argv.txt").exists());
}
