//! Configuration for beats-gen
//!
//! Bootstrap settings come from a TOML file; every key is optional and falls
//! back to a built-in default. Settings cannot change while the service runs.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (`--port`, `--root-folder`, `--database`, `--dev`)
//! 2. Environment variables (`BEATS_GEN_PORT`, `BEATS_ROOT_FOLDER`, ...)
//! 3. TOML configuration file
//! 4. Built-in defaults
//!
//! Relative paths (database, script output directories, working directory)
//! resolve against the root folder.
//!
//! ```toml
//! port = 5730
//! development = false
//!
//! [logging]
//! level = "info"
//!
//! [generation]
//! interpreter = "python3"
//!
//! [generation.midi]
//! script = "server/enhanced-midi-generator.py"
//! output_dir = "storage/midi"
//! timeout_secs = 120
//!
//! [limits]
//! login_max_attempts = 5
//! generations_per_minute = 10
//! ```

use crate::orchestrator::{AudioModelSettings, OrchestratorSettings, ScriptSettings};
use crate::stores::RateLimitPolicy;
use beats_common::config::{load_toml_config, LoggingConfig, RootFolderInitializer, RootFolderResolver};
use beats_common::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Module name used for config file lookup and health responses
pub const MODULE_NAME: &str = "beats-gen";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5730;

/// Upper bound on `session_ttl_hours` (about 100 years)
const MAX_SESSION_TTL_HOURS: u64 = 24 * 365 * 100;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GenConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interface to bind (default loopback)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Root folder for database and generated files
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// SQLite database path (default `<root>/beats.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Development mode: generation errors carry script stderr to clients
    #[serde(default)]
    pub development: bool,

    /// Login session lifetime in hours
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    /// Root folder given on the command line (outranks the environment)
    #[serde(skip)]
    pub cli_root_folder: Option<PathBuf>,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            root_folder: None,
            database_path: None,
            development: false,
            session_ttl_hours: default_session_ttl_hours(),
            logging: LoggingConfig::default(),
            generation: GenerationConfig::default(),
            limits: LimitsConfig::default(),
            cli_root_folder: None,
        }
    }
}

/// `[generation]` table
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GenerationConfig {
    /// Interpreter every script is run with
    #[serde(default = "default_interpreter")]
    pub interpreter: PathBuf,

    /// Working directory for scripts (default: root folder)
    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    #[serde(default)]
    pub midi: MidiScriptConfig,

    #[serde(default)]
    pub audio: AudioScriptConfig,

    #[serde(default)]
    pub voice_clone: VoiceCloneScriptConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            working_directory: None,
            midi: MidiScriptConfig::default(),
            audio: AudioScriptConfig::default(),
            voice_clone: VoiceCloneScriptConfig::default(),
        }
    }
}

/// `[generation.midi]` table
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MidiScriptConfig {
    #[serde(default = "default_midi_script")]
    pub script: PathBuf,
    #[serde(default = "default_midi_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_midi_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MidiScriptConfig {
    fn default() -> Self {
        Self {
            script: default_midi_script(),
            output_dir: default_midi_output_dir(),
            timeout_secs: default_midi_timeout_secs(),
        }
    }
}

/// `[generation.voice_clone]` table
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VoiceCloneScriptConfig {
    #[serde(default = "default_voice_clone_script")]
    pub script: PathBuf,
    #[serde(default = "default_voice_clone_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_voice_clone_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VoiceCloneScriptConfig {
    fn default() -> Self {
        Self {
            script: default_voice_clone_script(),
            output_dir: default_voice_clone_output_dir(),
            timeout_secs: default_voice_clone_timeout_secs(),
        }
    }
}

/// `[generation.audio]` table
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AudioScriptConfig {
    #[serde(default = "default_audio_script")]
    pub script: PathBuf,
    #[serde(default = "default_audio_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_audio_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_inference_steps")]
    pub inference_steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,
}

impl Default for AudioScriptConfig {
    fn default() -> Self {
        Self {
            script: default_audio_script(),
            output_dir: default_audio_output_dir(),
            timeout_secs: default_audio_timeout_secs(),
            model_path: default_model_path(),
            inference_steps: default_inference_steps(),
            guidance_scale: default_guidance_scale(),
        }
    }
}

/// `[limits]` table
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LimitsConfig {
    /// Failed logins allowed per username per window
    #[serde(default = "default_login_max_attempts")]
    pub login_max_attempts: u32,

    #[serde(default = "default_login_window_secs")]
    pub login_window_secs: u64,

    /// Generation requests per user per minute (0 disables)
    #[serde(default = "default_generations_per_minute")]
    pub generations_per_minute: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            login_max_attempts: default_login_max_attempts(),
            login_window_secs: default_login_window_secs(),
            generations_per_minute: default_generations_per_minute(),
        }
    }
}

impl LimitsConfig {
    pub fn login_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_attempts: self.login_max_attempts,
            window: Duration::from_secs(self.login_window_secs),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_session_ttl_hours() -> u64 {
    24 * 7
}

fn default_interpreter() -> PathBuf {
    PathBuf::from("python3")
}

fn default_midi_script() -> PathBuf {
    PathBuf::from("server/enhanced-midi-generator.py")
}

fn default_midi_output_dir() -> PathBuf {
    PathBuf::from("storage/midi/generated")
}

fn default_midi_timeout_secs() -> u64 {
    120
}

fn default_voice_clone_script() -> PathBuf {
    PathBuf::from("server/rvc-integration.py")
}

fn default_voice_clone_output_dir() -> PathBuf {
    PathBuf::from("storage/voices/generated")
}

fn default_voice_clone_timeout_secs() -> u64 {
    300
}

fn default_audio_script() -> PathBuf {
    PathBuf::from("temp-dreamsound-repo/inference_audioldm2.py")
}

fn default_audio_output_dir() -> PathBuf {
    PathBuf::from("storage/music/generated")
}

fn default_audio_timeout_secs() -> u64 {
    600
}

fn default_model_path() -> String {
    AudioModelSettings::default().model_path
}

fn default_inference_steps() -> u32 {
    AudioModelSettings::default().inference_steps
}

fn default_guidance_scale() -> f32 {
    AudioModelSettings::default().guidance_scale
}

fn default_login_max_attempts() -> u32 {
    5
}

fn default_login_window_secs() -> u64 {
    15 * 60
}

fn default_generations_per_minute() -> u32 {
    10
}

/// Values supplied on the command line (or their env fallbacks)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub root_folder: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub development: bool,
}

impl GenConfig {
    /// Load TOML from `path` (missing file gives defaults) and apply overrides
    pub fn load(path: &Path, overrides: ConfigOverrides) -> Result<Self> {
        let config: GenConfig = load_toml_config(path)?;
        Ok(config.with_overrides(overrides))
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(database_path) = overrides.database_path {
            self.database_path = Some(database_path);
        }
        if overrides.root_folder.is_some() {
            self.cli_root_folder = overrides.root_folder;
        }
        self.development |= overrides.development;
        self
    }

    /// Root folder: command line, `BEATS_ROOT_FOLDER`, TOML, then OS default
    pub fn root_folder(&self) -> PathBuf {
        RootFolderResolver::new(MODULE_NAME)
            .with_cli(self.cli_root_folder.clone())
            .with_toml(self.root_folder.clone())
            .resolve()
    }

    /// Database file, resolved against the root folder
    pub fn database_path(&self, root: &RootFolderInitializer) -> PathBuf {
        match &self.database_path {
            Some(path) => root.resolve_path(path),
            None => root.database_path(),
        }
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours.min(MAX_SESSION_TTL_HOURS) as i64)
    }

    /// Orchestrator settings with every relative path made absolute
    pub fn orchestrator_settings(&self, root: &RootFolderInitializer) -> OrchestratorSettings {
        let generation = &self.generation;
        let working_directory = generation
            .working_directory
            .as_deref()
            .map(|dir| root.resolve_path(dir))
            .unwrap_or_else(|| root.root_folder().to_path_buf());

        let script = |path: &Path, output_dir: &Path, timeout_secs: u64| ScriptSettings {
            script: path.to_path_buf(),
            output_dir: root.resolve_path(output_dir),
            timeout: Duration::from_secs(timeout_secs),
        };

        let midi = &generation.midi;
        let audio = &generation.audio;
        let voice_clone = &generation.voice_clone;

        OrchestratorSettings {
            interpreter: generation.interpreter.clone(),
            working_directory,
            midi: script(&midi.script, &midi.output_dir, midi.timeout_secs),
            audio: script(&audio.script, &audio.output_dir, audio.timeout_secs),
            voice_clone: script(
                &voice_clone.script,
                &voice_clone.output_dir,
                voice_clone.timeout_secs,
            ),
            audio_model: AudioModelSettings {
                model_path: audio.model_path.clone(),
                inference_steps: audio.inference_steps,
                guidance_scale: audio.guidance_scale,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config: GenConfig = toml::from_str("").unwrap();
        assert_eq!(config, GenConfig::default());
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.generation.midi.timeout_secs, 120);
        assert_eq!(config.limits.login_max_attempts, 5);
    }

    #[test]
    fn test_partial_tables_keep_other_defaults() {
        let config: GenConfig = toml::from_str(
            r#"
            port = 6000
            development = true

            [generation]
            interpreter = "/opt/venv/bin/python"

            [generation.audio]
            timeout_secs = 30
            guidance_scale = 2.0

            [limits]
            generations_per_minute = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert!(config.development);
        assert_eq!(config.generation.interpreter, PathBuf::from("/opt/venv/bin/python"));
        assert_eq!(config.generation.audio.timeout_secs, 30);
        assert_eq!(config.generation.audio.guidance_scale, 2.0);
        assert_eq!(config.generation.audio.inference_steps, 50);
        assert_eq!(config.generation.midi, MidiScriptConfig::default());
        assert_eq!(config.limits.generations_per_minute, 0);
        assert_eq!(config.limits.login_window_secs, 900);
    }

    #[test]
    fn test_script_tables_fill_missing_keys() {
        let config: GenConfig = toml::from_str(
            r#"
            [generation.midi]
            script = "m.py"

            [generation.voice_clone]
            timeout_secs = 45
            "#,
        )
        .unwrap();

        assert_eq!(config.generation.midi.script, PathBuf::from("m.py"));
        assert_eq!(
            config.generation.midi.output_dir,
            PathBuf::from("storage/midi/generated")
        );
        assert_eq!(config.generation.midi.timeout_secs, 120);
        assert_eq!(
            config.generation.voice_clone.script,
            PathBuf::from("server/rvc-integration.py")
        );
        assert_eq!(config.generation.voice_clone.timeout_secs, 45);
    }

    #[test]
    fn test_overrides_take_priority() {
        let config = GenConfig {
            port: 6000,
            database_path: Some(PathBuf::from("toml.db")),
            ..GenConfig::default()
        }
        .with_overrides(ConfigOverrides {
            port: Some(7000),
            root_folder: Some(PathBuf::from("/srv/beats")),
            database_path: None,
            development: true,
        });

        assert_eq!(config.port, 7000);
        assert_eq!(config.database_path, Some(PathBuf::from("toml.db")));
        assert_eq!(config.cli_root_folder, Some(PathBuf::from("/srv/beats")));
        assert_eq!(config.root_folder(), PathBuf::from("/srv/beats"));
        assert!(config.development);
    }

    #[test]
    fn test_orchestrator_settings_resolve_against_root() {
        let root = RootFolderInitializer::new(PathBuf::from("/srv/beats"));
        let mut config = GenConfig::default();
        config.generation.voice_clone.output_dir = PathBuf::from("/var/voices");

        let settings = config.orchestrator_settings(&root);

        assert_eq!(settings.working_directory, PathBuf::from("/srv/beats"));
        assert_eq!(
            settings.midi.output_dir,
            PathBuf::from("/srv/beats/storage/midi/generated")
        );
        assert_eq!(settings.voice_clone.output_dir, PathBuf::from("/var/voices"));
        assert_eq!(settings.audio.timeout, Duration::from_secs(600));
        assert_eq!(settings.audio_model.model_path, "cvssp/audioldm2-music");
        assert_eq!(
            config.database_path(&root),
            PathBuf::from("/srv/beats/beats.db")
        );
    }

    #[test]
    fn test_session_ttl_is_clamped() {
        let config = GenConfig {
            session_ttl_hours: u64::MAX,
            ..GenConfig::default()
        };
        assert_eq!(
            config.session_ttl(),
            chrono::Duration::hours(MAX_SESSION_TTL_HOURS as i64)
        );
        assert_eq!(GenConfig::default().session_ttl(), chrono::Duration::days(7));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GenConfig::load(
            &dir.path().join("absent.toml"),
            ConfigOverrides {
                port: Some(9999),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_load_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(GenConfig::load(&path, ConfigOverrides::default()).is_err());
    }
}
