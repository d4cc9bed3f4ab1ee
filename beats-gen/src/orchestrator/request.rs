//! Job request normalization
//!
//! Turns a loosely-typed parameter map (as received from HTTP) into an
//! immutable [`GenerationRequest`]. This is the only place request
//! parameters are validated: downstream stages trust what comes out of here.
//!
//! Validation is all-or-nothing. Presence of every required field is checked
//! first; if anything is missing, the failure lists exactly the missing
//! fields and no range checks are reported. Only a complete request is
//! coerced and range-checked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tempo range in BPM (inclusive)
pub const TEMPO_RANGE: (u32, u32) = (1, 400);

/// Audio clip duration range in seconds (inclusive)
pub const AUDIO_DURATION_RANGE: (u32, u32) = (5, 30);

/// MIDI duration range in seconds (inclusive)
pub const MIDI_DURATION_RANGE: (u32, u32) = (5, 600);

/// Maximum title length in characters (before sanitizing)
pub const MAX_TITLE_CHARS: usize = 200;

/// Maximum prompt / text length in characters
pub const MAX_TEXT_CHARS: usize = 2000;

/// Maximum sanitized title length used in file stems
const MAX_STEM_TITLE_CHARS: usize = 64;

/// Stem used when a title has no usable characters
const FALLBACK_TITLE: &str = "untitled";

/// Kind of generation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationKind {
    /// MIDI composition via the MIDI generator script
    Midi,
    /// Audio clip via the diffusion model script
    Audio,
    /// Speech in a cloned voice via the voice conversion script
    VoiceClone,
}

impl GenerationKind {
    /// All kinds, in routing order
    pub const ALL: [GenerationKind; 3] = [
        GenerationKind::Midi,
        GenerationKind::Audio,
        GenerationKind::VoiceClone,
    ];

    /// Wire name (`midi`, `audio`, `voice-clone`)
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Midi => "midi",
            GenerationKind::Audio => "audio",
            GenerationKind::VoiceClone => "voice-clone",
        }
    }

    /// Required parameter names, in the order they are reported when missing
    pub fn required_fields(&self) -> &'static [Field] {
        match self {
            GenerationKind::Midi => &[Field::Title, Field::Theme, Field::Genre, Field::Tempo],
            GenerationKind::Audio => &[Field::Title, Field::Prompt, Field::DurationSeconds],
            GenerationKind::VoiceClone => {
                &[Field::Title, Field::VoiceReferenceId, Field::Text]
            }
        }
    }

    fn duration_range(&self) -> (u32, u32) {
        match self {
            GenerationKind::Audio => AUDIO_DURATION_RANGE,
            _ => MIDI_DURATION_RANGE,
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "midi" => Ok(GenerationKind::Midi),
            "audio" => Ok(GenerationKind::Audio),
            "voice-clone" | "voice_clone" => Ok(GenerationKind::VoiceClone),
            other => Err(format!("Unknown generation kind: {}", other)),
        }
    }
}

/// Request parameter known to the normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Theme,
    Genre,
    Tempo,
    DurationSeconds,
    VoiceReferenceId,
    Prompt,
    Text,
}

impl Field {
    /// Canonical (camelCase) name, as reported in validation failures
    pub fn name(&self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Theme => "theme",
            Field::Genre => "genre",
            Field::Tempo => "tempo",
            Field::DurationSeconds => "durationSeconds",
            Field::VoiceReferenceId => "voiceReferenceId",
            Field::Prompt => "prompt",
            Field::Text => "text",
        }
    }

    /// Accepted keys, canonical name first
    fn keys(&self) -> &'static [&'static str] {
        match self {
            Field::Title => &["title"],
            Field::Theme => &["theme"],
            Field::Genre => &["genre"],
            Field::Tempo => &["tempo"],
            Field::DurationSeconds => &["durationSeconds", "duration_seconds", "duration"],
            Field::VoiceReferenceId => &[
                "voiceReferenceId",
                "voice_reference_id",
                "voiceId",
                "voice_id",
            ],
            Field::Prompt => &["prompt"],
            Field::Text => &["text"],
        }
    }
}

/// Primitive parameter value as received on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value as f64)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Raw request parameters (a JSON object on the wire)
pub type RawParameters = BTreeMap<String, ParamValue>;

/// One field that was present but unusable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidField {
    pub field: String,
    pub reason: String,
}

/// Why a request could not be normalized
#[derive(Debug, Clone, PartialEq, Eq, Default, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{}", self.describe())]
pub struct ValidationFailure {
    /// Required fields that were absent, null or blank
    pub missing_fields: Vec<&'static str>,
    /// Fields that were present but failed coercion or range checks
    pub invalid_fields: Vec<InvalidField>,
}

impl ValidationFailure {
    fn is_empty(&self) -> bool {
        self.missing_fields.is_empty() && self.invalid_fields.is_empty()
    }

    fn invalid(&mut self, field: Field, reason: impl Into<String>) {
        self.invalid_fields.push(InvalidField {
            field: field.name().to_string(),
            reason: reason.into(),
        });
    }

    /// Human-readable summary naming every offending field
    pub fn describe(&self) -> String {
        if !self.missing_fields.is_empty() {
            return format!(
                "Missing required fields: {}",
                self.missing_fields.join(", ")
            );
        }
        let parts: Vec<String> = self
            .invalid_fields
            .iter()
            .map(|f| format!("{} ({})", f.field, f.reason))
            .collect();
        format!("Invalid fields: {}", parts.join("; "))
    }
}

/// Convert a JSON object body into [`RawParameters`]
///
/// Parameters are primitives only. Every key holding an array or object is
/// reported as an invalid field, under the key the client sent.
pub fn parameters_from_json(
    body: serde_json::Map<String, serde_json::Value>,
) -> Result<RawParameters, ValidationFailure> {
    use serde_json::Value;

    let mut raw = RawParameters::new();
    let mut failure = ValidationFailure::default();

    for (key, value) in body {
        let value = match value {
            Value::Null => ParamValue::Null,
            Value::Bool(b) => ParamValue::Bool(b),
            Value::Number(n) => match n.as_f64() {
                Some(n) => ParamValue::Number(n),
                None => {
                    failure.invalid_fields.push(InvalidField {
                        field: key,
                        reason: "number out of range".to_string(),
                    });
                    continue;
                }
            },
            Value::String(s) => ParamValue::Text(s),
            Value::Array(_) | Value::Object(_) => {
                failure.invalid_fields.push(InvalidField {
                    field: key,
                    reason: "must be a string, number, boolean or null".to_string(),
                });
                continue;
            }
        };
        raw.insert(key, value);
    }

    if failure.is_empty() {
        Ok(raw)
    } else {
        Err(failure)
    }
}

/// Canonical, validated request parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParameters {
    pub title: String,
    /// Title restricted to `[A-Za-z0-9_]`, safe for file names
    pub sanitized_title: String,
    pub theme: Option<String>,
    pub genre: Option<String>,
    pub tempo: Option<u32>,
    pub duration_seconds: Option<u32>,
    pub voice_reference_id: Option<String>,
    pub prompt: Option<String>,
    pub text: Option<String>,
}

/// Immutable unit of work produced by [`normalize`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    pub parameters: GenerationParameters,
    /// Unique output file stem: `{sanitizedTitle}_{epochMillis}_{suffix}`
    pub stem: String,
    pub requested_at: DateTime<Utc>,
}

/// Validate and canonicalize a generation request
pub fn normalize(
    kind: GenerationKind,
    raw: &RawParameters,
) -> Result<GenerationRequest, ValidationFailure> {
    normalize_at(kind, raw, Utc::now(), &unique_suffix())
}

/// [`normalize`] with an explicit clock reading and stem suffix
pub fn normalize_at(
    kind: GenerationKind,
    raw: &RawParameters,
    now: DateTime<Utc>,
    suffix: &str,
) -> Result<GenerationRequest, ValidationFailure> {
    // Presence first: a request missing anything is never partially validated
    let missing: Vec<&'static str> = kind
        .required_fields()
        .iter()
        .filter(|field| lookup(raw, **field).is_none())
        .map(|field| field.name())
        .collect();

    if !missing.is_empty() {
        return Err(ValidationFailure {
            missing_fields: missing,
            invalid_fields: Vec::new(),
        });
    }

    let mut failure = ValidationFailure::default();

    let title = text_field(raw, Field::Title, MAX_TITLE_CHARS, &mut failure);
    let theme = text_field(raw, Field::Theme, MAX_TEXT_CHARS, &mut failure);
    let genre = text_field(raw, Field::Genre, MAX_TEXT_CHARS, &mut failure);
    let voice_reference_id =
        text_field(raw, Field::VoiceReferenceId, MAX_TITLE_CHARS, &mut failure);
    let prompt = text_field(raw, Field::Prompt, MAX_TEXT_CHARS, &mut failure);
    let text = text_field(raw, Field::Text, MAX_TEXT_CHARS, &mut failure);
    let tempo = number_field(raw, Field::Tempo, TEMPO_RANGE, &mut failure);
    let duration_seconds =
        number_field(raw, Field::DurationSeconds, kind.duration_range(), &mut failure);

    if !failure.is_empty() {
        return Err(failure);
    }

    // Title is required for every kind, so presence was checked above
    let title = title.unwrap_or_default();
    let sanitized_title = sanitize_title(&title);
    let stem = format!("{}_{}_{}", sanitized_title, now.timestamp_millis(), suffix);

    Ok(GenerationRequest {
        kind,
        parameters: GenerationParameters {
            title,
            sanitized_title,
            theme,
            genre,
            tempo,
            duration_seconds,
            voice_reference_id,
            prompt,
            text,
        },
        stem,
        requested_at: now,
    })
}

/// Restrict a free-text title to `[A-Za-z0-9_]`
///
/// Each run of other characters becomes a single `_`; leading and trailing
/// separators are dropped. Titles with nothing usable become `untitled`.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len().min(MAX_STEM_TITLE_CHARS));
    let mut pending_separator = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c);
        } else {
            pending_separator = true;
        }
        if out.len() >= MAX_STEM_TITLE_CHARS {
            break;
        }
    }

    // Output is ASCII, so byte truncation is safe
    out.truncate(MAX_STEM_TITLE_CHARS);
    let trimmed = out.trim_end_matches('_');

    if trimmed.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Random 8-hex-character suffix that keeps same-millisecond stems distinct
pub fn unique_suffix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// First usable value among a field's accepted keys
///
/// Null and blank strings count as absent.
fn lookup(raw: &RawParameters, field: Field) -> Option<&ParamValue> {
    field
        .keys()
        .iter()
        .filter_map(|key| raw.get(*key))
        .find(|value| match value {
            ParamValue::Null => false,
            ParamValue::Text(s) => !s.trim().is_empty(),
            _ => true,
        })
}

fn text_field(
    raw: &RawParameters,
    field: Field,
    max_chars: usize,
    failure: &mut ValidationFailure,
) -> Option<String> {
    let value = match lookup(raw, field)? {
        ParamValue::Text(s) => s.trim().to_string(),
        ParamValue::Number(n) if n.is_finite() => format_number(*n),
        ParamValue::Number(_) => {
            failure.invalid(field, "must be a finite number or text");
            return None;
        }
        ParamValue::Bool(_) => {
            failure.invalid(field, "must be text");
            return None;
        }
        ParamValue::Null => return None,
    };

    if value.chars().count() > max_chars {
        failure.invalid(field, format!("must be at most {} characters", max_chars));
        return None;
    }

    Some(value)
}

fn number_field(
    raw: &RawParameters,
    field: Field,
    (min, max): (u32, u32),
    failure: &mut ValidationFailure,
) -> Option<u32> {
    let number = match lookup(raw, field)? {
        ParamValue::Number(n) => *n,
        ParamValue::Text(s) => match s.trim().parse::<f64>() {
            Ok(n) => n,
            Err(_) => {
                failure.invalid(field, format!("'{}' is not a number", s.trim()));
                return None;
            }
        },
        ParamValue::Bool(_) => {
            failure.invalid(field, "must be a number");
            return None;
        }
        ParamValue::Null => return None,
    };

    if !number.is_finite() {
        failure.invalid(field, "must be a finite number");
        return None;
    }

    let rounded = number.round();
    if rounded < min as f64 || rounded > max as f64 {
        failure.invalid(field, format!("must be between {} and {}", min, max));
        return None;
    }

    Some(rounded as u32)
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
