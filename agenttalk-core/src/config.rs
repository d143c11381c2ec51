//! Runtime state and persisted configuration.
//!
//! Grounded on `dictum-app/src/settings.rs` (load/save JSON in the
//! per-user app-data directory), generalized so that saves are atomic
//! (temp file + rename) as spec.md §4.1/§9 requires — the teacher writes
//! `settings.json` directly and relies on Tauri's single-writer IPC model
//! to avoid torn writes, which does not hold here: the HTTP control plane
//! and the Worker thread can both observe state concurrently.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{AgentTalkError, Result};

/// Which synthesis backend is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Primary,
    Secondary,
}

impl EngineKind {
    fn as_model_tag(self) -> &'static str {
        match self {
            EngineKind::Primary => "kokoro",
            EngineKind::Secondary => "piper",
        }
    }

    fn from_model_tag(tag: &str) -> Option<Self> {
        match tag {
            "kokoro" => Some(EngineKind::Primary),
            "piper" => Some(EngineKind::Secondary),
            _ => None,
        }
    }
}

/// Whether utterances queue automatically or require some external gate.
/// AgentTalk itself treats both the same at the queue level (spec.md §3);
/// the field exists so control-plane consumers can read/persist intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechMode {
    Auto,
    SemiAuto,
}

/// Fixed catalog of primary-engine voice identifiers, mirroring
/// `original_source/agenttalk/tray.py`'s `KOKORO_VOICES` — used to answer
/// `GET /voices` and to populate the tray's Voice submenu.
pub const PRIMARY_VOICES: &[&str] = &[
    "af_heart",
    "af_bella",
    "af_nicole",
    "af_sarah",
    "af_sky",
    "am_adam",
    "am_michael",
    "bf_emma",
    "bf_isabella",
    "bm_george",
    "bm_lewis",
];

const DEFAULT_VOICE: &str = "af_heart";

#[derive(Debug, Clone)]
struct Inner {
    voice: String,
    speed: f32,
    volume: f32,
    muted: bool,
    speaking: bool,
    engine_kind: EngineKind,
    secondary_model_path: Option<PathBuf>,
    pre_cue_path: Option<PathBuf>,
    post_cue_path: Option<PathBuf>,
    speech_mode: SpeechMode,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            speed: 1.0,
            volume: 1.0,
            muted: false,
            speaking: false,
            engine_kind: EngineKind::Primary,
            secondary_model_path: None,
            pre_cue_path: None,
            post_cue_path: None,
            speech_mode: SpeechMode::Auto,
        }
    }
}

/// A self-consistent read of Runtime State, taken once and never re-read
/// mid-utterance (spec.md §3 invariant, §4.5 step 3d).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub voice: String,
    pub speed: f32,
    pub volume: f32,
    pub muted: bool,
    pub speaking: bool,
    pub engine_kind: EngineKind,
    pub secondary_model_path: Option<PathBuf>,
    pub pre_cue_path: Option<PathBuf>,
    pub post_cue_path: Option<PathBuf>,
    pub speech_mode: SpeechMode,
}

/// Process-wide mutable Runtime State (spec.md §3).
///
/// A single `RwLock<Inner>` rather than one lock per field: mutations are
/// still point-writes (each setter takes the write lock, changes one
/// field, releases), but the Worker's step-3d snapshot read is then
/// guaranteed self-consistent across *all* fields, not just the one it
/// happens to read first.
pub struct RuntimeState {
    inner: RwLock<Inner>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_persisted(cfg: &PersistedConfig) -> Self {
        let state = Self::new();
        state.apply_persisted(cfg);
        state
    }

    fn apply_persisted(&self, cfg: &PersistedConfig) {
        let mut inner = self.inner.write();
        if let Some(v) = &cfg.voice {
            inner.voice = v.clone();
        }
        if let Some(s) = cfg.speed {
            inner.speed = s.clamp(0.5, 2.0);
        }
        if let Some(v) = cfg.volume {
            inner.volume = v.max(0.0);
        }
        if let Some(m) = &cfg.model {
            if let Some(kind) = EngineKind::from_model_tag(m) {
                inner.engine_kind = kind;
            }
        }
        if let Some(m) = cfg.muted {
            inner.muted = m;
        }
        inner.pre_cue_path = cfg.pre_cue_path.clone();
        inner.post_cue_path = cfg.post_cue_path.clone();
        inner.secondary_model_path = cfg.secondary_model_path.clone();
        if let Some(sm) = &cfg.speech_mode {
            inner.speech_mode = match sm.as_str() {
                "semi_auto" => SpeechMode::SemiAuto,
                _ => SpeechMode::Auto,
            };
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read();
        StateSnapshot {
            voice: inner.voice.clone(),
            speed: inner.speed,
            volume: inner.volume,
            muted: inner.muted,
            speaking: inner.speaking,
            engine_kind: inner.engine_kind,
            secondary_model_path: inner.secondary_model_path.clone(),
            pre_cue_path: inner.pre_cue_path.clone(),
            post_cue_path: inner.post_cue_path.clone(),
            speech_mode: inner.speech_mode,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.inner.read().muted
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.inner.write().speaking = speaking;
    }

    pub fn speaking(&self) -> bool {
        self.inner.read().speaking
    }

    pub fn to_persisted(&self) -> PersistedConfig {
        let inner = self.inner.read();
        PersistedConfig {
            voice: Some(inner.voice.clone()),
            speed: Some(inner.speed),
            volume: Some(inner.volume),
            model: Some(inner.engine_kind.as_model_tag().to_string()),
            muted: Some(inner.muted),
            pre_cue_path: inner.pre_cue_path.clone(),
            post_cue_path: inner.post_cue_path.clone(),
            secondary_model_path: inner.secondary_model_path.clone(),
            speech_mode: Some(
                match inner.speech_mode {
                    SpeechMode::Auto => "auto",
                    SpeechMode::SemiAuto => "semi_auto",
                }
                .to_string(),
            ),
        }
    }

    /// Apply a partial config update. Only `Some` fields in `update` are
    /// changed. Returns the names of the fields actually mutated, in the
    /// order given by spec.md §4.6's `"updated": [...]` response field.
    pub fn apply_update(&self, update: &ConfigUpdate) -> Vec<&'static str> {
        let mut updated = Vec::new();
        let mut inner = self.inner.write();

        if let Some(voice) = &update.voice {
            inner.voice = voice.clone();
            updated.push("voice");
        }
        if let Some(speed) = update.speed {
            inner.speed = speed.clamp(0.5, 2.0);
            updated.push("speed");
        }
        if let Some(volume) = update.volume {
            inner.volume = volume.max(0.0);
            updated.push("volume");
        }
        if let Some(model) = &update.model {
            match EngineKind::from_model_tag(model) {
                Some(kind) => {
                    inner.engine_kind = kind;
                    updated.push("model");
                }
                None => tracing::warn!(model = %model, "unknown model tag in config update — ignored"),
            }
        }
        if let Some(muted) = update.muted {
            inner.muted = muted;
            updated.push("muted");
        }
        if let Some(path) = &update.pre_cue_path {
            inner.pre_cue_path = Some(path.clone());
            updated.push("pre_cue_path");
        }
        if let Some(path) = &update.post_cue_path {
            inner.post_cue_path = Some(path.clone());
            updated.push("post_cue_path");
        }
        if let Some(path) = &update.secondary_model_path {
            inner.secondary_model_path = Some(path.clone());
            updated.push("secondary_model_path");
        }
        if let Some(sm) = &update.speech_mode {
            inner.speech_mode = match sm.as_str() {
                "semi_auto" => SpeechMode::SemiAuto,
                "auto" => SpeechMode::Auto,
                other => {
                    tracing::warn!(speech_mode = %other, "unknown speech_mode in config update — ignored");
                    inner.speech_mode
                }
            };
            if sm == "auto" || sm == "semi_auto" {
                updated.push("speech_mode");
            }
        }

        updated
    }
}

/// The persistable subset of Runtime State (spec.md §3, §6).
///
/// All fields are `Option` so a config file that omits a key leaves the
/// corresponding Runtime State field at its default, and so partial
/// `POST /config` bodies deserialize directly into this type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedConfig {
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub volume: Option<f32>,
    pub model: Option<String>,
    pub muted: Option<bool>,
    pub pre_cue_path: Option<PathBuf>,
    pub post_cue_path: Option<PathBuf>,
    #[serde(alias = "piper_model_path")]
    pub secondary_model_path: Option<PathBuf>,
    pub speech_mode: Option<String>,
}

/// Alias of `PersistedConfig` used for `POST /config` request bodies —
/// same shape, kept as a distinct name so call sites read clearly.
pub type ConfigUpdate = PersistedConfig;

/// Reads/writes `config.json` atomically. Grounded on
/// `original_source/agenttalk/config_loader.py`'s `.json.tmp` +
/// `Path.replace()` pattern and `dictum-app/src/settings.rs`'s
/// `load_settings`/`save_settings` pair, merged: atomic write like the
/// Python original, typed load/save like the teacher.
pub struct ConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Default `<platform-appdata>/AgentTalk/config.json` path.
    pub fn default_path() -> PathBuf {
        default_config_dir().join("config.json")
    }

    /// Missing or invalid file yields defaults — never fatal (spec.md §4.7 step 3).
    pub fn load(&self) -> PersistedConfig {
        match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = ?self.path, error = %e, "invalid config.json — using defaults");
                PersistedConfig::default()
            }),
            Err(_) => {
                tracing::debug!(path = ?self.path, "no config file — using defaults");
                PersistedConfig::default()
            }
        }
    }

    /// Atomic write: temp file then rename, serialized by `write_lock` so
    /// a concurrent HTTP-handler write and worker-triggered write never
    /// interleave (spec.md §5 "Shared state discipline").
    pub fn save(&self, cfg: &PersistedConfig) -> Result<()> {
        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(cfg)
            .map_err(|e| AgentTalkError::Config(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// `<platform-appdata>/AgentTalk`.
pub fn default_config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("AgentTalk")
    }
    #[cfg(not(target_os = "windows"))]
    {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("AgentTalk")
    }
}

pub fn models_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("models")
}

pub fn piper_models_dir(config_dir: &Path) -> PathBuf {
    models_dir(config_dir).join("piper")
}
