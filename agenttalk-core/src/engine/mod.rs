//! Synthesis backend abstraction and the primary/secondary engine adapter.
//!
//! The trait/handle split is grounded on `dictum-core/src/inference/mod.rs`'s
//! `SpeechModel` + `ModelHandle` pair: `&mut self` on the hot method
//! expresses that a backend is stateful (decoder caches, loaded weights),
//! and all mutation is serialized through a `parking_lot::Mutex`.

pub mod kokoro;
pub mod piper;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EngineKind;
use crate::error::{AgentTalkError, Result};

/// One mono channel of synthesized audio in `[-1.0, 1.0]` at `sample_rate`.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Contract every synthesis backend implements (spec.md §4.2).
pub trait SynthesisBackend: Send + 'static {
    /// One-time warm-up: load weights, run a throwaway utterance to force
    /// any deferred initialization. Called once per backend instance.
    fn warm_up(&mut self) -> Result<()>;

    /// `voice` and `lang` are advisory — backends that embed voice choice
    /// in the model file may ignore them. `speed` below `0.1` is clamped
    /// by the caller before reaching here.
    fn synthesize(&mut self, text: &str, voice: &str, speed: f32, lang: &str) -> Result<SynthesisOutput>;
}

/// Thread-safe reference-counted handle to a `SynthesisBackend` instance.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<Mutex<dyn SynthesisBackend>>);

impl EngineHandle {
    pub fn new<B: SynthesisBackend>(backend: B) -> Self {
        Self(Arc::new(Mutex::new(backend)))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

impl EngineHandle {
    pub fn synthesize(&self, text: &str, voice: &str, speed: f32, lang: &str) -> Result<SynthesisOutput> {
        let speed = speed.max(MIN_SPEED);
        let mut backend = self.0.lock();
        backend.synthesize(text, voice, speed, lang)
    }
}

const MIN_SPEED: f32 = 0.1;

/// Loads (or reuses) the backend for the requested engine kind, without
/// running any synthesis. The Worker calls this *before* ducking (spec.md
/// §4.5 step 3e) so a misconfigured or missing secondary model surfaces
/// before other applications have been silenced; the returned handle is
/// then used for the actual synthesis call after ducking.
pub struct EngineAdapter {
    primary: EngineHandle,
    secondary: Mutex<Option<(PathBuf, EngineHandle)>>,
}

impl EngineAdapter {
    /// `primary` must already be warmed up — construction does not warm it
    /// again, matching spec.md §4.2 ("loaded once at startup").
    pub fn new(primary: EngineHandle) -> Self {
        Self {
            primary,
            secondary: Mutex::new(None),
        }
    }

    pub fn resolve(&self, kind: EngineKind, secondary_model_path: Option<&Path>) -> Result<EngineHandle> {
        match kind {
            EngineKind::Primary => Ok(self.primary.clone()),
            EngineKind::Secondary => self.resolve_secondary(secondary_model_path),
        }
    }

    /// Convenience for callers (and tests) that want a single
    /// resolve-then-synthesize call on the primary engine.
    pub fn synthesize_primary(&self, text: &str, voice: &str, speed: f32, lang: &str) -> Result<SynthesisOutput> {
        self.primary.synthesize(text, voice, speed, lang)
    }

    /// Convenience for callers (and tests) that want a single
    /// resolve-then-synthesize call on the secondary engine.
    pub fn synthesize_secondary(
        &self,
        model_path: Option<&Path>,
        text: &str,
        voice: &str,
        speed: f32,
        lang: &str,
    ) -> Result<SynthesisOutput> {
        let handle = self.resolve_secondary(model_path)?;
        handle.synthesize(text, voice, speed, lang)
    }

    /// Loads (or reuses) the secondary backend for `model_path`. The
    /// cache holds at most one loaded instance; a path change drops the
    /// old instance here, matching spec.md §4.2's "old instance is
    /// released" wording.
    fn resolve_secondary(&self, model_path: Option<&Path>) -> Result<EngineHandle> {
        let model_path = model_path.ok_or_else(|| {
            AgentTalkError::Misconfigured("secondary engine selected but secondary_model_path is unset".into())
        })?;
        if !model_path.exists() {
            return Err(AgentTalkError::ModelMissing {
                path: model_path.to_path_buf(),
            });
        }

        let mut cache = self.secondary.lock();

        let needs_reload = match &*cache {
            Some((cached_path, _)) => cached_path != model_path,
            None => true,
        };

        if needs_reload {
            tracing::info!(path = ?model_path, "loading secondary synthesis backend");
            let mut backend = piper::PiperEngine::load(model_path)?;
            backend.warm_up()?;
            *cache = Some((model_path.to_path_buf(), EngineHandle::new(backend)));
        }

        Ok(cache.as_ref().map(|(_, h)| h.clone()).expect("just populated above"))
    }
}
