//! Secondary synthesis backend, lazy-loaded by model path.
//!
//! Same placeholder-DSP approach as [`crate::engine::kokoro`]: real ONNX
//! model loading is out of scope, but the load/warm-up/synthesize
//! lifecycle a real backend would need is fully wired up, grounded on
//! `dictum-core/src/inference/stub.rs`'s `StubModel`.

use std::path::Path;

use crate::engine::{SynthesisBackend, SynthesisOutput};
use crate::error::{AgentTalkError, Result};

const SAMPLE_RATE: u32 = 22_050;
const MS_PER_CHAR: f32 = 50.0;

/// `speed` (our 0.5–2.0 scale) maps inversely onto Piper's `length_scale`
/// knob, where *smaller* means *faster* — `length_scale = 1.0 / speed`,
/// matching `original_source/agenttalk/piper_engine.py`.
fn speed_to_length_scale(speed: f32) -> f32 {
    1.0 / speed.max(0.1)
}

/// Placeholder for the secondary (lazy-loaded, path-keyed) engine. Voice
/// selection for this backend is embedded in the model file, so the
/// `voice`/`lang` parameters passed to `synthesize` are ignored, per
/// spec.md §4.2.
pub struct PiperEngine {
    model_seed: u32,
    warm: bool,
}

impl PiperEngine {
    /// Loads the model at `path`. The caller has already confirmed the
    /// path exists; this re-reads the file so a corrupt/unreadable model
    /// surfaces as `BackendUnavailable` rather than a generic IO error.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            AgentTalkError::BackendUnavailable(format!("cannot read model at {}: {e}", path.display()))
        })?;
        let model_seed = bytes.iter().fold(2166136261u32, |acc, b| {
            (acc ^ *b as u32).wrapping_mul(16777619)
        });
        Ok(Self {
            model_seed,
            warm: false,
        })
    }
}

impl SynthesisBackend for PiperEngine {
    fn warm_up(&mut self) -> Result<()> {
        let _ = placeholder_waveform("warmup", 1.0, self.model_seed);
        self.warm = true;
        tracing::debug!("secondary engine warmed up");
        Ok(())
    }

    fn synthesize(&mut self, text: &str, _voice: &str, speed: f32, _lang: &str) -> Result<SynthesisOutput> {
        let length_scale = speed_to_length_scale(speed);
        let samples = placeholder_waveform(text, length_scale, self.model_seed);
        Ok(SynthesisOutput {
            samples,
            sample_rate: SAMPLE_RATE,
        })
    }
}

fn placeholder_waveform(text: &str, length_scale: f32, model_seed: u32) -> Vec<f32> {
    let duration_ms = (text.chars().count().max(1) as f32 * MS_PER_CHAR * length_scale).clamp(120.0, 20_000.0);
    let n = (SAMPLE_RATE as f32 * duration_ms / 1000.0) as usize;
    let base_freq = 140.0 + (model_seed % 180) as f32;

    (0..n)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let envelope = (-2.5 * t / (duration_ms / 1000.0)).exp();
            let tone = (2.0 * std::f32::consts::PI * base_freq * t).sin();
            tone * envelope * 0.6
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_scale_is_inverse_of_speed() {
        assert!((speed_to_length_scale(1.0) - 1.0).abs() < 1e-6);
        assert!(speed_to_length_scale(2.0) < speed_to_length_scale(1.0));
        assert!(speed_to_length_scale(0.5) > speed_to_length_scale(1.0));
    }

    #[test]
    fn speed_below_point_one_is_clamped() {
        let a = speed_to_length_scale(0.05);
        let b = speed_to_length_scale(0.1);
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn load_fails_cleanly_on_unreadable_path() {
        let err = PiperEngine::load(Path::new("/definitely/not/a/real/path.onnx")).unwrap_err();
        assert!(matches!(err, AgentTalkError::BackendUnavailable(_)));
    }

    #[test]
    fn two_models_with_different_bytes_yield_different_tone() {
        let dir = tempfile::tempdir().unwrap();
        let a_path = dir.path().join("a.onnx");
        let b_path = dir.path().join("b.onnx");
        std::fs::write(&a_path, b"voice-a-weights").unwrap();
        std::fs::write(&b_path, b"voice-b-weights").unwrap();

        let mut a = PiperEngine::load(&a_path).unwrap();
        let mut b = PiperEngine::load(&b_path).unwrap();
        a.warm_up().unwrap();
        b.warm_up().unwrap();

        let out_a = a.synthesize("hello there", "unused", 1.0, "en").unwrap();
        let out_b = b.synthesize("hello there", "unused", 1.0, "en").unwrap();
        assert_eq!(out_a.samples.len(), out_b.samples.len());
        assert_ne!(out_a.samples, out_b.samples);
    }
}
