//! Primary synthesis backend.
//!
//! Real model internals (the vendored ONNX weights and their inference
//! graph) are out of scope here, same as `dictum-core/src/inference/stub.rs`
//! stands in for the not-yet-integrated ONNX Whisper model. This produces
//! a deterministic, audibly-shaped placeholder waveform — a short burst of
//! decaying tones whose duration and pitch derive from the input text —
//! so the full queue/duck/play pipeline can be exercised end-to-end
//! without the real model.

use crate::engine::{SynthesisBackend, SynthesisOutput};
use crate::error::Result;

const SAMPLE_RATE: u32 = 24_000;
const MS_PER_CHAR: f32 = 45.0;

/// Placeholder for the primary (always-loaded) engine.
pub struct KokoroEngine {
    warm: bool,
    utterance_count: u32,
}

impl KokoroEngine {
    pub fn new() -> Self {
        Self {
            warm: false,
            utterance_count: 0,
        }
    }

    /// Convenience used by callers (and tests) that want a ready-to-use
    /// instance without a separate warm-up call.
    pub fn warmed_up() -> Result<Self> {
        let mut engine = Self::new();
        engine.warm_up()?;
        Ok(engine)
    }
}

impl Default for KokoroEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthesisBackend for KokoroEngine {
    fn warm_up(&mut self) -> Result<()> {
        // Force the same code path a real synthesis call takes, so any
        // deferred initialization happens now rather than on first request.
        let _ = placeholder_waveform("warmup", 1.0, 220.0);
        self.warm = true;
        tracing::debug!("primary engine warmed up");
        Ok(())
    }

    fn synthesize(&mut self, text: &str, voice: &str, speed: f32, _lang: &str) -> Result<SynthesisOutput> {
        self.utterance_count += 1;
        let base_freq = voice_to_base_frequency(voice);
        let samples = placeholder_waveform(text, speed, base_freq);
        Ok(SynthesisOutput {
            samples,
            sample_rate: SAMPLE_RATE,
        })
    }
}

/// Maps a voice identifier to a base tone frequency so distinct voices are
/// at least distinguishable in the placeholder output.
fn voice_to_base_frequency(voice: &str) -> f32 {
    let hash: u32 = voice.bytes().fold(2166136261u32, |acc, b| {
        (acc ^ b as u32).wrapping_mul(16777619)
    });
    180.0 + (hash % 220) as f32
}

/// Decaying sine burst whose length scales with text length and `speed`,
/// standing in for an actual vocoder's output.
fn placeholder_waveform(text: &str, speed: f32, base_freq: f32) -> Vec<f32> {
    let speed = speed.max(0.1);
    let duration_ms = (text.chars().count().max(1) as f32 * MS_PER_CHAR / speed).clamp(120.0, 20_000.0);
    let n = (SAMPLE_RATE as f32 * duration_ms / 1000.0) as usize;

    (0..n)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let envelope = (-3.0 * t / (duration_ms / 1000.0)).exp();
            let tone = (2.0 * std::f32::consts::PI * base_freq * t).sin();
            tone * envelope * 0.6
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_up_is_idempotent() {
        let mut engine = KokoroEngine::new();
        engine.warm_up().unwrap();
        engine.warm_up().unwrap();
        assert!(engine.warm);
    }

    #[test]
    fn longer_text_yields_more_samples() {
        let mut engine = KokoroEngine::warmed_up().unwrap();
        let short = engine.synthesize("Hi.", "af_heart", 1.0, "en").unwrap();
        let long = engine
            .synthesize("This is a considerably longer sentence to speak aloud.", "af_heart", 1.0, "en")
            .unwrap();
        assert!(long.samples.len() > short.samples.len());
    }

    #[test]
    fn higher_speed_yields_fewer_samples() {
        let mut engine = KokoroEngine::warmed_up().unwrap();
        let normal = engine.synthesize("A reasonably long test sentence.", "af_heart", 1.0, "en").unwrap();
        let fast = engine.synthesize("A reasonably long test sentence.", "af_heart", 2.0, "en").unwrap();
        assert!(fast.samples.len() < normal.samples.len());
    }

    #[test]
    fn different_voices_yield_different_tones() {
        let mut engine = KokoroEngine::warmed_up().unwrap();
        let a = engine.synthesize("Same text.", "af_heart", 1.0, "en").unwrap();
        let b = engine.synthesize("Same text.", "bm_george", 1.0, "en").unwrap();
        assert_eq!(a.samples.len(), b.samples.len());
        assert_ne!(a.samples, b.samples);
    }

    #[test]
    fn output_samples_stay_in_range() {
        let mut engine = KokoroEngine::warmed_up().unwrap();
        let out = engine.synthesize("Check amplitude bounds here.", "af_heart", 1.0, "en").unwrap();
        assert!(out.samples.iter().all(|s| s.abs() <= 1.0));
    }
}
