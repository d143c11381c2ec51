//! The TTS Worker: a single long-lived consumer of the bounded work queue
//! (spec.md §4.5).
//!
//! No direct teacher analogue (the teacher's pipeline consumes a capture
//! device, not a work queue) — the `Arc`-shared state and blocking-thread
//! shape are generalized from `dictum-core/src/engine/mod.rs`'s
//! `spawn_blocking` worker, with the duck/play/unduck state machine
//! grounded on `original_source/agenttalk/tts_worker.py`.

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::config::{EngineKind, RuntimeState};
use crate::duck::Ducker;
use crate::engine::EngineAdapter;
use crate::error::Result;
use crate::icon::{IconImage, IconState, NoopIconState};
use crate::sink::AudioSink;

/// Shared so the Supervisor's exit hook can reach the same ducked-session
/// snapshot the Worker would otherwise be the sole owner of (spec.md §4.7
/// step 4, §5 "Resource cleanup" — the termination hook restores it "when
/// the Worker can no longer contend").
pub type SharedDucker = Arc<Mutex<Box<dyn Ducker>>>;

/// How many consecutive utterance failures trigger a degradation notice
/// (spec.md §4.5 step 4, §7 "Degraded").
const FAILURE_THRESHOLD: u32 = 3;

/// One item popped from the work queue.
#[derive(Debug, Clone)]
pub enum QueueItem {
    /// A single preprocessed sentence.
    Utterance(String),
    /// A sentinel requesting cue playback without synthesis.
    Cue(PathBuf),
}

/// Mirrors the Worker's documented state machine. Exposed for tests and
/// diagnostics; the Worker itself drives transitions procedurally rather
/// than matching on this type, since every state except `Idle` is
/// transient within a single `handle_utterance` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Resolving,
    Ducking,
    Playing,
    Restoring,
}

pub struct Worker {
    receiver: Receiver<QueueItem>,
    state: Arc<RuntimeState>,
    engine: Arc<EngineAdapter>,
    ducker: SharedDucker,
    sink: AudioSink,
    icon: Arc<dyn IconState>,
    consecutive_failures: u32,
}

impl Worker {
    pub fn new(
        receiver: Receiver<QueueItem>,
        state: Arc<RuntimeState>,
        engine: Arc<EngineAdapter>,
        ducker: SharedDucker,
        sink: AudioSink,
        icon: Option<Arc<dyn IconState>>,
    ) -> Self {
        Self {
            receiver,
            state,
            engine,
            ducker,
            sink,
            icon: icon.unwrap_or_else(|| Arc::new(NoopIconState)),
            consecutive_failures: 0,
        }
    }

    /// Runs until the channel's senders are all dropped. Intended to be
    /// the entire body of the Worker's dedicated OS thread.
    pub fn run(mut self) {
        while let Ok(item) = self.receiver.recv() {
            self.handle_item(item);
        }
        tracing::info!("worker queue closed — exiting");
    }

    fn handle_item(&mut self, item: QueueItem) {
        match item {
            QueueItem::Cue(path) => self.play_cue(&path),
            QueueItem::Utterance(text) => self.handle_utterance(text),
        }
    }

    /// Cues never trigger ducking or engine resolution (spec.md §4.5 step 2).
    fn play_cue(&mut self, path: &std::path::Path) {
        match load_cue_wav(path) {
            Ok((samples, rate)) => {
                if let Err(e) = self.sink.play(&samples, rate) {
                    tracing::warn!(path = ?path, error = %e, "cue playback failed");
                }
            }
            Err(e) => tracing::warn!(path = ?path, error = %e, "cue decode failed"),
        }
    }

    fn handle_utterance(&mut self, text: String) {
        if self.state.is_muted() {
            return;
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        self.state.set_speaking(true);
        self.icon.set_image(IconImage::Speaking);

        let result = self.run_utterance(trimmed);

        // Always, on every exit path: restore ducking, clear speaking,
        // notify idle (spec.md §4.5 step 5).
        {
            let mut ducker = self.ducker.lock();
            if ducker.is_ducked() {
                ducker.unduck();
            }
        }
        self.state.set_speaking(false);
        self.icon.set_image(IconImage::Idle);

        match result {
            Ok(()) => self.consecutive_failures = 0,
            Err(e) => {
                tracing::error!(error = %e, text = %trimmed, "utterance failed");
                self.consecutive_failures += 1;
                if self.consecutive_failures == FAILURE_THRESHOLD {
                    self.icon
                        .notify("AgentTalk is having trouble speaking — check the log.");
                }
            }
        }
    }

    fn run_utterance(&mut self, text: &str) -> Result<()> {
        // 3d: snapshot configuration once; never re-read mid-utterance.
        let snapshot = self.state.snapshot();

        // 3e: resolve the active engine before ducking, so a
        // misconfiguration does not silence other applications.
        tracing::debug!(engine = Self::engine_kind_label(snapshot.engine_kind), "resolving engine");
        let handle = self.engine.resolve(snapshot.engine_kind, snapshot.secondary_model_path.as_deref())?;

        // 3f
        self.ducker.lock().duck();

        // 3g: synthesize, apply volume gain, clip, play (blocking).
        let lang = "en";
        let output = handle.synthesize(text, &snapshot.voice, snapshot.speed, lang)?;
        let gained: Vec<f32> = output
            .samples
            .iter()
            .map(|s| (s * snapshot.volume).clamp(-1.0, 1.0))
            .collect();
        self.sink.play(&gained, output.sample_rate)?;

        // 3h
        self.ducker.lock().unduck();
        Ok(())
    }

    fn engine_kind_label(kind: EngineKind) -> &'static str {
        match kind {
            EngineKind::Primary => "primary",
            EngineKind::Secondary => "secondary",
        }
    }
}

/// Decodes a cue WAV file to mono `f32` samples at its native rate.
/// Multi-channel files are downmixed by averaging.
fn load_cue_wav(path: &std::path::Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| crate::error::AgentTalkError::Synthesis(format!("cannot open cue file {}: {e}", path.display())))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let raw: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| crate::error::AgentTalkError::Synthesis(e.to_string()))?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| crate::error::AgentTalkError::Synthesis(e.to_string()))?
        }
    };

    let mono: Vec<f32> = if channels <= 1 {
        raw
    } else {
        raw.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duck::noop::NoopDucker;
    use crate::engine::{kokoro::KokoroEngine, EngineHandle};
    use crossbeam_channel::bounded;

    /// `AudioSink::new()` opens a real output device, which a headless
    /// test runner may not have. Returns `None` in that case so tests
    /// skip cleanly instead of failing on environment, not logic.
    fn test_worker() -> Option<Worker> {
        let (_tx, rx) = bounded(10);
        let state = Arc::new(RuntimeState::new());
        let engine = Arc::new(EngineAdapter::new(EngineHandle::new(KokoroEngine::warmed_up().unwrap())));
        let ducker: SharedDucker = Arc::new(Mutex::new(Box::new(NoopDucker::new().unwrap()) as Box<dyn Ducker>));
        let sink = AudioSink::new().ok()?;
        Some(Worker {
            receiver: rx,
            state,
            engine,
            ducker,
            sink,
            icon: Arc::new(NoopIconState),
            consecutive_failures: 0,
        })
    }

    #[test]
    fn muted_state_skips_without_ducking() {
        let Some(mut worker) = test_worker() else { return };
        worker.state.apply_update(&crate::config::ConfigUpdate {
            muted: Some(true),
            ..Default::default()
        });
        worker.handle_utterance("Hello there.".to_string());
        assert!(!worker.ducker.lock().is_ducked());
        assert_eq!(worker.consecutive_failures, 0);
    }

    #[test]
    fn empty_text_after_trim_is_skipped() {
        let Some(mut worker) = test_worker() else { return };
        worker.handle_utterance("   ".to_string());
        assert!(!worker.state.speaking());
    }

    #[test]
    fn ducker_is_never_left_ducked_after_an_utterance() {
        let Some(mut worker) = test_worker() else { return };
        worker.handle_utterance("A short test sentence.".to_string());
        assert!(!worker.ducker.lock().is_ducked());
        assert!(!worker.state.speaking());
    }

    #[test]
    fn secondary_engine_misconfiguration_counts_as_a_failure_not_a_panic() {
        let Some(mut worker) = test_worker() else { return };
        worker.state.apply_update(&crate::config::ConfigUpdate {
            model: Some("piper".into()),
            ..Default::default()
        });
        worker.handle_utterance("Needs a model path that was never set.".to_string());
        assert_eq!(worker.consecutive_failures, 1);
        assert!(!worker.ducker.lock().is_ducked());
    }

    #[test]
    fn three_consecutive_failures_trigger_one_notice() {
        let Some(mut worker) = test_worker() else { return };
        worker.state.apply_update(&crate::config::ConfigUpdate {
            model: Some("piper".into()),
            ..Default::default()
        });
        for _ in 0..3 {
            worker.handle_utterance("Always misconfigured.".to_string());
        }
        assert_eq!(worker.consecutive_failures, FAILURE_THRESHOLD);
    }
}
