//! Blocking audio output device (spec.md §4.4).
//!
//! Grounded on `saorsa-labs-fae/src/audio/playback.rs`'s `CpalPlayback`:
//! same fill-callback-plus-poll-until-finished shape, extended with a
//! `stop()` that can cut a playback short and with resampling to whatever
//! rate the default output device actually reports, since this service
//! must never assume a fixed device sample rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use rubato::{FftFixedIn, Resampler};

use crate::error::{AgentTalkError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

/// Owns the default output device and drives blocking playback.
pub struct AudioSink {
    device: cpal::Device,
    stream_config: StreamConfig,
    device_rate: u32,
    stop_requested: Arc<AtomicBool>,
}

impl AudioSink {
    /// Queries the default output device once at construction — the
    /// device itself is not reopened per utterance (spec.md §4.4 "owns
    /// device configuration at startup").
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AgentTalkError::NoDefaultOutputDevice)?;

        let name = device.name().unwrap_or_else(|_| "<unknown>".into());
        let supported = device
            .default_output_config()
            .map_err(|e| AgentTalkError::AudioDevice(format!("no default output config for {name}: {e}")))?;

        let device_rate = supported.sample_rate().0;
        tracing::info!(device = %name, rate = device_rate, "output device selected");

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
            device_rate,
            stop_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Blocks until `samples` (mono, `[-1.0, 1.0]`, at `rate`) finish
    /// playing, or until [`AudioSink::stop`] is called from another
    /// thread. The worker relies on this return as the "utterance
    /// finished" signal — returning early on error would truncate audio.
    pub fn play(&mut self, samples: &[f32], rate: u32) -> Result<()> {
        self.stop_requested.store(false, Ordering::SeqCst);

        let resampled = if rate == self.device_rate {
            samples.to_vec()
        } else {
            resample(samples, rate, self.device_rate)?
        };

        let buffer = Arc::new(Mutex::new(PlaybackBuffer {
            samples: resampled,
            position: 0,
            finished: false,
        }));
        let buffer_cb = Arc::clone(&buffer);
        let stop_cb = Arc::clone(&self.stop_requested);

        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let Ok(mut buf) = buffer_cb.lock() else {
                        return;
                    };
                    if stop_cb.load(Ordering::SeqCst) {
                        data.fill(0.0);
                        buf.finished = true;
                        return;
                    }
                    for sample in data.iter_mut() {
                        if buf.position < buf.samples.len() {
                            *sample = buf.samples[buf.position];
                            buf.position += 1;
                        } else {
                            *sample = 0.0;
                            buf.finished = true;
                        }
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio output stream error");
                },
                None,
            )
            .map_err(|e| AgentTalkError::AudioStream(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| AgentTalkError::AudioStream(format!("failed to start output stream: {e}")))?;

        loop {
            std::thread::sleep(POLL_INTERVAL);
            let finished = buffer
                .lock()
                .map_err(|_| AgentTalkError::AudioStream("playback buffer lock poisoned".into()))?
                .finished;
            if finished {
                break;
            }
        }

        drop(stream);
        Ok(())
    }

    /// Requests that any in-progress `play()` stop immediately. Safe to
    /// call from a different thread than the one blocked in `play()`.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// A cloneable, `Send + Sync` handle that can request a stop without
    /// holding a reference to the sink itself — the sink lives on the
    /// Worker thread, while `/stop` needs to reach it from the HTTP task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop_requested))
    }
}

/// See [`AudioSink::stop_handle`].
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// A handle backed by its own flag, not attached to any sink. Useful
    /// in tests that exercise `/stop`'s HTTP contract without opening a
    /// real output device.
    pub fn detached() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
}

/// Resamples mono `f32` audio from `from_rate` to `to_rate` with a
/// fixed-input-size FFT resampler — the same family of resampler
/// `rubato` is already pulled in for elsewhere in this corpus.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    let chunk_size = samples.len();
    let mut resampler = FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, chunk_size, 1, 1)
        .map_err(|e| AgentTalkError::AudioStream(format!("resampler init failed: {e}")))?;

    let out = resampler
        .process(&[samples.to_vec()], None)
        .map_err(|e| AgentTalkError::AudioStream(format!("resample failed: {e}")))?;

    Ok(out.into_iter().next().unwrap_or_default())
}
