//! Core TTS pipeline: preprocessing, engine adapter, ducking, playback,
//! the bounded work queue, and the runtime/persisted configuration they
//! all share.
//!
//! The service binary (`agenttalk-service`) wires these pieces together
//! behind an HTTP control plane and a tray UI; nothing in this crate
//! depends on either.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod config;
pub mod duck;
pub mod engine;
pub mod error;
pub mod icon;
pub mod preprocess;
pub mod sink;
pub mod worker;

pub use config::{ConfigStore, ConfigUpdate, EngineKind, PersistedConfig, RuntimeState, SpeechMode, StateSnapshot};
pub use engine::{EngineAdapter, EngineHandle, SynthesisBackend, SynthesisOutput};
pub use error::{AgentTalkError, Result};
pub use icon::{IconImage, IconState, NoopIconState};
pub use preprocess::preprocess;
pub use sink::{AudioSink, StopHandle};
pub use worker::{QueueItem, SharedDucker, Worker, WorkerState};

/// Bounded FIFO capacity shared by every producer and the Worker (spec.md §5).
pub const QUEUE_CAPACITY: usize = 10;
