use thiserror::Error;

/// All errors produced by agenttalk-core.
#[derive(Debug, Error)]
pub enum AgentTalkError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("TTS queue is full — cannot accept more work")]
    QueueFull,

    #[error("engine misconfigured: {0}")]
    Misconfigured(String),

    #[error("model file not found: {path}")]
    ModelMissing { path: std::path::PathBuf },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("PID lock error: {0}")]
    PidLock(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AgentTalkError>;
