//! Output-stream ducking: lower every other application's volume while
//! AgentTalk speaks, then restore it.
//!
//! The teacher has no analogous module (it only captures audio); this is
//! grounded on `original_source/agenttalk/audio_duck.py`'s Core Audio
//! session-enumeration sequence, reimplemented with the `windows` crate
//! already in the corpus (`mmogr-gglib/Cargo.toml`).

#[cfg(target_os = "windows")]
pub mod windows_sessions;
#[cfg(not(target_os = "windows"))]
pub mod noop;

use crate::error::Result;

/// Fraction applied to every other stream's volume while ducked.
pub const DUCK_GAIN: f32 = 0.5;

/// Contract satisfied identically on every platform (spec.md §4.3).
/// Implementations must never propagate errors out of `duck`/`unduck` —
/// every failure is logged and swallowed so a broken duck can't crash the
/// worker.
pub trait Ducker: Send {
    /// Snapshot every other output stream's current volume and set it to
    /// [`DUCK_GAIN`]. Idempotent: calling while already ducked is a no-op.
    fn duck(&mut self);

    /// Restore exactly the snapshots taken by the last `duck()` and clear
    /// them. Idempotent: calling while not ducked is a no-op.
    fn unduck(&mut self);

    /// True iff a snapshot is pending restoration.
    fn is_ducked(&self) -> bool;
}

#[cfg(target_os = "windows")]
pub use windows_sessions::WindowsDucker as PlatformDucker;
#[cfg(not(target_os = "windows"))]
pub use noop::NoopDucker as PlatformDucker;

/// Builds the ducker for the current platform.
pub fn platform_ducker() -> Result<Box<dyn Ducker>> {
    Ok(Box::new(PlatformDucker::new()?))
}
