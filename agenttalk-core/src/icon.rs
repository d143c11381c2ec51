//! Icon State capability consumed by the Worker and Supervisor (spec.md §4.8).
//!
//! Deliberately a trait with a no-op default so headless tests (and the
//! Worker, which only ever holds an `Option<Arc<dyn IconState>>`) never
//! need a real tray to exercise the queue/engine/duck/sink path. The real
//! tray-icon-backed implementation lives in the service binary, next to
//! the rest of the platform UI glue.

/// What the icon should currently display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconImage {
    Idle,
    Speaking,
}

pub trait IconState: Send + Sync {
    fn set_image(&self, image: IconImage);

    /// A short user-visible message, e.g. the degradation notice after
    /// repeated synthesis failures.
    fn notify(&self, message: &str);
}

/// Used wherever a real icon reference is absent (headless runs, tests).
pub struct NoopIconState;

impl IconState for NoopIconState {
    fn set_image(&self, _image: IconImage) {}
    fn notify(&self, _message: &str) {}
}
