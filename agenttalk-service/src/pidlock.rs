//! PID lock file with staleness detection (spec.md §3, §4.7 step 2).
//!
//! The teacher's `enforce_single_instance()` in `dictum-app/src/main.rs`
//! only proves "no other handle to this named Windows mutex" — it proves
//! nothing about a PID file on disk and does nothing on other platforms.
//! Liveness checking here is grounded on `mmogr-gglib`'s `sysinfo`
//! dependency instead: read the recorded PID, ask `sysinfo` whether a
//! process with that PID is alive and looks like this binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::{Pid, System};

use agenttalk_core::error::{AgentTalkError, Result};

/// The file name recognized by this binary, matching its own process
/// image name so a stale lock from a renamed/moved binary is still
/// detected as foreign.
const PROCESS_NAME: &str = "agenttalk-service";

pub struct PidLock {
    path: PathBuf,
    acquired: bool,
}

/// Outcome of attempting to acquire the lock at startup.
pub enum AcquireOutcome {
    /// No other live instance — lock file written, holds the OS pid.
    Acquired(PidLock),
    /// A live instance of this program already holds the lock; the
    /// caller should exit quietly with success (spec.md §4.7 step 2).
    AlreadyRunning,
}

/// Attempts to acquire `path` as the PID lock. Never returns an error for
/// "someone else is running" — that's `AlreadyRunning`; only genuine IO
/// failures (can't create the parent directory, can't write the file)
/// are `Err`, and those are `StartupFatal` per spec.md §7.
pub fn acquire(path: PathBuf) -> Result<AcquireOutcome> {
    if let Some(existing_pid) = read_pid(&path) {
        if is_live_instance(existing_pid) {
            return Ok(AcquireOutcome::AlreadyRunning);
        }
        tracing::info!(pid = existing_pid, "stale PID lock — overwriting");
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, std::process::id().to_string())?;
    Ok(AcquireOutcome::Acquired(PidLock {
        path,
        acquired: true,
    }))
}

impl PidLock {
    /// Removes the lock file. Called on normal exit (spec.md §3).
    pub fn release(mut self) {
        self.release_inner();
        self.acquired = false;
    }

    fn release_inner(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = ?self.path, error = %e, "failed to remove PID lock");
            }
        }
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if self.acquired {
            self.release_inner();
        }
    }
}

/// Held across both normal-shutdown surfaces (the tray Quit item and
/// `/stop`) so whichever one fires first can release the lock — neither
/// owns it outright, since `std::process::exit` never returns control to
/// `main` for `PidLock`'s `Drop` to run.
pub type SharedPidLock = Arc<Mutex<Option<PidLock>>>;

/// Releases the lock if it is still held, otherwise a no-op. Safe to call
/// from either shutdown path even if the other already released it.
pub fn release_shared(lock: &SharedPidLock) {
    if let Some(lock) = lock.lock().take() {
        lock.release();
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// True iff `pid` is a live process whose name matches this binary.
/// Isolated from `acquire` so it's unit-testable with an arbitrary PID.
fn is_live_instance(pid: u32) -> bool {
    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[sys_pid]), true);

    match system.process(sys_pid) {
        Some(process) => process
            .name()
            .to_string_lossy()
            .to_lowercase()
            .contains(PROCESS_NAME),
        None => false,
    }
}
