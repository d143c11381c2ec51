//! Windows Core Audio session ducking.
//!
//! Reimplements `original_source/agenttalk/audio_duck.py`'s sequence
//! (enumerate sessions via `IAudioSessionManager2`, skip our own process,
//! save then halve `ISimpleAudioVolume`) against the `windows` crate
//! instead of `pycaw`/`comtypes`. COM is initialized per-call, matching
//! the Python original's reasoning: this runs on the Worker thread, which
//! never calls `CoInitializeEx` itself.

#![allow(unsafe_code)]

use std::collections::HashMap;

use windows::core::Interface;
use windows::Win32::Media::Audio::{
    eConsole, eRender, IAudioSessionControl2, IAudioSessionManager2, IMMDeviceEnumerator,
    ISimpleAudioVolume, MMDeviceEnumerator,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_MULTITHREADED,
};

use crate::duck::{Ducker, DUCK_GAIN};
use crate::error::Result;

const SELF_PROCESS_NAMES: &[&str] = &["agenttalk-service.exe"];

pub struct WindowsDucker {
    saved: HashMap<u32, f32>,
}

impl WindowsDucker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            saved: HashMap::new(),
        })
    }

    fn self_pid() -> u32 {
        std::process::id()
    }
}

impl Ducker for WindowsDucker {
    fn duck(&mut self) {
        if self.is_ducked() {
            return;
        }
        if let Err(e) = self.duck_inner() {
            tracing::warn!(error = ?e, "audio ducking failed — continuing without duck");
            self.saved.clear();
        }
    }

    fn unduck(&mut self) {
        if self.saved.is_empty() {
            return;
        }
        if let Err(e) = self.unduck_inner() {
            tracing::warn!(error = ?e, "audio un-ducking failed");
        }
        self.saved.clear();
    }

    fn is_ducked(&self) -> bool {
        !self.saved.is_empty()
    }
}

impl WindowsDucker {
    fn duck_inner(&mut self) -> windows::core::Result<()> {
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED).ok()?;
        }
        let result = (|| unsafe {
            let self_pid = Self::self_pid();
            for_each_session(|pid, session2, volume| {
                if pid == self_pid || pid == 0 {
                    return Ok(());
                }
                let original = volume.GetMasterVolume()?;
                if original > 0.0 {
                    self.saved.insert(pid, original);
                    volume.SetMasterVolume(original * DUCK_GAIN, std::ptr::null())?;
                }
                let _ = session2;
                Ok(())
            })
        })();
        unsafe {
            CoUninitialize();
        }
        result
    }

    fn unduck_inner(&mut self) -> windows::core::Result<()> {
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED).ok()?;
        }
        let result = (|| unsafe {
            for_each_session(|pid, session2, volume| {
                if let Some(&original) = self.saved.get(&pid) {
                    volume.SetMasterVolume(original, std::ptr::null())?;
                }
                let _ = session2;
                Ok(())
            })
        })();
        unsafe {
            CoUninitialize();
        }
        result
    }
}

/// Enumerates every active audio session on the default render endpoint,
/// invoking `f(pid, session_control2, simple_volume)` for each. Sessions
/// with no attached process (the "System Sounds" session) are skipped
/// before `f` is called.
unsafe fn for_each_session(
    mut f: impl FnMut(u32, &IAudioSessionControl2, &ISimpleAudioVolume) -> windows::core::Result<()>,
) -> windows::core::Result<()> {
    let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)?;
    let device = enumerator.GetDefaultAudioEndpoint(eRender, eConsole)?;
    let manager: IAudioSessionManager2 = device.Activate(CLSCTX_ALL, None)?;
    let sessions = manager.GetSessionEnumerator()?;

    let count = sessions.GetCount()?;
    for i in 0..count {
        let session = sessions.GetSession(i)?;
        let session2: IAudioSessionControl2 = session.cast()?;
        let pid = session2.GetProcessId().unwrap_or(0);
        if pid == 0 {
            continue;
        }
        let volume: ISimpleAudioVolume = session.cast()?;
        f(pid, &session2, &volume)?;
    }
    Ok(())
}
