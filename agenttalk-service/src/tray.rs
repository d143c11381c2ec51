//! Tray icon and menu.
//!
//! Grounded on `dictum-app/src/main.rs`'s `setup_system_tray()`
//! (`MenuItem`/`Menu`/`TrayIconBuilder` construction, built but not shown
//! until the UI loop's startup callback runs) and on
//! `original_source/agenttalk/tray.py`'s menu structure (Mute toggle,
//! Model submenu, Voice submenu, a read-only Active item, Quit). Tray
//! bitmap rendering is out of scope (spec.md Non-goals), so icons here
//! are flat solid-color squares, not the original's waveform artwork.

use std::sync::Arc;

use muda::{CheckMenuItem, Menu, MenuItem, PredefinedMenuItem, Submenu};
use parking_lot::Mutex;
use tray_icon::{Icon, TrayIcon, TrayIconBuilder};

use agenttalk_core::config::PRIMARY_VOICES;
use agenttalk_core::icon::{IconImage, IconState};

const ICON_SIZE: u32 = 32;

fn solid_icon(rgba: [u8; 4]) -> Icon {
    let mut buf = Vec::with_capacity((ICON_SIZE * ICON_SIZE * 4) as usize);
    for _ in 0..(ICON_SIZE * ICON_SIZE) {
        buf.extend_from_slice(&rgba);
    }
    Icon::from_rgba(buf, ICON_SIZE, ICON_SIZE).expect("fixed-size solid buffer is always valid")
}

/// IDs of the menu items the event loop needs to react to by identity.
pub struct MenuIds {
    pub mute: muda::MenuId,
    pub quit: muda::MenuId,
    pub model_kokoro: muda::MenuId,
    pub model_piper: muda::MenuId,
    pub voices: Vec<(muda::MenuId, &'static str)>,
}

pub struct TrayHandle {
    icon: TrayIcon,
    mute_item: CheckMenuItem,
    model_kokoro_item: CheckMenuItem,
    model_piper_item: CheckMenuItem,
    active_item: MenuItem,
    idle_icon: Icon,
    speaking_icon: Icon,
}

/// Builds the menu and tray icon but does not make it visible — the
/// Supervisor's UI-loop startup callback does that (spec.md §4.7 step 6a).
pub fn build() -> anyhow::Result<(TrayHandle, MenuIds)> {
    let mute_item = CheckMenuItem::new("Mute", true, false, None);

    let model_kokoro_item = CheckMenuItem::new("Kokoro (primary)", true, true, None);
    let model_piper_item = CheckMenuItem::new("Piper (secondary)", true, false, None);
    let model_submenu = Submenu::new("Model", true);
    model_submenu.append(&model_kokoro_item)?;
    model_submenu.append(&model_piper_item)?;

    let voice_submenu = Submenu::new("Voice", true);
    let mut voice_ids = Vec::new();
    for voice in PRIMARY_VOICES {
        let item = CheckMenuItem::new(*voice, true, *voice == "af_heart", None);
        voice_ids.push((item.id().clone(), *voice));
        voice_submenu.append(&item)?;
    }

    let active_item = MenuItem::new("Active: af_heart", false, None);
    let quit_item = MenuItem::new("Quit", true, None);

    let menu = Menu::new();
    menu.append(&mute_item)?;
    menu.append(&model_submenu)?;
    menu.append(&voice_submenu)?;
    menu.append(&active_item)?;
    menu.append(&PredefinedMenuItem::separator())?;
    menu.append(&quit_item)?;

    let idle_icon = solid_icon([59, 130, 246, 255]);
    let speaking_icon = solid_icon([34, 197, 94, 255]);

    let icon = TrayIconBuilder::new()
        .with_menu(Box::new(menu))
        .with_tooltip("AgentTalk")
        .with_icon(idle_icon.clone())
        .build()?;

    let ids = MenuIds {
        mute: mute_item.id().clone(),
        quit: quit_item.id().clone(),
        model_kokoro: model_kokoro_item.id().clone(),
        model_piper: model_piper_item.id().clone(),
        voices: voice_ids,
    };

    let handle = TrayHandle {
        icon,
        mute_item,
        model_kokoro_item,
        model_piper_item,
        active_item,
        idle_icon,
        speaking_icon,
    };

    Ok((handle, ids))
}

impl TrayHandle {
    /// Tray-icon itself does not ship visible/invisible state portably
    /// everywhere in the same way across platforms, but `tray-icon`
    /// exposes `set_visible`; the Supervisor calls this once, from the
    /// UI loop's startup callback.
    pub fn set_visible(&self, visible: bool) -> anyhow::Result<()> {
        self.icon.set_visible(visible)?;
        Ok(())
    }

    pub fn set_mute_checked(&self, muted: bool) {
        self.mute_item.set_checked(muted);
    }

    pub fn set_active_model(&self, secondary: bool) {
        self.model_kokoro_item.set_checked(!secondary);
        self.model_piper_item.set_checked(secondary);
    }

    pub fn set_active_label(&self, voice_or_stem: &str) {
        self.active_item.set_text(format!("Active: {voice_or_stem}"));
    }
}

/// Adapts [`TrayHandle`] to the core crate's `IconState` capability.
/// Shared between the Worker thread and the UI-loop thread via `Arc`.
pub struct ServiceIconState {
    handle: Mutex<TrayHandle>,
}

impl ServiceIconState {
    pub fn new(handle: TrayHandle) -> Arc<Self> {
        Arc::new(Self {
            handle: Mutex::new(handle),
        })
    }
}

impl ServiceIconState {
    /// Makes the tray icon visible. Called once, from the UI loop's
    /// startup callback (spec.md §4.7 step 6a) — `build()` deliberately
    /// leaves it hidden so nothing appears before the loop is running.
    pub fn show(&self) -> anyhow::Result<()> {
        self.handle.lock().set_visible(true)
    }

    pub fn set_mute_checked(&self, muted: bool) {
        self.handle.lock().set_mute_checked(muted);
    }

    pub fn set_active_model(&self, secondary: bool) {
        self.handle.lock().set_active_model(secondary);
    }

    pub fn set_active_label(&self, label: &str) {
        self.handle.lock().set_active_label(label);
    }
}

impl IconState for ServiceIconState {
    fn set_image(&self, image: IconImage) {
        let handle = self.handle.lock();
        let icon = match image {
            IconImage::Idle => handle.idle_icon.clone(),
            IconImage::Speaking => handle.speaking_icon.clone(),
        };
        if let Err(e) = handle.icon.set_icon(Some(icon)) {
            tracing::warn!(error = %e, "failed to swap tray icon image");
        }
    }

    fn notify(&self, message: &str) {
        let handle = self.handle.lock();
        if let Err(e) = handle.icon.set_tooltip(Some(message)) {
            tracing::warn!(error = %e, "failed to set tray notification tooltip");
        }
    }
}
