//! Process entry point: the single-instance daemon supervisor (spec.md
//! §4.7).
//!
//! Startup ordering is grounded on `dictum-app/src/main.rs`'s `main()`
//! (tracing init -> single-instance check -> settings load -> engine
//! construction/warm-up -> UI-loop `Builder::setup` closure -> `.run()`),
//! carried onto the bare `tao`/`tray-icon`/`muda` stack Tauri wraps
//! internally, since AgentTalk has no webview surface to justify pulling
//! in Tauri itself.

mod http;
mod pidlock;
mod tray;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as PlMutex;
use tao::event::{Event, StartCause};
use tao::event_loop::{ControlFlow, EventLoop};

use agenttalk_core::config::{default_config_dir, ConfigStore, ConfigUpdate, EngineKind};
use agenttalk_core::duck::platform_ducker;
use agenttalk_core::engine::kokoro::KokoroEngine;
use agenttalk_core::{
    AudioSink, EngineAdapter, EngineHandle, IconState, QueueItem, RuntimeState, SharedDucker, Worker,
    QUEUE_CAPACITY,
};

use pidlock::AcquireOutcome;
use tray::{MenuIds, ServiceIconState};

/// spec.md §6 "HTTP... fixed port 5050".
const CONTROL_PLANE_PORT: u16 = 5050;
const READY_ANNOUNCEMENT: &str = "AgentTalk is ready.";

fn init_logging(config_dir: &std::path::Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(config_dir)?;
    let log_path = config_dir.join("agenttalk.log");
    let file = std::fs::OpenOptions::new().create(true).append(true).open(&log_path)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agenttalk=info".parse().unwrap()),
        )
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config_dir = default_config_dir();

    // Step 1: open the log file before any third-party subsystem touches
    // anything, so an early failure in steps 2+ is never lost.
    init_logging(&config_dir)?;
    tracing::info!("AgentTalk starting");

    // Step 2: acquire the PID lock, or exit quietly if a live instance
    // already holds it.
    let pid_path = config_dir.join("agenttalk.pid");
    let pid_lock: pidlock::SharedPidLock = match pidlock::acquire(pid_path)? {
        AcquireOutcome::AlreadyRunning => {
            tracing::info!("a live instance already holds the PID lock — exiting quietly");
            return Ok(());
        }
        AcquireOutcome::Acquired(lock) => Arc::new(PlMutex::new(Some(lock))),
    };

    // Step 3: restore persisted config into Runtime State.
    let config_store = Arc::new(ConfigStore::new(ConfigStore::default_path()));
    let persisted = config_store.load();
    let runtime = Arc::new(RuntimeState::from_persisted(&persisted));

    // Step 4: the exit-hook ducker. Shared with the Worker (not a second,
    // independent instance) so a Quit mid-utterance restores the actual
    // ducked-session snapshot rather than one that was never populated.
    // Only the Quit path unducks before exit; `/stop` and abnormal
    // termination (killed process, panic that unwinds past `main`) still
    // bypass this, left for the next startup's stale-lock recovery rather
    // than papered over.
    let exit_ducker: SharedDucker = Arc::new(PlMutex::new(platform_ducker()?));

    // Step 5: build, but do not show, the Icon State object.
    let (tray_handle, menu_ids) = tray::build()?;
    let snapshot = runtime.snapshot();
    tray_handle.set_mute_checked(snapshot.muted);
    tray_handle.set_active_model(snapshot.engine_kind == EngineKind::Secondary);
    tray_handle.set_active_label(&snapshot.voice);
    let icon_state = ServiceIconState::new(tray_handle);

    let (sender, receiver) = crossbeam_channel::bounded::<QueueItem>(QUEUE_CAPACITY);
    let ready = Arc::new(AtomicBool::new(false));

    // Clones the UI-loop closure keeps for menu dispatch, distinct from
    // the ones moved into the one-shot control-plane launch below.
    let menu_runtime = Arc::clone(&runtime);
    let menu_config_store = Arc::clone(&config_store);
    let menu_ducker = Arc::clone(&exit_ducker);
    let menu_icon = Arc::clone(&icon_state);
    let menu_pid_lock = Arc::clone(&pid_lock);

    let mut startup = Some(StartupArgs {
        runtime,
        config_store,
        sender,
        ready,
        config_dir,
        ducker: exit_ducker,
        icon: Arc::clone(&icon_state) as Arc<dyn IconState>,
        receiver,
        pid_lock: Arc::clone(&pid_lock),
    });

    // Step 6: enter the main-thread UI loop.
    let event_loop = EventLoop::new();
    event_loop.run(move |event, _target, control_flow| {
        *control_flow = ControlFlow::Wait;

        if let Event::NewEvents(StartCause::Init) = event {
            // 6a: mark the icon visible.
            if let Err(e) = icon_state.show() {
                tracing::error!(error = %e, "failed to show tray icon");
            }
            // 6b: the reference the rest of the program uses is `icon_state`
            // itself — already held by every `Arc` clone above.
            // 6c: launch the control plane.
            if let Some(args) = startup.take() {
                launch_control_plane(args);
            }
        }

        if let Ok(event) = muda::MenuEvent::receiver().try_recv() {
            handle_menu_event(
                &event,
                &menu_ids,
                &menu_runtime,
                &menu_config_store,
                &menu_ducker,
                &menu_icon,
                &menu_pid_lock,
            );
        }
    });
}

struct StartupArgs {
    runtime: Arc<RuntimeState>,
    config_store: Arc<ConfigStore>,
    sender: crossbeam_channel::Sender<QueueItem>,
    ready: Arc<AtomicBool>,
    config_dir: PathBuf,
    ducker: SharedDucker,
    icon: Arc<dyn IconState>,
    receiver: crossbeam_channel::Receiver<QueueItem>,
    pid_lock: pidlock::SharedPidLock,
}

/// Runs on a dedicated OS thread: the control plane's lifespan hook
/// (spec.md §4.7 step 6, sub-steps d-h), then the HTTP server itself.
/// Everything here is sequential on purpose — a misconfigured output
/// device or a primary-engine warm-up failure must be visible in the log
/// before the server ever starts accepting `/speak` calls.
fn launch_control_plane(args: StartupArgs) {
    std::thread::spawn(move || {
        let StartupArgs {
            runtime,
            config_store,
            sender,
            ready,
            config_dir,
            ducker,
            icon,
            receiver,
            pid_lock,
        } = args;

        // 6d: configure audio.
        let sink = match AudioSink::new() {
            Ok(sink) => sink,
            Err(e) => {
                tracing::error!(error = %e, "no usable output device — control plane will not start");
                return;
            }
        };
        let stop_handle = sink.stop_handle();

        // 6e: load and warm the primary engine.
        let primary = match KokoroEngine::warmed_up() {
            Ok(engine) => engine,
            Err(e) => {
                tracing::error!(error = %e, "primary engine warm-up failed");
                return;
            }
        };
        let engine = Arc::new(EngineAdapter::new(EngineHandle::new(primary)));

        // 6f: ready.
        ready.store(true, Ordering::SeqCst);
        tracing::info!("AgentTalk ready");

        // 6g: start the Worker on its own thread.
        let worker = Worker::new(receiver, Arc::clone(&runtime), engine, ducker, sink, Some(icon));
        std::thread::spawn(move || worker.run());

        // 6h: a short confirmation utterance, best-effort — a full queue
        // at startup is not fatal.
        if sender.try_send(QueueItem::Utterance(READY_ANNOUNCEMENT.to_string())).is_err() {
            tracing::warn!("queue was full before the ready announcement could be enqueued");
        }

        let state = http::AppState {
            runtime,
            config_store,
            sender,
            ready,
            stop_handle,
            config_dir,
            pid_lock,
        };

        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "failed to start control plane async runtime");
                return;
            }
        };
        rt.block_on(async move {
            let addr = SocketAddr::from(([127, 0, 0, 1], CONTROL_PLANE_PORT));
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(error = %e, port = CONTROL_PLANE_PORT, "failed to bind control plane port");
                    return;
                }
            };
            tracing::info!(%addr, "control plane listening");
            if let Err(e) = axum::serve(listener, http::router(state)).await {
                tracing::error!(error = %e, "control plane server exited with an error");
            }
        });
    });
}

fn handle_menu_event(
    event: &muda::MenuEvent,
    ids: &MenuIds,
    runtime: &RuntimeState,
    config_store: &ConfigStore,
    ducker: &SharedDucker,
    icon: &Arc<ServiceIconState>,
    pid_lock: &pidlock::SharedPidLock,
) {
    if event.id() == &ids.quit {
        // Shutdown is cooperative: unduck, release the PID lock (std::process::exit
        // skips Drop, so this has to happen explicitly), then terminate
        // immediately (spec.md §4.7 "do not wait for daemon tasks").
        tracing::info!("quit requested from tray menu");
        ducker.lock().unduck();
        pidlock::release_shared(pid_lock);
        std::process::exit(0);
    } else if event.id() == &ids.mute {
        let muted = !runtime.is_muted();
        apply_and_persist(runtime, config_store, ConfigUpdate {
            muted: Some(muted),
            ..Default::default()
        });
        icon.set_mute_checked(muted);
    } else if event.id() == &ids.model_kokoro {
        apply_and_persist(runtime, config_store, ConfigUpdate {
            model: Some("kokoro".to_string()),
            ..Default::default()
        });
        icon.set_active_model(false);
    } else if event.id() == &ids.model_piper {
        apply_and_persist(runtime, config_store, ConfigUpdate {
            model: Some("piper".to_string()),
            ..Default::default()
        });
        icon.set_active_model(true);
    } else if let Some((_, voice)) = ids.voices.iter().find(|(id, _)| id == event.id()) {
        apply_and_persist(runtime, config_store, ConfigUpdate {
            voice: Some((*voice).to_string()),
            ..Default::default()
        });
        icon.set_active_label(voice);
    }
}

fn apply_and_persist(runtime: &RuntimeState, config_store: &ConfigStore, update: ConfigUpdate) {
    runtime.apply_update(&update);
    if let Err(e) = config_store.save(&runtime.to_persisted()) {
        tracing::error!(error = %e, "failed to persist config after tray menu change");
    }
}
