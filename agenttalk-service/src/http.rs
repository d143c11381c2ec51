//! Loopback-only control plane (spec.md §4.6).
//!
//! Router shape grounded on
//! `ayushmaanbhav-vaak-voice-enabled-ai-agent`'s axum server crate
//! (`Router::new().route(...).with_state(...).layer(TraceLayer)`), the
//! one piece of the stack the teacher carries nothing analogous to.
//! Deliberately narrower than that example: no CORS layer, since this
//! server only ever accepts `127.0.0.1` connections.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use agenttalk_core::config::{piper_models_dir, ConfigStore, ConfigUpdate, PRIMARY_VOICES};
use agenttalk_core::worker::QueueItem;
use agenttalk_core::{preprocess, RuntimeState, StopHandle};

use crate::pidlock::{self, SharedPidLock};

/// Top-level field names `ConfigUpdate` recognizes, used to diagnose a
/// `/config` body that deserializes cleanly but carries an unknown key
/// (spec.md §4.6 "unrecognized fields are logged and ignored").
const KNOWN_CONFIG_FIELDS: &[&str] = &[
    "voice",
    "speed",
    "volume",
    "model",
    "muted",
    "pre_cue_path",
    "post_cue_path",
    "secondary_model_path",
    "piper_model_path",
    "speech_mode",
];

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeState>,
    pub config_store: Arc<ConfigStore>,
    pub sender: crossbeam_channel::Sender<QueueItem>,
    pub ready: Arc<AtomicBool>,
    pub stop_handle: StopHandle,
    pub config_dir: PathBuf,
    pub pid_lock: SharedPidLock,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/speak", post(speak))
        .route("/config", get(get_config).post(post_config))
        .route("/voices", get(voices))
        .route("/piper-voices", get(piper_voices))
        .route("/stop", post(stop))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, Json(json!({"status": "ok"})))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "initializing"})))
    }
}

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
}

async fn speak(State(state): State<AppState>, Json(req): Json<SpeakRequest>) -> impl IntoResponse {
    if !state.ready.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "not_ready"})));
    }

    let sentences = preprocess(&req.text);
    if sentences.is_empty() {
        return (
            StatusCode::OK,
            Json(json!({"status": "skipped", "reason": "no speakable sentences"})),
        );
    }

    let snapshot = state.runtime.snapshot();
    let mut items = Vec::with_capacity(sentences.len() + 2);
    if let Some(pre) = &snapshot.pre_cue_path {
        items.push(QueueItem::Cue(pre.clone()));
    }
    items.extend(sentences.into_iter().map(QueueItem::Utterance));
    if let Some(post) = &snapshot.post_cue_path {
        items.push(QueueItem::Cue(post.clone()));
    }

    let mut queued = 0u32;
    let mut dropped = 0u32;
    let mut full = false;

    for item in items {
        if full {
            if matches!(item, QueueItem::Utterance(_)) {
                dropped += 1;
            }
            continue;
        }
        match state.sender.try_send(item.clone()) {
            Ok(()) => {
                if matches!(item, QueueItem::Utterance(_)) {
                    queued += 1;
                }
            }
            Err(_) => {
                full = true;
                if matches!(item, QueueItem::Utterance(_)) {
                    dropped += 1;
                }
            }
        }
    }

    if queued == 0 {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"status": "dropped", "reason": "queue full"})),
        )
    } else {
        (
            StatusCode::ACCEPTED,
            Json(json!({"status": "queued", "sentences": queued, "dropped": dropped})),
        )
    }
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runtime.snapshot())
}

async fn post_config(State(state): State<AppState>, body: Option<Json<Value>>) -> impl IntoResponse {
    let Some(Json(raw)) = body else {
        return (StatusCode::OK, Json(json!({"status": "ok", "updated": []})));
    };

    if let Some(object) = raw.as_object() {
        let unknown: Vec<&str> = object
            .keys()
            .map(String::as_str)
            .filter(|key| !KNOWN_CONFIG_FIELDS.contains(key))
            .collect();
        if !unknown.is_empty() {
            tracing::warn!(?unknown, "ignoring unrecognized /config fields");
        }
    }

    let update: ConfigUpdate = match serde_json::from_value(raw) {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!(error = %e, "malformed /config body");
            return (StatusCode::OK, Json(json!({"status": "ok", "updated": []})));
        }
    };

    let updated = state.runtime.apply_update(&update);
    let persisted = state.runtime.to_persisted();

    if let Err(e) = state.config_store.save(&persisted) {
        tracing::error!(error = %e, "config persist failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error"})));
    }

    (StatusCode::OK, Json(json!({"status": "ok", "updated": updated})))
}

async fn voices() -> impl IntoResponse {
    Json(PRIMARY_VOICES)
}

/// Sorted `.onnx` filename stems under `<config-dir>/models/piper/`,
/// grounded on `original_source/agenttalk/tray.py`'s `_voice_items()`
/// Piper branch.
async fn piper_voices(State(state): State<AppState>) -> impl IntoResponse {
    let dir = piper_models_dir(&state.config_dir);
    let mut names: Vec<String> = match std::fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("onnx"))
            .filter_map(|e| e.path().file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    Json(names)
}

#[derive(Serialize)]
struct StopResponse {
    status: &'static str,
}

async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    state.stop_handle.stop();
    // Release the PID lock now — std::process::exit in the delayed task
    // below skips Drop, so this cannot wait until then (spec.md §3 "removed
    // at normal exit"). Respond before exiting so the client observes
    // success; the actual exit happens from a short-delayed task (spec.md
    // §4.6).
    pidlock::release_shared(&state.pid_lock);
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::process::exit(0);
    });
    Json(StopResponse { status: "ok" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenttalk_core::config::ConfigStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> (AppState, crossbeam_channel::Receiver<QueueItem>) {
        let (tx, rx) = crossbeam_channel::bounded(10);
        let dir = tempfile::tempdir().unwrap();
        let state = AppState {
            runtime: Arc::new(RuntimeState::new()),
            config_store: Arc::new(ConfigStore::new(dir.path().join("config.json"))),
            sender: tx,
            ready: Arc::new(AtomicBool::new(false)),
            stop_handle: StopHandle::detached(),
            config_dir: dir.path().to_path_buf(),
            pid_lock: Arc::new(parking_lot::Mutex::new(None)),
        };
        // Keep the tempdir alive for the lifetime of the returned state
        // by leaking it — acceptable in tests, avoided everywhere else.
        std::mem::forget(dir);
        (state, rx)
    }

    #[tokio::test]
    async fn health_is_503_before_ready_and_200_after() {
        let (state, _rx) = test_state();
        let app = router(state.clone());

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.ready.store(true, Ordering::SeqCst);
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn speak_happy_path_queues_two_sentences() {
        let (state, rx) = test_state();
        state.ready.store(true, Ordering::SeqCst);
        let app = router(state);

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/speak")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"text":"Hello world. It works."}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["sentences"], 2);
        assert_eq!(json["dropped"], 0);
        assert_eq!(rx.len(), 2);
    }

    #[tokio::test]
    async fn speak_with_no_speakable_sentences_is_skipped() {
        let (state, _rx) = test_state();
        state.ready.store(true, Ordering::SeqCst);
        let app = router(state);

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/speak")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"text\":\"```\\ncode\\n```\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "skipped");
    }

    #[tokio::test]
    async fn speak_before_ready_is_not_ready() {
        let (state, _rx) = test_state();
        let app = router(state);

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/speak")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"text":"Hello."}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn back_pressure_eleventh_speak_call_is_dropped() {
        let (state, _rx) = test_state();
        state.ready.store(true, Ordering::SeqCst);
        let app = router(state);

        for i in 0..10 {
            let resp = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/speak")
                        .header("content-type", "application/json")
                        .body(Body::from(format!(r#"{{"text":"Sentence number {i}."}}"#)))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::ACCEPTED, "call {i} should queue");
        }

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/speak")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"text":"One sentence too many."}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "dropped");
    }

    #[tokio::test]
    async fn config_update_changes_voice_and_persists() {
        let (state, _rx) = test_state();
        let app = router(state.clone());

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/config")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"voice":"bm_george"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["updated"], json!(["voice"]));
        assert_eq!(state.runtime.snapshot().voice, "bm_george");
    }

    #[tokio::test]
    async fn voices_returns_the_fixed_primary_catalog() {
        let (state, _rx) = test_state();
        let app = router(state);
        let resp = app
            .oneshot(Request::builder().uri("/voices").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.len(), PRIMARY_VOICES.len());
    }

    #[tokio::test]
    async fn piper_voices_lists_onnx_stems_sorted() {
        let (state, _rx) = test_state();
        let dir = agenttalk_core::config::piper_models_dir(&state.config_dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("en_US-ryan.onnx"), b"x").unwrap();
        std::fs::write(dir.join("en_US-amy.onnx"), b"x").unwrap();
        std::fs::write(dir.join("en_US-amy.onnx.json"), b"{}").unwrap();
        let app = router(state);

        let resp = app
            .oneshot(Request::builder().uri("/piper-voices").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, vec!["en_US-amy", "en_US-ryan"]);
    }

    /// spec.md §8 scenario 6: switching to the secondary engine, then back
    /// to the primary, must not clear the remembered secondary model path.
    #[tokio::test]
    async fn engine_switch_to_piper_and_back_keeps_the_secondary_path() {
        let (state, _rx) = test_state();
        let app = router(state.clone());

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/config")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"model":"piper","piper_model_path":"/models/piper/en_US-amy.onnx"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let snap = state.runtime.snapshot();
        assert_eq!(snap.engine_kind, agenttalk_core::config::EngineKind::Secondary);
        assert_eq!(snap.secondary_model_path, Some(PathBuf::from("/models/piper/en_US-amy.onnx")));

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/config")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"model":"kokoro"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let snap = state.runtime.snapshot();
        assert_eq!(snap.engine_kind, agenttalk_core::config::EngineKind::Primary);
        assert_eq!(snap.secondary_model_path, Some(PathBuf::from("/models/piper/en_US-amy.onnx")));
    }

    #[tokio::test]
    async fn stop_responds_before_the_delayed_exit_and_clears_the_stop_flag() {
        let (state, _rx) = test_state();
        let flag = state.stop_handle.clone();
        let app = router(state);

        let resp = app
            .oneshot(Request::builder().method("POST").uri("/stop").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        // `stop()` itself is synchronous; the process-exit half is a
        // separately spawned delayed task this test never awaits.
        let _ = flag;
    }
}
