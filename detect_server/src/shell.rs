//! Upload/display shell: shared state and HTTP router.
//!
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use tokio::task::JoinHandle;

use crate::{
    config::Config,
    endpoints::{detect, detections, healthcheck, index, overlay, status},
    orchestrator::Orchestrator,
    render::{RenderSurface, SharedSurface},
    session::Session,
};

/// State shared by all endpoints.
pub struct AppState {
    pub orchestrator: Orchestrator,
    session: Mutex<Session>,
    /// Where overlays are drawn; `None` runs headless.
    pub surface: Option<SharedSurface>,
    pub threshold: f32,
    pub base_path: String,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, surface: Option<RenderSurface>, config: &Config) -> Self {
        Self {
            orchestrator,
            session: Mutex::new(Session::new()),
            surface: surface.map(SharedSurface::new),
            threshold: config.threshold,
            base_path: config.normalized_base_path(),
        }
    }

    /// Lock the session. Never hold the guard across an `.await`.
    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Initialize the inference provider in the background and report the outcome
/// to the session.
pub fn spawn_model_warmup(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match state.orchestrator.ensure_ready().await {
            Ok(_) => state.session().model_ready(),
            Err(e) => state.session().model_failed(e.to_string()),
        }
    })
}

/// All endpoints, nested below the configured base path.
pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let base_path = state.base_path.clone();

    let routes = Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/status", get(status))
        .route("/detections", get(detections))
        .route("/overlay", get(overlay))
        .route("/detect", post(detect))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(Extension(state));

    if base_path.is_empty() {
        routes
    } else {
        Router::new().nest(&base_path, routes)
    }
}
