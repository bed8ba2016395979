use crate::db::Database;
use crate::handlers::{admin, oauth};
use crate::service::{EventBroadcaster, OrchestratorHandle};
use crate::x_oauth::XOauthEndpoints;
use axum::{
    Router,
    extract::FromRef,
    routing::{get, post},
};
use axum_extra::extract::cookie::Key;
use std::sync::Arc;
use tracing::warn;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct RallyState {
    pub orchestrator: OrchestratorHandle,
    pub events: EventBroadcaster,
    pub db: Database,
    pub oauth: Arc<XOauthEndpoints>,
    pub cookie_key: Key,
    pub secure_cookie: bool,
}

impl RallyState {
    pub fn new(
        orchestrator: OrchestratorHandle,
        events: EventBroadcaster,
        db: Database,
        oauth: Arc<XOauthEndpoints>,
        cookie_key: Key,
        secure_cookie: bool,
    ) -> Self {
        Self {
            orchestrator,
            events,
            db,
            oauth,
            cookie_key,
            secure_cookie,
        }
    }
}

impl FromRef<RallyState> for Key {
    fn from_ref(state: &RallyState) -> Self {
        state.cookie_key.clone()
    }
}

/// Cookie key derived from the configured secret; a random key when the
/// secret is shorter than 64 bytes (sessions then die with the process).
pub fn cookie_key(secret: &str) -> Key {
    match Key::try_from(secret.as_bytes()) {
        Ok(key) => key,
        Err(_) => {
            warn!("session_secret shorter than 64 bytes; using a random cookie key");
            Key::generate()
        }
    }
}

pub fn rally_router(state: RallyState) -> Router {
    Router::new()
        .route("/", get(oauth::index))
        .route("/login", get(oauth::login))
        .route("/callback", get(oauth::callback))
        .route("/logout", get(oauth::logout))
        .route("/admin", get(admin::dashboard))
        .route("/admin/broadcast", post(admin::broadcast))
        .route("/admin/settings", post(admin::update_settings))
        .route("/admin/logs", get(admin::logs))
        .route("/admin/logs/stream", get(admin::logs_stream))
        .route("/admin/status", get(admin::status))
        .with_state(state)
}
