use crate::config::{BROADCAST_DELAY_KEY, DEFAULT_BROADCAST_DELAY_SECS};
use crate::middleware::auth::AdminSession;
use crate::types::broadcast::BroadcastRequest;
use crate::{RallyError, router::RallyState};
use axum::{
    Form, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Redirect, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{StreamExt, stream};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, warn};

/// Reconnection hint sent as the first frame of the live stream.
const SSE_RETRY: Duration = Duration::from_millis(2000);

#[derive(Debug, Deserialize)]
pub struct BroadcastForm {
    #[serde(alias = "tweet_url")]
    pub post_url: Option<String>,
    pub comment: Option<String>,
    pub delay_sec: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettingsForm {
    pub broadcast_delay_sec: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<u32>,
}

/// GET /admin
pub async fn dashboard(
    AdminSession(admin): AdminSession,
    State(state): State<RallyState>,
) -> Result<Response, RallyError> {
    let accounts = state.db.accounts.list_in_order().await?;
    let delay = state.db.settings.get(BROADCAST_DELAY_KEY).await?;
    let status = state.orchestrator.status().await?;
    Ok(Json(json!({
        "admin": admin,
        "accounts": accounts,
        "settings": { BROADCAST_DELAY_KEY: delay },
        "status": status,
    }))
    .into_response())
}

/// POST /admin/broadcast -> 202 with a run ticket, 400 or 409.
pub async fn broadcast(
    AdminSession(admin): AdminSession,
    State(state): State<RallyState>,
    Form(form): Form<BroadcastForm>,
) -> Result<Response, RallyError> {
    let request = BroadcastRequest {
        post_ref: form.post_url.unwrap_or_default(),
        comment: form.comment,
        delay_secs: parse_delay_override(form.delay_sec.as_deref()),
    };
    info!(
        admin = %admin.username,
        post_ref = %request.post_ref,
        delay_override = ?request.delay_secs,
        "broadcast requested"
    );
    let ticket = state.orchestrator.trigger(request).await?;
    Ok((StatusCode::ACCEPTED, Json(ticket)).into_response())
}

/// POST /admin/settings -> 303 back to the dashboard.
pub async fn update_settings(
    AdminSession(admin): AdminSession,
    State(state): State<RallyState>,
    Form(form): Form<SettingsForm>,
) -> Result<Redirect, RallyError> {
    let delay = normalize_delay_setting(form.broadcast_delay_sec.as_deref());
    state
        .db
        .settings
        .upsert(BROADCAST_DELAY_KEY, &delay.to_string())
        .await?;
    info!(admin = %admin.username, delay, "broadcast delay updated");
    Ok(Redirect::to("/admin"))
}

/// GET /admin/logs?limit=N -> newest first.
pub async fn logs(
    _admin: AdminSession,
    State(state): State<RallyState>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, RallyError> {
    let limit = query.limit.unwrap_or(crate::db::audit::MAX_RECENT);
    let entries = state.db.audit.recent(limit).await?;
    Ok(Json(entries).into_response())
}

/// GET /admin/logs/stream -> live announcements as server-sent events.
pub async fn logs_stream(_admin: AdminSession, State(state): State<RallyState>) -> Response {
    let subscription = state.events.subscribe();
    info!(observers = state.events.observer_count(), "event observer connected");

    let hint = stream::once(async { Ok::<_, Infallible>(Event::default().retry(SSE_RETRY)) });
    let lines = subscription.into_stream().filter_map(|item| async move {
        match item {
            Ok(line) => Some(Ok(Event::default().data(line))),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "event observer lagged; lines dropped");
                None
            }
        }
    });

    Sse::new(hint.chain(lines))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// GET /admin/status
pub async fn status(
    _admin: AdminSession,
    State(state): State<RallyState>,
) -> Result<Response, RallyError> {
    Ok(Json(state.orchestrator.status().await?).into_response())
}

/// Blank means no override; anything unparseable is ignored.
fn parse_delay_override(raw: Option<&str>) -> Option<u64> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match raw.parse() {
        Ok(secs) => Some(secs),
        Err(_) => {
            warn!(value = %raw, "ignoring unparseable delay override");
            None
        }
    }
}

/// Blank or non-numeric input stores the system default.
fn normalize_delay_setting(raw: Option<&str>) -> u64 {
    let raw = raw.map(str::trim).unwrap_or_default();
    match raw.parse() {
        Ok(secs) => secs,
        Err(_) => {
            if !raw.is_empty() {
                warn!(value = %raw, "invalid delay setting; storing default");
            }
            DEFAULT_BROADCAST_DELAY_SECS
        }
    }
}
