//! HTTP server for event intake and the Prometheus metrics endpoint.
//!
//! - `POST /events/voice-state` - occupant moved between channels
//! - `POST /events/ready` - the platform adapter is connected
//! - `GET /metrics` - Prometheus text format (when enabled)
//!
//! Operator commands, for whatever front end parses chat commands:
//!
//! - `POST   /tenants/{t}/spawners` - create a spawner
//! - `POST   /channels/{t}/{r}/import` - adopt an existing channel
//! - `DELETE /channels/{t}/{r}` - stop managing a channel
//! - `PUT    /channels/{t}/{r}/template` - `{template}` for future children
//! - `PUT    /channels/{t}/{r}/name` - `{template}` for this channel
//! - `PUT    /channels/{t}/{r}/limit` - `{limit}`
//! - `POST   /channels/{t}/{r}/hold` - `{duration: "DD:HH:MM"}`

use crate::db::StoredChannel;
use crate::engine::{LifecycleEngine, parse_hold_duration};
use crate::error::{EngineError, EngineResult};
use crate::state::{ChannelKey, ManagedChannel, OccupantId, ResourceId, TenantId};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Shared state for intake handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LifecycleEngine>,
    pub ready: Arc<watch::Sender<bool>>,
}

/// A voice state change as reported by the adapter.
#[derive(Debug, Deserialize)]
pub struct VoiceStateEvent {
    pub tenant_id: TenantId,
    pub occupant_id: OccupantId,
    pub before: Option<ResourceId>,
    pub after: Option<ResourceId>,
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Handler for POST /events/voice-state.
///
/// The transition runs on its own task so the adapter never waits on a
/// channel lock.
async fn voice_state_handler(
    State(state): State<AppState>,
    Json(event): Json<VoiceStateEvent>,
) -> StatusCode {
    debug!(
        tenant = event.tenant_id,
        occupant = event.occupant_id,
        before = ?event.before,
        after = ?event.after,
        "Voice state event"
    );
    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        if let Err(e) = engine
            .on_voice_state_update(
                event.tenant_id,
                event.occupant_id,
                event.before,
                event.after,
            )
            .await
        {
            warn!(
                tenant = event.tenant_id,
                occupant = event.occupant_id,
                error = %e,
                code = e.error_code(),
                "Voice state transition failed"
            );
        }
    });
    StatusCode::ACCEPTED
}

/// Handler for POST /events/ready.
async fn ready_handler(State(state): State<AppState>) -> StatusCode {
    if !state.ready.send_replace(true) {
        info!("Platform adapter reported ready");
    }
    StatusCode::NO_CONTENT
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ResourceGone(_) | Self::TenantGone(_) => StatusCode::GONE,
            Self::AlreadyManaged(_) => StatusCode::CONFLICT,
            Self::TemplateInvalid(_) | Self::WrongChannelType { .. } | Self::InvalidHold(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::PlatformCallFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.error_code(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// A command that failed in the engine or whose task died.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("command task failed: {0}")]
    Task(#[from] JoinError),
}

impl CommandError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Engine(e) => e.error_code(),
            Self::Task(_) => "task_failed",
        }
    }
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        match self {
            Self::Engine(e) => e.into_response(),
            Self::Task(e) => {
                let body = json!({ "error": "task_failed", "message": e.to_string() });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

type CommandResult<T> = Result<T, CommandError>;

/// Run an engine command on its own task.
///
/// The request future may be dropped when the client goes away; the spawned
/// transition still runs to completion.
async fn run_command<T, F, Fut>(state: &AppState, command: F) -> CommandResult<T>
where
    F: FnOnce(Arc<LifecycleEngine>) -> Fut,
    Fut: Future<Output = EngineResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(command(Arc::clone(&state.engine)));
    Ok(task.await??)
}

#[derive(Debug, Deserialize)]
pub struct TemplateBody {
    pub template: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitBody {
    pub limit: u32,
}

#[derive(Debug, Deserialize)]
pub struct HoldBody {
    pub duration: String,
}

fn channel_view(channel: &ManagedChannel) -> Json<StoredChannel> {
    Json(StoredChannel::from_channel(channel))
}

async fn create_spawner_handler(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
) -> CommandResult<(StatusCode, Json<StoredChannel>)> {
    let channel = run_command(&state, move |engine| async move {
        engine.create_spawner(tenant).await
    })
    .await?;
    Ok((StatusCode::CREATED, channel_view(&channel)))
}

async fn import_handler(
    State(state): State<AppState>,
    Path((tenant, resource)): Path<(TenantId, ResourceId)>,
) -> CommandResult<(StatusCode, Json<StoredChannel>)> {
    let key = ChannelKey::new(tenant, resource);
    let channel = run_command(&state, move |engine| async move {
        engine.import_channel(key).await
    })
    .await?;
    Ok((StatusCode::CREATED, channel_view(&channel)))
}

async fn orphan_handler(
    State(state): State<AppState>,
    Path((tenant, resource)): Path<(TenantId, ResourceId)>,
) -> CommandResult<Json<StoredChannel>> {
    let key = ChannelKey::new(tenant, resource);
    let channel = run_command(&state, move |engine| async move { engine.orphan(key).await }).await?;
    Ok(channel_view(&channel))
}

async fn template_handler(
    State(state): State<AppState>,
    Path((tenant, resource)): Path<(TenantId, ResourceId)>,
    Json(body): Json<TemplateBody>,
) -> CommandResult<Json<serde_json::Value>> {
    let key = ChannelKey::new(tenant, resource);
    let spawner = run_command(&state, move |engine| async move {
        engine.set_template(key, &body.template).await
    })
    .await?;
    Ok(Json(json!({ "spawner": [spawner.tenant_id, spawner.resource_id] })))
}

async fn name_handler(
    State(state): State<AppState>,
    Path((tenant, resource)): Path<(TenantId, ResourceId)>,
    Json(body): Json<TemplateBody>,
) -> CommandResult<StatusCode> {
    let key = ChannelKey::new(tenant, resource);
    run_command(&state, move |engine| async move {
        engine.rename(key, &body.template).await
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn limit_handler(
    State(state): State<AppState>,
    Path((tenant, resource)): Path<(TenantId, ResourceId)>,
    Json(body): Json<LimitBody>,
) -> CommandResult<StatusCode> {
    let key = ChannelKey::new(tenant, resource);
    run_command(&state, move |engine| async move {
        engine.set_occupancy_limit(key, body.limit).await
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn hold_handler(
    State(state): State<AppState>,
    Path((tenant, resource)): Path<(TenantId, ResourceId)>,
    Json(body): Json<HoldBody>,
) -> CommandResult<Json<serde_json::Value>> {
    let duration = parse_hold_duration(&body.duration)?;
    let key = ChannelKey::new(tenant, resource);
    let until = run_command(&state, move |engine| async move {
        engine.hold(key, duration, chrono::Utc::now()).await
    })
    .await?;
    Ok(Json(json!({ "hold_until": until.to_rfc3339() })))
}

pub fn router(state: AppState, metrics: bool) -> Router {
    let mut app = Router::new()
        .route("/events/voice-state", post(voice_state_handler))
        .route("/events/ready", post(ready_handler))
        .route("/tenants/:tenant/spawners", post(create_spawner_handler))
        .route("/channels/:tenant/:resource", delete(orphan_handler))
        .route("/channels/:tenant/:resource/import", post(import_handler))
        .route("/channels/:tenant/:resource/template", put(template_handler))
        .route("/channels/:tenant/:resource/name", put(name_handler))
        .route("/channels/:tenant/:resource/limit", put(limit_handler))
        .route("/channels/:tenant/:resource/hold", post(hold_handler));
    if metrics {
        app = app.route("/metrics", get(metrics_handler));
    }
    app.with_state(state)
}

/// Run the HTTP server until `shutdown` fires.
pub async fn run_http_server(
    addr: SocketAddr,
    app: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
