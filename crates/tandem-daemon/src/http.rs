use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tandem_core::{Command, Intent, SnapshotHandle, SyncEvent};
use tandem_proto::state::{
    ChannelId, ConnectionHealth, ConnectionState, DecayState, PlaybackState, Preset,
    ProcessingParams, StreamChannel,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct HttpState {
    pub snapshot: SnapshotHandle,
    pub event_tx: mpsc::Sender<SyncEvent>,
}

#[derive(Serialize)]
struct ApiState {
    rev: u64,
    playback: PlaybackState,
    connection: ConnectionState,
    health: ConnectionHealth,
    decay: DecayState,
    processing: Option<ProcessingParams>,
}

#[derive(Serialize)]
struct ApiConnection {
    #[serde(flatten)]
    state: ConnectionState,
    health: ConnectionHealth,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/playback", get(get_playback))
        .route("/api/streaming/:channel", get(get_channel))
        .route("/api/streaming/:channel/reset", post(reset_channel))
        .route("/api/connection", get(get_connection))
        .route("/api/decay", get(get_decay))
        .route("/api/processing", get(get_processing))
        .route("/api/journal", get(get_journal))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/toggle", post(toggle))
        .route("/api/seek/:secs", post(seek))
        .route("/api/volume/:value", post(set_volume))
        .route("/api/mute", post(toggle_mute))
        .route("/api/preset/:preset", post(set_preset))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = build_router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("HTTP server error: {}", e);
        }
        info!("HTTP API server stopped");
    })
}

// ── Reads ─────────────────────────────────────────────────────────────────────

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let snap = state.snapshot.get().await;
    Json(ApiState {
        rev: snap.rev,
        playback: snap.playback,
        connection: snap.connection,
        health: snap.health,
        decay: snap.decay,
        processing: snap.processing,
    })
}

async fn get_playback(State(state): State<HttpState>) -> Json<PlaybackState> {
    Json(state.snapshot.get().await.playback)
}

async fn get_channel(
    State(state): State<HttpState>,
    Path(channel): Path<String>,
) -> Result<Json<StreamChannel>, StatusCode> {
    let id: ChannelId = channel.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    let snap = state.snapshot.get().await;
    Ok(Json(snap.playback.streaming.channel(id).clone()))
}

async fn get_connection(State(state): State<HttpState>) -> Json<ApiConnection> {
    let snap = state.snapshot.get().await;
    Json(ApiConnection {
        state: snap.connection,
        health: snap.health,
    })
}

async fn get_decay(State(state): State<HttpState>) -> Json<DecayState> {
    Json(state.snapshot.get().await.decay)
}

async fn get_processing(State(state): State<HttpState>) -> Json<Option<ProcessingParams>> {
    Json(state.snapshot.get().await.processing)
}

async fn get_journal(State(state): State<HttpState>) -> Json<Vec<Command>> {
    Json(state.snapshot.get().await.recent)
}

// ── Intents ───────────────────────────────────────────────────────────────────

async fn send_intent(state: &HttpState, intent: Intent) -> StatusCode {
    info!("HTTP API: {:?}", intent);
    if state.event_tx.send(SyncEvent::Intent(intent)).await.is_err() {
        error!("Failed to queue intent, core is gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    send_intent(&state, Intent::Play).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    send_intent(&state, Intent::Pause).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    send_intent(&state, Intent::TogglePlay).await
}

async fn toggle_mute(State(state): State<HttpState>) -> StatusCode {
    send_intent(&state, Intent::ToggleMute).await
}

async fn seek(State(state): State<HttpState>, Path(secs): Path<f64>) -> StatusCode {
    send_intent(&state, Intent::Seek(secs)).await
}

async fn set_volume(State(state): State<HttpState>, Path(value): Path<f64>) -> StatusCode {
    send_intent(&state, Intent::Volume(value)).await
}

async fn set_preset(State(state): State<HttpState>, Path(preset): Path<String>) -> StatusCode {
    match preset.parse::<Preset>() {
        Ok(p) => send_intent(&state, Intent::Preset(p)).await,
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

async fn reset_channel(State(state): State<HttpState>, Path(channel): Path<String>) -> StatusCode {
    match channel.parse::<ChannelId>() {
        Ok(id) => send_intent(&state, Intent::ResetChannel(id)).await,
        Err(_) => StatusCode::NOT_FOUND,
    }
}
