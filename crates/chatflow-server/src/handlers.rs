//! HTTP and WebSocket handlers for the ChatFlow server.
//!
//! Each WebSocket connection runs one task that both reads client frames
//! and drains the connection's outbound queue, so socket writes never
//! happen under a hub lock.

use crate::auth::{bearer_token, AuthError, JwtValidator, TokenValidator};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::upload::{BlobStore, LocalBlobStore, UploadError};
use anyhow::Result;
use axum::{
    extract::{
        multipart::MultipartError,
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use chatflow_core::Hub;
use chatflow_protocol::{
    codec, error_code, ChatMessage, ClientEvent, ConnectionId, ProtocolError, ServerEvent,
    UserInfo, WireFormat, PROTOCOL_VERSION,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The presence and messaging hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
    /// Upload token validator; uploads are refused without one.
    pub tokens: Option<Arc<dyn TokenValidator>>,
    /// Upload storage.
    pub blobs: Arc<dyn BlobStore>,
}

impl AppState {
    /// Create app state with the JWT validator and local upload storage.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let tokens = config
            .auth
            .jwt_secret
            .as_ref()
            .map(|secret| Arc::new(JwtValidator::new(secret.as_bytes())) as Arc<dyn TokenValidator>);
        if tokens.is_none() {
            warn!("No auth.jwt_secret configured, uploads are disabled");
        }

        let blobs = Arc::new(LocalBlobStore::new(
            &config.upload.dir,
            config.public_base_url(),
            config.upload.max_upload_bytes,
        ));

        Self::with_collaborators(config, tokens, blobs)
    }

    /// Create app state with custom collaborators.
    #[must_use]
    pub fn with_collaborators(
        config: Config,
        tokens: Option<Arc<dyn TokenValidator>>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            hub: Hub::with_config(config.hub_config()),
            config,
            tokens,
            blobs,
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Multipart framing on top of the file itself.
    let upload_limit = state.config.upload.max_upload_bytes + 64 * 1024;

    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/api/messages", get(messages_handler))
        .route("/api/users", get(users_handler))
        .route(
            "/api/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/files/:key", get(file_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(Arc::clone(&state));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("ChatFlow server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    state.hub.shutdown();
}

/// Errors of the REST endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Uploads are disabled")]
    UploadsDisabled,

    #[error("Unauthorized: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("File not found")]
    NotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UploadsDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Upload(UploadError::Empty | UploadError::InvalidName) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Upload(UploadError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upload(UploadError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Multipart(e) => e.status(),
            ApiError::NotFound => StatusCode::NOT_FOUND,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": if state.hub.is_running() { "ok" } else { "stopping" },
        "version": env!("CARGO_PKG_VERSION"),
        "stats": state.hub.stats(),
    }))
}

/// Recent broadcast messages, oldest first.
async fn messages_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ChatMessage>> {
    Json(
        state
            .hub
            .backlog()
            .iter()
            .map(|message| message.as_ref().clone())
            .collect(),
    )
}

/// Online users, in join order.
async fn users_handler(State(state): State<Arc<AppState>>) -> Json<Vec<UserInfo>> {
    Json(state.hub.online_users())
}

/// Body of a successful upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub filename: String,
    pub uploader: String,
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let result = store_upload(&state, &headers, multipart).await;
    match &result {
        Ok(_) => metrics::record_upload("stored"),
        Err(e) => {
            debug!(error = %e, "Upload rejected");
            metrics::record_upload("rejected");
        }
    }
    result.map(Json)
}

async fn store_upload(
    state: &AppState,
    headers: &HeaderMap,
    mut multipart: Multipart,
) -> Result<UploadResponse, ApiError> {
    let tokens = state.tokens.as_ref().ok_or(ApiError::UploadsDisabled)?;
    let identity = tokens.validate(bearer_token(headers)?).await?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("file").to_string();
        let data = field.bytes().await?;
        let blob = state.blobs.put(&filename, data).await?;

        info!(uploader = %identity.display_name(), filename = %blob.filename, "File uploaded");
        return Ok(UploadResponse {
            url: blob.url,
            filename: blob.filename,
            uploader: identity.display_name().to_string(),
        });
    }

    Err(UploadError::Empty.into())
}

/// Content type served for a stored file, from its extension.
fn content_type(key: &str) -> &'static str {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        "json" => "application/json",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

async fn file_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    match state.blobs.get(&key).await? {
        Some(data) => Ok(([(header::CONTENT_TYPE, content_type(&key))], data).into_response()),
        None => Err(ApiError::NotFound),
    }
}

/// Query parameters of the WebSocket upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// `msgpack` for binary framing; JSON otherwise.
    pub format: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !state.hub.is_running() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
    }
    if state.hub.connection_count() >= state.config.limits.max_connections {
        warn!("Connection limit reached, refusing upgrade");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    let format = WireFormat::from_param(params.format.as_deref());
    // Room for the event envelope around the message content.
    let frame_limit = state.config.limits.max_message_size + 16 * 1024;
    ws.max_message_size(frame_limit)
        .on_upgrade(move |socket| handle_websocket(socket, state, format))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, format: WireFormat) {
    let _metrics_guard = ConnectionMetricsGuard::new(format);

    let connection_id = ConnectionId::generate();
    let mut outbound = match state.hub.connect(&connection_id) {
        Ok(rx) => rx,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Connection refused");
            metrics::record_error("connect");
            return;
        }
    };

    debug!(connection = %connection_id, format = format.as_str(), "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    let heartbeat = &state.config.heartbeat;
    let connected = ServerEvent::Connected {
        connection_id: connection_id.clone(),
        version: PROTOCOL_VERSION,
        heartbeat: u32::try_from(heartbeat.interval_ms).unwrap_or(u32::MAX),
    };
    if let Err(e) = send_event(&mut sender, &connected, format).await {
        error!(connection = %connection_id, error = %e, "Failed to send connected event");
        state.hub.disconnect(&connection_id);
        return;
    }

    // Read buffer for partial MessagePack frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    let idle_timeout = Duration::from_millis(heartbeat.timeout_ms);
    let mut ping = tokio::time::interval(Duration::from_millis(heartbeat.interval_ms.max(1)));
    ping.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            biased;

            // Drain the hub's queue for this connection
            event = outbound.recv() => {
                let Some(event) = event else {
                    debug!(connection = %connection_id, "Outbound queue closed");
                    break;
                };
                if let Err(e) = send_event(&mut sender, &event, format).await {
                    debug!(connection = %connection_id, error = %e, "Write failed");
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_frame(text.len(), "inbound");
                        match codec::decode_json::<ClientEvent>(&text) {
                            Ok(event) => handle_event(&state, &connection_id, event),
                            Err(e) => reject_frame(&state, &connection_id, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_frame(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => handle_event(&state, &connection_id, event),
                                Ok(None) => break,
                                Err(e @ ProtocolError::FrameTooLarge(_)) => {
                                    read_buffer.clear();
                                    reject_frame(&state, &connection_id, &e);
                                    break;
                                }
                                // The bad frame is consumed; keep going.
                                Err(e) => reject_frame(&state, &connection_id, &e),
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = ping.tick() => {
                if last_seen.elapsed() >= idle_timeout {
                    info!(connection = %connection_id, "Idle timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.disconnect(&connection_id);
    metrics::set_hub_stats(&state.hub.stats());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Dispatch one decoded event; rejections go back as `error` events.
fn handle_event(state: &AppState, connection_id: &ConnectionId, event: ClientEvent) {
    let start = Instant::now();
    let kind = event.kind();
    let scope = match &event {
        ClientEvent::SendMessage { to: None, .. } => Some("broadcast"),
        ClientEvent::SendMessage { to: Some(_), .. } => Some("private"),
        _ => None,
    };

    match state.hub.dispatch(connection_id, event) {
        Ok(()) => {
            if let Some(scope) = scope {
                metrics::record_chat_message(scope);
            }
        }
        Err(e) => {
            debug!(connection = %connection_id, event = kind, error = %e, "Event rejected");
            metrics::record_error(kind);
            state
                .hub
                .send_to(connection_id, ServerEvent::error(e.code(), e.to_string()));
        }
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
    metrics::set_hub_stats(&state.hub.stats());
}

fn reject_frame(state: &AppState, connection_id: &ConnectionId, error: &ProtocolError) {
    debug!(connection = %connection_id, error = %error, "Undecodable frame");
    metrics::record_error("decode");
    state.hub.send_to(
        connection_id,
        ServerEvent::error(error_code::MALFORMED_EVENT, error.to_string()),
    );
}

/// Encode an event in the connection's format and write it.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    format: WireFormat,
) -> Result<()> {
    let message = match format {
        WireFormat::Json => Message::Text(codec::encode_json(event)?),
        WireFormat::MessagePack => Message::Binary(codec::encode(event)?.to_vec()),
    };
    let len = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_frame(len, "outbound");
    sender.send(message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(content_type("3f2a-cat.png"), "image/png");
        assert_eq!(content_type("3f2a-photo.JPG"), "image/jpeg");
        assert_eq!(content_type("3f2a-notes.txt"), "text/plain; charset=utf-8");
        assert_eq!(content_type("3f2a-archive.tar.zst"), "application/octet-stream");
        assert_eq!(content_type("3f2a-file"), "application/octet-stream");
    }
}
