//! Shared helpers for the server integration tests.

#![allow(dead_code)]

use bytes::BytesMut;
use chatflow_protocol::{codec, ClientEvent, ConnectionId, ServerEvent};
use chatflow_server::{build_router, AppState, Config};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const JWT_SECRET: &str = "integration-secret";

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    _upload_dir: tempfile::TempDir,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a server on a random port.
pub async fn start_server(customize: impl FnOnce(&mut Config)) -> TestServer {
    let upload_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = Config::default();
    config.port = addr.port();
    config.metrics.enabled = false;
    config.auth.jwt_secret = Some(JWT_SECRET.to_string());
    config.upload.dir = upload_dir.path().to_string_lossy().into_owned();
    config.upload.public_base_url = Some(format!("http://{}", addr));
    customize(&mut config);

    let state = Arc::new(AppState::new(config));
    let app = build_router(Arc::clone(&state));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        state,
        _upload_dir: upload_dir,
    }
}

/// Open a JSON connection; returns it with its connection id.
pub async fn connect(server: &TestServer) -> (Ws, ConnectionId) {
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .expect("Failed to connect to WebSocket");

    match next_event(&mut ws).await {
        ServerEvent::Connected { connection_id, .. } => (ws, connection_id),
        other => panic!("Expected connected event, got {:?}", other),
    }
}

/// Open a connection and identify; waits for the resulting user list.
pub async fn join(server: &TestServer, name: &str) -> (Ws, ConnectionId) {
    let (mut ws, id) = connect(server).await;
    send(&mut ws, &ClientEvent::identify(name)).await;
    wait_for(&mut ws, |e| {
        matches!(e, ServerEvent::UserList { users } if users.iter().any(|u| u.connection_id == id))
    })
    .await;
    (ws, id)
}

pub async fn send(ws: &mut Ws, event: &ClientEvent) {
    let text = codec::encode_json(event).unwrap();
    ws.send(Message::Text(text)).await.unwrap();
}

/// Next hub event, skipping control frames.
pub async fn next_event(ws: &mut Ws) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for an event")
            .expect("Connection closed")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => return codec::decode_json(&text).unwrap(),
            Message::Binary(data) => {
                let mut buf = BytesMut::from(&data[..]);
                return codec::decode_from(&mut buf).unwrap().unwrap();
            }
            _ => continue,
        }
    }
}

/// Read events until one matches.
pub async fn wait_for(ws: &mut Ws, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
    loop {
        let event = next_event(ws).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Assert that no event matching `pred` arrives within `ms`.
pub async fn assert_none(ws: &mut Ws, ms: u64, pred: impl Fn(&ServerEvent) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
    loop {
        let msg = match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(None) => return,
            Ok(Some(msg)) => msg.unwrap(),
        };
        if let Message::Text(text) = msg {
            let event: ServerEvent = codec::decode_json(&text).unwrap();
            assert!(!pred(&event), "Unexpected event: {:?}", event);
        }
    }
}
