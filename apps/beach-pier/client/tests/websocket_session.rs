use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use beach_pier_client::{
    ChannelSink, ConnectionState, Notice, PierClient, PierConfig, SendOutcome, ServerEndpoint,
    UpdateEvent,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

struct ServerState {
    instance: Mutex<String>,
    client_ids: Mutex<Vec<String>>,
    drop_all: broadcast::Sender<()>,
}

/// Minimal stand-in for one backend instance behind the load balancer.
struct FakeServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl FakeServer {
    async fn start(instance: &str) -> Self {
        let (drop_all, _) = broadcast::channel(4);
        let state = Arc::new(ServerState {
            instance: Mutex::new(instance.to_owned()),
            client_ids: Mutex::new(Vec::new()),
            drop_all,
        });
        let app = Router::new()
            .route("/ws/:client_id", get(ws_handler))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    fn set_instance(&self, instance: &str) {
        *self.state.instance.lock() = instance.to_owned();
    }

    fn drop_connections(&self) {
        let _ = self.state.drop_all.send(());
    }

    fn client_ids(&self) -> Vec<String> {
        self.state.client_ids.lock().clone()
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, client_id, state))
}

async fn serve_socket(mut socket: WebSocket, client_id: String, state: Arc<ServerState>) {
    state.client_ids.lock().push(client_id.clone());
    let instance = state.instance.lock().clone();
    let mut drop_rx = state.drop_all.subscribe();
    let info = json!({
        "type": "connection_info",
        "instance_id": instance,
        "client_id": client_id,
        "connection_count": 1
    });
    if socket.send(Message::Text(info.to_string())).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            _ = drop_rx.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => {
                    let request: Value = serde_json::from_str(&text).unwrap_or_default();
                    if request["type"] == "chat" {
                        let echo = json!({
                            "type": "chat",
                            "client_id": client_id,
                            "content": request["content"],
                            "timestamp": request["timestamp"],
                            "instance_id": instance,
                        });
                        if socket.send(Message::Text(echo.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    }
}

async fn wait_for(
    updates: &mut mpsc::UnboundedReceiver<UpdateEvent>,
    what: &str,
    pred: impl Fn(&UpdateEvent) -> bool,
) -> UpdateEvent {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        match tokio::time::timeout_at(deadline, updates.recv()).await {
            Ok(Some(event)) if pred(&event) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("update stream ended while waiting for {what}"),
            Err(_) => panic!("timed out waiting for {what}"),
        }
    }
}

#[tokio::test]
async fn session_survives_server_drop_and_instance_change() {
    let server = FakeServer::start("A").await;
    let mut config =
        PierConfig::new(ServerEndpoint::parse(&format!("http://{}", server.addr)).unwrap());
    config.ephemeral = true;
    let (sink, mut updates) = ChannelSink::new();
    let (client, handle) = PierClient::from_config(&config, Box::new(sink)).unwrap();
    let driver = client.spawn();
    handle.connect().unwrap();

    wait_for(&mut updates, "connection_info from A", |event| {
        matches!(
            event,
            UpdateEvent::Notice(Notice::ConnectedToInstance { instance_id, .. })
                if instance_id.as_str() == "A"
        )
    })
    .await;

    assert_eq!(handle.send_chat("hello").await.unwrap(), SendOutcome::Sent);
    wait_for(&mut updates, "own chat echo", |event| {
        matches!(
            event,
            UpdateEvent::MessageAdded(record) if record.is_self && record.content == "hello"
        )
    })
    .await;

    server.set_instance("B");
    server.drop_connections();
    wait_for(&mut updates, "connection lost notice", |event| {
        matches!(
            event,
            UpdateEvent::Notice(Notice::ConnectionLost { attempt: 1, .. })
        )
    })
    .await;
    wait_for(&mut updates, "instance change to B", |event| {
        matches!(
            event,
            UpdateEvent::Notice(Notice::InstanceChanged { previous, current })
                if previous.as_str() == "A" && current.as_str() == "B"
        )
    })
    .await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connection, ConnectionState::Connected);
    assert_eq!(snapshot.reconnect_attempts, 0);
    assert_eq!(snapshot.metrics.sent, 1);
    assert!(snapshot.metrics.received >= 3);

    let ids = server.client_ids();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);
    assert_eq!(snapshot.client_id.unwrap().as_str(), ids[0]);

    handle.disconnect().unwrap();
    handle.shutdown().unwrap();
    driver.await.unwrap();
}

#[tokio::test]
async fn connect_to_missing_server_does_not_retry() {
    // Bind then drop to get a port nothing is listening on.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut config = PierConfig::new(ServerEndpoint::parse(&format!("http://{addr}")).unwrap());
    config.ephemeral = true;
    let (sink, mut updates) = ChannelSink::new();
    let (client, handle) = PierClient::from_config(&config, Box::new(sink)).unwrap();
    let driver = client.spawn();
    handle.connect().unwrap();

    wait_for(&mut updates, "transport error", |event| {
        matches!(event, UpdateEvent::Notice(Notice::TransportError(_)))
    })
    .await;
    wait_for(&mut updates, "disconnected", |event| {
        matches!(
            event,
            UpdateEvent::StatusChanged(ConnectionState::Disconnected)
        )
    })
    .await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connection, ConnectionState::Disconnected);
    assert_eq!(snapshot.reconnect_attempts, 0);
    assert_eq!(
        handle.send_chat("anyone?").await.unwrap(),
        SendOutcome::Rejected(beach_pier_client::RejectReason::NotConnected)
    );

    handle.shutdown().unwrap();
    driver.await.unwrap();
}
