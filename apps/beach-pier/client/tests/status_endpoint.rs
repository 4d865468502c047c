use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use beach_pier_client::{ClientIdentity, ServerEndpoint, StatusClient, StatusError};
use beach_pier_core::HistoryScope;
use serde_json::{json, Value};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client_for(addr: SocketAddr) -> StatusClient {
    StatusClient::new(ServerEndpoint::parse(&format!("http://{addr}")).unwrap())
}

#[tokio::test]
async fn reads_instance_and_health() {
    let app = Router::new()
        .route(
            "/instance",
            get(|| async {
                Json(json!({
                    "instance_id": "ip-10-0-1-7-3f2a9c1d",
                    "uptime": 125.4,
                    "connection_count": 4,
                    "active_tasks": 2
                }))
            }),
        )
        .route(
            "/health",
            get(|| async { Json(json!({"status": "healthy", "instance_id": "ip-10-0-1-7-3f2a9c1d"})) }),
        );
    let client = client_for(serve(app).await);

    let info = client.instance_info().await.unwrap();
    assert_eq!(info.instance_id.as_str(), "ip-10-0-1-7-3f2a9c1d");
    assert_eq!(info.connection_count, 4);
    assert_eq!(info.uptime_display(), "2 mins 5 secs");

    let health = client.health().await.unwrap();
    assert!(health.is_healthy());
}

#[tokio::test]
async fn history_query_carries_scope_and_client() {
    let app = Router::new().route(
        "/chat/history",
        get(|Query(params): Query<HashMap<String, String>>| async move {
            let messages: Vec<Value> = vec![json!({
                "type": "chat",
                "client_id": params.get("client_id").cloned().unwrap_or_default(),
                "content": format!("limit={}", params.get("limit").cloned().unwrap_or_default()),
            })];
            Json(json!({
                "messages": messages,
                "count": 1,
                "history_type": params.get("history_type").cloned().unwrap_or_default(),
            }))
        }),
    );
    let client = client_for(serve(app).await);
    let me = ClientIdentity::parse("k3j9x0qa").unwrap();

    let page = client
        .chat_history(20, HistoryScope::User, Some(&me))
        .await
        .unwrap();
    assert_eq!(page.history_type, "user");
    assert_eq!(page.count, 1);
    assert_eq!(page.messages[0]["client_id"], "k3j9x0qa");
    assert_eq!(page.messages[0]["content"], "limit=20");
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let app = Router::new().route(
        "/instance",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "draining") }),
    );
    let client = client_for(serve(app).await);

    match client.instance_info().await {
        Err(StatusError::UnexpectedStatus { status, body }) => {
            assert_eq!(status.as_u16(), 503);
            assert_eq!(body, "draining");
        }
        other => panic!("unexpected {other:?}"),
    }
}
