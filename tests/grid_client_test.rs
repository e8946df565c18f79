//! Mesh 客户端集成测试：本地 axum 服务模拟守护进程

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

use pwnagent::config::GridSection;
use pwnagent::core::{AdvertisedStats, AgentEvent, EventBus, Mesh};
use pwnagent::grid::{Advertiser, GridClient, GridError, SessionSummary};

#[derive(Clone, Default)]
struct Daemon {
    peers: Arc<Mutex<Value>>,
    advertisement: Arc<Mutex<Value>>,
    advertising: Arc<Mutex<Option<bool>>>,
    telemetry: Arc<Mutex<Option<Value>>>,
    messages: Arc<Mutex<Vec<(String, String)>>>,
    marks: Arc<Mutex<Vec<(u64, String)>>>,
}

async fn peers(State(d): State<Daemon>) -> Json<Value> {
    Json(d.peers.lock().unwrap().clone())
}

async fn mesh_toggle(State(d): State<Daemon>, Path(flag): Path<String>) -> Response {
    match flag.as_str() {
        "true" | "false" => {
            *d.advertising.lock().unwrap() = Some(flag == "true");
            Json(json!({"success": true})).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn set_data(State(d): State<Daemon>, Json(body): Json<Value>) -> Json<Value> {
    *d.advertisement.lock().unwrap() = body;
    Json(json!({"success": true}))
}

async fn get_data(State(d): State<Daemon>) -> Json<Value> {
    Json(d.advertisement.lock().unwrap().clone())
}

async fn memory() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
}

async fn data(State(d): State<Daemon>, Json(body): Json<Value>) -> Json<Value> {
    *d.telemetry.lock().unwrap() = Some(body);
    Json(json!({"success": true}))
}

async fn report_ap(Json(body): Json<Value>) -> Response {
    if body["bssid"].as_str().unwrap_or_default().is_empty() {
        return (StatusCode::UNPROCESSABLE_ENTITY, "missing bssid").into_response();
    }
    Json(json!({"success": true})).into_response()
}

async fn inbox(Query(q): Query<std::collections::HashMap<String, String>>) -> Json<Value> {
    let page: u64 = q.get("p").and_then(|p| p.parse().ok()).unwrap_or(1);
    Json(json!({
        "pages": 2,
        "records": 3,
        "messages": [{"id": page * 10, "sender_name": "buddy"}]
    }))
}

async fn inbox_message(Path(id): Path<u64>) -> Json<Value> {
    Json(json!({"id": id, "data": "aGVsbG8="}))
}

async fn mark(State(d): State<Daemon>, Path((id, mark)): Path<(u64, String)>) -> Json<Value> {
    d.marks.lock().unwrap().push((id, mark));
    Json(json!({"success": true}))
}

async fn send(State(d): State<Daemon>, Path(to): Path<String>, body: String) -> StatusCode {
    d.messages.lock().unwrap().push((to, body));
    StatusCode::OK
}

async fn serve() -> (GridSection, Daemon, TempDir) {
    let daemon = Daemon::default();
    *daemon.peers.lock().unwrap() = json!([]);
    let app = Router::new()
        .route("/api/v1/mesh/peers", get(peers))
        .route("/api/v1/mesh/data", get(get_data).post(set_data))
        .route("/api/v1/mesh/memory", get(memory))
        .route("/api/v1/mesh/:flag", get(mesh_toggle))
        .route("/api/v1/data", post(data))
        .route("/api/v1/report/ap", post(report_ap))
        .route("/api/v1/inbox", get(inbox))
        .route("/api/v1/inbox/:id", get(inbox_message))
        .route("/api/v1/inbox/:id/:mark", get(mark))
        .route("/api/v1/unit/:to/inbox", post(send))
        .with_state(daemon.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let dir = TempDir::new().unwrap();
    let cfg = GridSection {
        api_address: format!("http://{addr}/api/v1"),
        brain_path: dir.path().join("brain.json"),
        ..Default::default()
    };
    (cfg, daemon, dir)
}

#[tokio::test]
async fn test_advertisement_and_memory() {
    let (cfg, daemon, _dir) = serve().await;
    let grid = GridClient::new(&cfg);

    grid.advertise(true).await.unwrap();
    assert_eq!(*daemon.advertising.lock().unwrap(), Some(true));
    grid.advertise(false).await.unwrap();
    assert_eq!(*daemon.advertising.lock().unwrap(), Some(false));

    grid.set_advertisement_data(json!({"name": "unit"})).await.unwrap();
    assert_eq!(grid.get_advertisement_data().await.unwrap()["name"], "unit");

    match grid.memory().await {
        Err(GridError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_peers_and_closest() {
    let (cfg, daemon, _dir) = serve().await;
    let grid = GridClient::new(&cfg);
    assert!(grid.peers().await.unwrap().is_empty());
    assert!(grid.closest_peer().await.unwrap().is_none());

    *daemon.peers.lock().unwrap() = json!([
        {"fingerprint": "near", "rssi": -30, "encounters": 4, "advertisement": {"name": "alpha"}},
        {"fingerprint": "far", "rssi": -80, "advertisement": {"name": "beta"}}
    ]);
    let peers = grid.peers().await.unwrap();
    assert_eq!(peers.len(), 2);
    let closest = grid.closest_peer().await.unwrap().unwrap();
    assert_eq!(closest.name(), "alpha");
    assert_eq!(closest.encounters, 4);
}

#[tokio::test]
async fn test_push_telemetry_includes_brain_and_version() {
    let (cfg, daemon, _dir) = serve().await;
    std::fs::write(&cfg.brain_path, r#"{"epochs_trained": 7}"#).unwrap();
    let grid = GridClient::new(&cfg);

    let summary = SessionSummary {
        duration: "01:00:00".into(),
        epochs: 12,
        deauthed: 3,
        associated: 2,
        handshakes: 1,
        peers: 1,
        ..Default::default()
    };
    grid.push_telemetry(&summary).await.unwrap();

    let sent = daemon.telemetry.lock().unwrap().clone().unwrap();
    assert_eq!(sent["session"]["duration"], "01:00:00");
    assert_eq!(sent["session"]["epochs"], 12);
    assert_eq!(sent["session"]["deauthed"], 3);
    assert_eq!(sent["brain"]["epochs_trained"], 7);
    assert_eq!(sent["version"], env!("CARGO_PKG_VERSION"));
    assert!(sent.get("uname").is_some());
}

#[tokio::test]
async fn test_push_telemetry_without_brain() {
    let (cfg, daemon, _dir) = serve().await;
    GridClient::new(&cfg)
        .push_telemetry(&SessionSummary::default())
        .await
        .unwrap();
    let sent = daemon.telemetry.lock().unwrap().clone().unwrap();
    assert_eq!(sent["brain"], json!({}));
}

#[tokio::test]
async fn test_report_ap() {
    let (cfg, _daemon, _dir) = serve().await;
    let grid = GridClient::new(&cfg);
    assert!(grid.report_ap("HomeNet", "aa:aa:aa:aa:aa:aa").await);
    assert!(!grid.report_ap("HomeNet", "").await);
}

#[tokio::test]
async fn test_inbox_and_messages() {
    let (cfg, daemon, _dir) = serve().await;
    let grid = GridClient::new(&cfg);

    let messages = grid.inbox(2, false).await.unwrap();
    assert_eq!(messages, json!([{"id": 20, "sender_name": "buddy"}]));
    let paged = grid.inbox(1, true).await.unwrap();
    assert_eq!(paged["pages"], 2);

    assert_eq!(grid.inbox_message(5).await.unwrap()["id"], 5);
    grid.mark_message(5, "seen").await.unwrap();
    assert_eq!(*daemon.marks.lock().unwrap(), vec![(5, "seen".to_string())]);

    // 空响应体 → Null
    assert_eq!(grid.send_message("buddy-fp", "hello there").await.unwrap(), Value::Null);
    assert_eq!(
        *daemon.messages.lock().unwrap(),
        vec![("buddy-fp".to_string(), "hello there".to_string())]
    );
}

#[tokio::test]
async fn test_advertiser_detects_and_loses_peers() {
    let (cfg, daemon, _dir) = serve().await;
    let events = EventBus::new(32);
    let mut rx = events.subscribe();
    let adv = Advertiser::new(GridClient::new(&cfg), events, "unit", Duration::from_secs(1));

    *daemon.peers.lock().unwrap() = json!([{"fingerprint": "abc", "advertisement": {"name": "buddy"}}]);
    adv.start_advertising().await;
    assert_eq!(*daemon.advertising.lock().unwrap(), Some(true));
    assert_eq!(daemon.advertisement.lock().unwrap()["name"], "unit");

    let detected = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(detected, AgentEvent::PeerDetected { ref peer } if peer.fingerprint == "abc"));
    assert_eq!(adv.peers().await.len(), 1);

    adv.update_advertisement(AdvertisedStats {
        pwnd_run: 1,
        pwnd_tot: 9,
        uptime: 120,
        epoch: 4,
    })
    .await;
    assert_eq!(daemon.advertisement.lock().unwrap()["pwnd_tot"], 9);

    *daemon.peers.lock().unwrap() = json!([]);
    let lost = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(lost, AgentEvent::PeerLost { ref peer } if peer.fingerprint == "abc"));
    assert!(adv.closest_peer().await.is_none());
}
