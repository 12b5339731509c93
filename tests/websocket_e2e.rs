// End-to-end tests over a real WebSocket and HTTP listener bound to an ephemeral port

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use exam_monitor::api::monitor_routes::monitor_routes;
use exam_monitor::config::IceConfig;
use exam_monitor::monitor::{MonitorServer, MonitorSettings};
use exam_monitor::store::{ExamSchedule, ExamStatus, MemoryStore};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, Arc<MonitorServer>) {
    let store = MemoryStore::new();
    store
        .insert_exam(ExamSchedule {
            id: "e1".to_string(),
            status: ExamStatus::Active,
            start_time: None,
            duration_minutes: 60,
            allow_late_submission: false,
        })
        .await;
    store.insert_student("s1", "Ada", None, None).await;
    store.enroll("e1", "s1").await;

    let server = MonitorServer::new(Arc::new(store), MonitorSettings::default());
    let routes = monitor_routes(server.clone(), IceConfig::default());
    let (addr, serving) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serving);
    (addr, server)
}

async fn connect(addr: SocketAddr) -> (SplitSink<Ws, Message>, SplitStream<Ws>) {
    let (ws, _) = connect_async(format!("ws://{}/monitor", addr)).await.unwrap();
    ws.split()
}

async fn next_json(read: &mut SplitStream<Ws>) -> serde_json::Value {
    loop {
        let frame = timeout(Duration::from_secs(5), read.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_student_events_reach_proctor() {
    let (addr, _server) = spawn_server().await;

    let (mut proctor_tx, mut proctor_rx) = connect(addr).await;
    proctor_tx
        .send(Message::Text(json!({ "type": "join_exam", "examId": "e1" }).to_string()))
        .await
        .unwrap();

    let snapshot = next_json(&mut proctor_rx).await;
    assert_eq!(snapshot["type"], "monitor_snapshot");
    assert_eq!(snapshot["students"][0]["studentId"], "s1");
    assert_eq!(snapshot["students"][0]["status"], "offline");

    let (mut student_tx, _student_rx) = connect(addr).await;
    student_tx
        .send(Message::Text(
            json!({ "type": "join_exam", "examId": "e1", "studentId": "s1", "studentName": "Ada" })
                .to_string(),
        ))
        .await
        .unwrap();

    let connected = next_json(&mut proctor_rx).await;
    assert_eq!(connected["type"], "monitor_update");
    assert_eq!(connected["studentId"], "s1");
    assert_eq!(connected["eventType"], "CONNECTED");

    student_tx
        .send(Message::Text(
            json!({
                "type": "student_activity",
                "examId": "e1",
                "studentId": "s1",
                "studentName": "Ada",
                "eventType": "FOCUS_LOST"
            })
            .to_string(),
        ))
        .await
        .unwrap();

    let lost = next_json(&mut proctor_rx).await;
    assert_eq!(lost["eventType"], "FOCUS_LOST");

    student_tx
        .send(Message::Text(json!({ "type": "leave_exam", "examId": "e1" }).to_string()))
        .await
        .unwrap();

    let left = next_json(&mut proctor_rx).await;
    assert_eq!(left["eventType"], "DISCONNECTED");
}

#[tokio::test]
async fn test_submission_hook_broadcasts_score() {
    let (addr, _server) = spawn_server().await;

    let (mut proctor_tx, mut proctor_rx) = connect(addr).await;
    proctor_tx
        .send(Message::Text(json!({ "type": "join_exam", "examId": "e1" }).to_string()))
        .await
        .unwrap();
    next_json(&mut proctor_rx).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/monitor/exams/e1/submissions", addr))
        .json(&json!({ "studentId": "s1", "score": 7, "totalQuestions": 10 }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let submitted = next_json(&mut proctor_rx).await;
    assert_eq!(submitted["eventType"], "SUBMITTED");
    assert_eq!(submitted["studentName"], "Ada");
    assert_eq!(submitted["score"], 7);
    assert_eq!(submitted["totalQuestions"], 10);
}

#[tokio::test]
async fn test_lifecycle_hooks_reach_room() {
    let (addr, server) = spawn_server().await;

    let (mut proctor_tx, mut proctor_rx) = connect(addr).await;
    proctor_tx
        .send(Message::Text(json!({ "type": "join_exam", "examId": "e1" }).to_string()))
        .await
        .unwrap();
    next_json(&mut proctor_rx).await;

    let client = reqwest::Client::new();
    for (action, expected) in [("started", "exam_started"), ("closed", "exam_closed")] {
        let response = client
            .post(format!("http://{}/monitor/exams/e1/{}", addr, action))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["delivered"], 1);

        let message = next_json(&mut proctor_rx).await;
        assert_eq!(message["type"], expected);
        assert_eq!(message["examId"], "e1");
    }

    client
        .post(format!("http://{}/monitor/exams/e1/deleted", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(next_json(&mut proctor_rx).await["type"], "exam_deleted");
    assert_eq!(server.rooms().room_count().await, 0);
}

#[tokio::test]
async fn test_health_and_config_over_http() {
    let (addr, _server) = spawn_server().await;

    let health: serde_json::Value = reqwest::get(format!("http://{}/monitor/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");

    let config: serde_json::Value = reqwest::get(format!("http://{}/monitor/config", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(config["stunServers"].is_array());
}
