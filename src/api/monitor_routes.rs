use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

use crate::config::IceConfig;
use crate::error::MonitorError;
use crate::monitor::MonitorServer;
use super::monitor_websocket;

/// Graded submission pushed by the submission layer
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionHook {
    #[serde(deserialize_with = "crate::monitor::protocol::flexible_id::deserialize")]
    pub student_id: String,
    pub score: u32,
    pub total_questions: u32,
}

/// Every route the monitor serves, WebSocket included
pub fn monitor_routes(
    server: Arc<MonitorServer>,
    ice: IceConfig,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    monitor_health_check()
        .or(monitor_config_endpoint(ice))
        .or(submission_hook(server.clone()))
        .or(lifecycle_hook(server.clone()))
        .or(projection_endpoint(server.clone()))
        .or(activity_endpoint(server.clone()))
        .or(monitor_websocket_route(server))
}

pub fn monitor_websocket_route(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("monitor")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_monitor_server(server))
        .map(|ws: warp::ws::Ws, server: Arc<MonitorServer>| {
            ws.on_upgrade(move |websocket| {
                monitor_websocket::handle_monitor_websocket(websocket, server)
            })
        })
}

pub fn monitor_health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "health")
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Exam Monitor",
                "version": env!("CARGO_PKG_VERSION")
            }))
        })
}

pub fn monitor_config_endpoint(
    ice: IceConfig,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "config")
        .and(warp::get())
        .map(move || {
            let turn_servers: Vec<_> = ice
                .turn_servers
                .iter()
                .map(|turn| {
                    serde_json::json!({
                        "urls": turn.urls,
                        "username": turn.username,
                        "credential": turn.credential
                    })
                })
                .collect();

            warp::reply::json(&serde_json::json!({
                "stunServers": ice.stun_servers,
                "turnServers": turn_servers
            }))
        })
}

pub fn submission_hook(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "exams" / String / "submissions")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_monitor_server(server))
        .and_then(handle_submission)
}

pub fn lifecycle_hook(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "exams" / String / String)
        .and(warp::post())
        .and(with_monitor_server(server))
        .and_then(handle_lifecycle)
}

pub fn projection_endpoint(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "exams" / String / "projection")
        .and(warp::get())
        .and(with_monitor_server(server))
        .and_then(|exam_id: String, server: Arc<MonitorServer>| async move {
            let students = server.projection(&exam_id).await;
            Ok::<_, Infallible>(json_reply(
                &serde_json::json!({ "examId": exam_id, "students": students }),
                StatusCode::OK,
            ))
        })
}

pub fn activity_endpoint(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("monitor" / "exams" / String / "students" / String / "activity")
        .and(warp::get())
        .and(with_monitor_server(server))
        .and_then(
            |exam_id: String, student_id: String, server: Arc<MonitorServer>| async move {
                let reply = match server.activity_history(&exam_id, &student_id).await {
                    Ok(records) => {
                        let status = crate::monitor::replay(records.iter().map(|r| r.event_type));
                        json_reply(
                            &serde_json::json!({
                                "examId": exam_id,
                                "studentId": student_id,
                                "status": status,
                                "records": records
                            }),
                            StatusCode::OK,
                        )
                    }
                    Err(e) => error_reply(&e),
                };
                Ok::<_, Infallible>(reply)
            },
        )
}

async fn handle_submission(
    exam_id: String,
    hook: SubmissionHook,
    server: Arc<MonitorServer>,
) -> Result<impl warp::Reply, Infallible> {
    let reply = match server
        .submit(&exam_id, &hook.student_id, hook.score, hook.total_questions)
        .await
    {
        Ok(()) => json_reply(
            &serde_json::json!({ "examId": exam_id, "studentId": hook.student_id }),
            StatusCode::ACCEPTED,
        ),
        Err(e) => {
            tracing::error!(exam_id = %exam_id, error = %e, "Submission hook failed");
            error_reply(&e)
        }
    };
    Ok(reply)
}

async fn handle_lifecycle(
    exam_id: String,
    action: String,
    server: Arc<MonitorServer>,
) -> Result<impl warp::Reply, Infallible> {
    let delivered = match action.as_str() {
        "started" => server.exam_started(&exam_id).await,
        "closed" => server.exam_closed(&exam_id).await,
        "deleted" => server.exam_deleted(&exam_id).await,
        _ => {
            return Ok(json_reply(
                &serde_json::json!({ "error": format!("Unknown exam action: {}", action) }),
                StatusCode::NOT_FOUND,
            ));
        }
    };

    Ok(json_reply(
        &serde_json::json!({ "examId": exam_id, "event": action, "delivered": delivered }),
        StatusCode::OK,
    ))
}

fn json_reply(body: &serde_json::Value, status: StatusCode) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn error_reply(err: &MonitorError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = match err {
        MonitorError::ExamNotFound(_) | MonitorError::SubmissionNotFound(_) => StatusCode::NOT_FOUND,
        MonitorError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_reply(&serde_json::json!({ "error": err.to_string() }), status)
}

fn with_monitor_server(
    server: Arc<MonitorServer>,
) -> impl Filter<Extract = (Arc<MonitorServer>,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorSettings;
    use crate::store::{ExamSchedule, ExamStatus, MemoryStore};

    async fn server() -> Arc<MonitorServer> {
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
        MonitorServer::new(Arc::new(store), MonitorSettings::default())
    }

    #[tokio::test]
    async fn test_health() {
        let res = warp::test::request()
            .method("GET")
            .path("/monitor/health")
            .reply(&monitor_health_check())
            .await;
        assert_eq!(res.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_config_advertises_ice_servers() {
        let res = warp::test::request()
            .method("GET")
            .path("/monitor/config")
            .reply(&monitor_config_endpoint(IceConfig::default()))
            .await;
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["stunServers"][0], crate::config::DEFAULT_STUN_SERVER);
        assert_eq!(body["turnServers"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_submission_then_projection() {
        let server = server().await;
        let routes = monitor_routes(server, IceConfig::default());

        let res = warp::test::request()
            .method("POST")
            .path("/monitor/exams/e1/submissions")
            .json(&serde_json::json!({ "studentId": "s1", "score": 8, "totalQuestions": 10 }))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 202);

        let res = warp::test::request()
            .method("GET")
            .path("/monitor/exams/e1/projection")
            .reply(&routes)
            .await;
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["students"][0]["status"], "submitted");
        assert_eq!(body["students"][0]["score"], 8);
    }

    #[tokio::test]
    async fn test_projection_read_does_not_seed() {
        let server = server().await;
        let routes = monitor_routes(server.clone(), IceConfig::default());

        let res = warp::test::request()
            .method("GET")
            .path("/monitor/exams/e1/projection")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["students"].as_array().unwrap().len(), 0);
        assert!(server.projection("e1").await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_hook_releases_projection() {
        let server = server().await;
        server.submit("e1", "s1", 8, 10).await.unwrap();
        let routes = monitor_routes(server.clone(), IceConfig::default());

        let res = warp::test::request()
            .method("POST")
            .path("/monitor/exams/e1/closed")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 200);
        assert!(server.projection("e1").await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_lifecycle_action() {
        let routes = monitor_routes(server().await, IceConfig::default());
        let res = warp::test::request()
            .method("POST")
            .path("/monitor/exams/e1/archived")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 404);
    }

    #[tokio::test]
    async fn test_activity_history_replays_log() {
        let server = server().await;
        server.submit("e1", "s1", 3, 5).await.unwrap();
        let routes = monitor_routes(server, IceConfig::default());

        let res = warp::test::request()
            .method("GET")
            .path("/monitor/exams/e1/students/s1/activity")
            .reply(&routes)
            .await;
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "submitted");
        assert_eq!(body["records"][0]["eventType"], "SUBMITTED");
    }
}
