//! HTTP receiver for work units delivered by a remote task queue.
//!
//! The queue's `processingUrl` points at [`PROCESS_PATH`]. A 2xx response
//! ends delivery of a task, anything else makes the queue try again. On the
//! last allowed attempt a unit that still asks for a retry is resolved as
//! failed here, so its job can complete.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::ImportError;
use crate::queue::{Delivery, TaskHandler};

pub const PROCESS_PATH: &str = "/tasks/process";

/// Retries already made for the task, `0` on the first attempt.
pub const RETRY_COUNT_HEADER: &str = "x-cloudtasks-taskretrycount";

#[derive(Clone)]
struct ServerState {
    handler: Arc<dyn TaskHandler>,
    max_attempts: u32,
}

/// Routes for the task endpoint. `max_attempts` must match the queue's own
/// retry limit.
pub fn router(handler: Arc<dyn TaskHandler>, max_attempts: u32) -> Router {
    Router::new()
        .route(PROCESS_PATH, post(process_task))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(ServerState {
            handler,
            max_attempts: max_attempts.max(1),
        })
}

/// Serves [`router`] on `addr` until Ctrl-C.
pub async fn serve(
    addr: SocketAddr,
    handler: Arc<dyn TaskHandler>,
    max_attempts: u32,
) -> Result<(), ImportError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, path = PROCESS_PATH, "task endpoint listening");
    axum::serve(listener, router(handler, max_attempts))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("task endpoint stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            error!(error = %e, "cannot listen for Ctrl-C, serving until killed");
            std::future::pending::<()>().await;
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn process_task(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let attempt = attempt_number(&headers);

    let handler = Arc::clone(&state.handler);
    let payload = body.clone();
    let delivery = tokio::task::spawn_blocking(move || handler.handle(&payload))
        .await
        .unwrap_or_else(|e| Delivery::Retry(format!("conversion task aborted: {}", e)));

    match delivery {
        Delivery::Done => (StatusCode::OK, "done".to_string()),
        Delivery::Reject(reason) => (StatusCode::ACCEPTED, reason),
        Delivery::Retry(reason) if attempt >= state.max_attempts => {
            warn!(attempt, reason = %reason, "last delivery attempt failed, resolving unit");
            let handler = Arc::clone(&state.handler);
            let last_error = reason.clone();
            match tokio::task::spawn_blocking(move || handler.on_exhausted(&body, &last_error)).await {
                Ok(()) => (StatusCode::OK, reason),
                Err(e) => {
                    error!(error = %e, "exhaustion handler aborted");
                    (StatusCode::INTERNAL_SERVER_ERROR, reason)
                }
            }
        }
        Delivery::Retry(reason) => {
            warn!(attempt, reason = %reason, "delivery failed, queue will retry");
            (StatusCode::SERVICE_UNAVAILABLE, reason)
        }
    }
}

/// 1-based attempt number of this delivery. A missing or unreadable header
/// counts as the first attempt.
fn attempt_number(headers: &HeaderMap) -> u32 {
    headers
        .get(RETRY_COUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u32>().ok())
        .map_or(1, |retries| retries.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Answers every delivery the same way and records exhaustion calls.
    struct ScriptedHandler {
        delivery: Delivery,
        exhausted: Mutex<Vec<(Vec<u8>, String)>>,
    }

    impl ScriptedHandler {
        fn new(delivery: Delivery) -> Arc<Self> {
            Arc::new(Self {
                delivery,
                exhausted: Mutex::new(Vec::new()),
            })
        }
    }

    impl TaskHandler for ScriptedHandler {
        fn handle(&self, _payload: &[u8]) -> Delivery {
            self.delivery.clone()
        }

        fn on_exhausted(&self, payload: &[u8], last_error: &str) {
            self.exhausted
                .lock()
                .unwrap()
                .push((payload.to_vec(), last_error.to_string()));
        }
    }

    async fn post(app: Router, retries: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().method(Method::POST).uri(PROCESS_PATH);
        if let Some(retries) = retries {
            builder = builder.header(RETRY_COUNT_HEADER, retries);
        }
        let response = app
            .oneshot(builder.body(Body::from("{\"jobId\":\"job-1\"}")).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_done_is_acknowledged() {
        let handler = ScriptedHandler::new(Delivery::Done);
        let (status, _) = post(router(handler.clone(), 3), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(handler.exhausted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_payload_is_not_redelivered() {
        let handler = ScriptedHandler::new(Delivery::Reject("malformed".to_string()));
        let (status, body) = post(router(handler.clone(), 3), Some("0")).await;
        assert!(status.is_success());
        assert_eq!(body, "malformed");
        assert!(handler.exhausted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_before_last_attempt_asks_queue_again() {
        let handler = ScriptedHandler::new(Delivery::Retry("store timed out".to_string()));
        let (status, _) = post(router(handler.clone(), 3), Some("1")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(handler.exhausted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_attempt_resolves_unit() {
        let handler = ScriptedHandler::new(Delivery::Retry("store timed out".to_string()));
        let (status, _) = post(router(handler.clone(), 3), Some("2")).await;
        assert_eq!(status, StatusCode::OK);

        let exhausted = handler.exhausted.lock().unwrap();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].0, b"{\"jobId\":\"job-1\"}".to_vec());
        assert_eq!(exhausted[0].1, "store timed out");
    }

    #[tokio::test]
    async fn test_single_attempt_queue_exhausts_immediately() {
        let handler = ScriptedHandler::new(Delivery::Retry("boom".to_string()));
        let (status, _) = post(router(handler.clone(), 1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(handler.exhausted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(ScriptedHandler::new(Delivery::Done), 3);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_attempt_number_from_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(attempt_number(&headers), 1);
        headers.insert(RETRY_COUNT_HEADER, "4".parse().unwrap());
        assert_eq!(attempt_number(&headers), 5);
        headers.insert(RETRY_COUNT_HEADER, "soon".parse().unwrap());
        assert_eq!(attempt_number(&headers), 1);
    }
}
