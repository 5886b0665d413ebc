//! Health check and status endpoints.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

use crate::error::Result;
use crate::trigger::{HealthReport, StatusReport};
use crate::AppState;

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/", get(root))
}

/// GET /health - 200 when every check passes, 503 otherwise.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.sync.health().await;
    let status = if report.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// GET /status - last run and persisted state counters.
async fn status(State(state): State<AppState>) -> Result<Json<StatusReport>> {
    Ok(Json(state.sync.status().await?))
}

/// Root handler.
async fn root() -> &'static str {
    concat!("Ledgerbridge Sync Server ", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{app, json_body};
    use crate::store::StateFile;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ledgerbridge_engine::fake::FakeSystems;
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok_when_everything_answers() {
        let dir = tempfile::tempdir().unwrap();
        let systems = FakeSystems::new();
        let app = app(&systems, StateFile::new(dir.path().join("state.json")), None);

        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["checks"]["memberApi"]["ok"], true);
    }

    #[tokio::test]
    async fn health_is_503_when_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let systems = FakeSystems::new();
        systems.set_members_down(true);
        let app = app(&systems, StateFile::new(dir.path().join("state.json")), None);

        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"]["memberApi"]["ok"], false);
    }

    #[tokio::test]
    async fn status_reads_persisted_counters() {
        let dir = tempfile::tempdir().unwrap();
        let systems = FakeSystems::new();
        let app = app(&systems, StateFile::new(dir.path().join("state.json")), None);

        let response = app.oneshot(get("/status")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["state"], "idle");
        assert_eq!(body["running"], false);
        assert_eq!(body["pushedCount"], 0);
        assert_eq!(body["pendingCount"], 0);
        assert!(body["lastRun"].is_null());
    }

    #[tokio::test]
    async fn status_with_corrupt_state_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "nope").unwrap();
        let systems = FakeSystems::new();
        let app = app(&systems, StateFile::new(&path), None);

        let response = app.oneshot(get("/status")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "State error");
    }
}
