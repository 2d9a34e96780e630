//! The demo HTTP surface.
//!
//! Two endpoints, both accepting an optional `delay` query parameter used to
//! make drain behavior observable from the client side: `/hb` is a liveness
//! probe against the open database, `/` performs one write and one read in a
//! single transaction.

use crate::db::Database;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{warn, Level};
use uuid::Uuid;

/// Shared request state: the database handle plus the immutable identity of
/// this process instance.
pub struct AppState {
    pub db: Database,
    pub server_name: String,
    pub instance_id: Uuid,
}

impl AppState {
    pub fn new(db: Database, server_name: impl Into<String>) -> Self {
        Self {
            db,
            server_name: server_name.into(),
            instance_id: Uuid::new_v4(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(page_view_handler))
        .route("/hb", get(heartbeat_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

#[derive(Debug, Deserialize)]
struct DelayParams {
    delay: Option<String>,
}

impl DelayParams {
    /// Sleep for the requested delay, if any. Unparseable values are
    /// ignored, matching a probe that mistypes a unit rather than failing
    /// the request.
    async fn apply(&self) {
        if let Some(duration) = self.delay.as_deref().and_then(parse_delay) {
            tokio::time::sleep(duration).await;
        }
    }
}

/// `GET /hb?delay=500ms` — heartbeat.
async fn heartbeat_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DelayParams>,
) -> impl IntoResponse {
    params.apply().await;

    match state.db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            format!(
                "{}: heartbeat ok, instance = {}\n",
                state.server_name, state.instance_id
            ),
        ),
        Err(e) => {
            warn!(error = %e, "Heartbeat probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("{}: database unavailable\n", state.server_name),
            )
        }
    }
}

/// `GET /?delay=2s` — insert a page view and count the total, one
/// transaction, per-phase timings in the body.
async fn page_view_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DelayParams>,
) -> impl IntoResponse {
    params.apply().await;

    match state.db.record_page_view().await {
        Ok(stats) => (
            StatusCode::OK,
            format!(
                "Hello from {}! page views = {}, insert = {:?}, select = {:?}\n",
                state.server_name, stats.count, stats.insert_time, stats.select_time
            ),
        ),
        Err(e) => {
            warn!(error = %e, "Page view transaction failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}: page view failed\n", state.server_name),
            )
        }
    }
}

/// Parse durations of the `500ms` / `2s` / `1.5m` / `1h` shape.
fn parse_delay(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (value, scale) = if let Some(v) = raw.strip_suffix("ms") {
        (v, 0.001)
    } else if let Some(v) = raw.strip_suffix('s') {
        (v, 1.0)
    } else if let Some(v) = raw.strip_suffix('m') {
        (v, 60.0)
    } else if let Some(v) = raw.strip_suffix('h') {
        (v, 3600.0)
    } else {
        return None;
    };

    let value: f64 = value.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(value * scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::open_test_db;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Instant;
    use tower::ServiceExt;

    async fn test_app(dir: &std::path::Path) -> (Router, Arc<AppState>) {
        let db = open_test_db(dir).await;
        let state = Arc::new(AppState::new(db, "test-server"));
        (router(state.clone()), state)
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn parse_delay_forms() {
        assert_eq!(parse_delay("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_delay("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_delay("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_delay("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_delay("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_delay("banana"), None);
        assert_eq!(parse_delay("500"), None); // unit required
        assert_eq!(parse_delay("-1s"), None);
    }

    #[tokio::test]
    async fn heartbeat_identifies_the_instance() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = test_app(dir.path()).await;

        let response = app
            .oneshot(Request::builder().uri("/hb").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("test-server"));
        assert!(body.contains(&state.instance_id.to_string()));
    }

    #[tokio::test]
    async fn heartbeat_delay_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(dir.path()).await;

        let start = Instant::now();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/hb?delay=200ms")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn invalid_delay_is_ignored_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(dir.path()).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/hb?delay=soon")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn page_views_count_up_across_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(dir.path()).await;

        for expected in 1..=2 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_string(response).await;
            assert!(
                body.contains(&format!("page views = {expected},")),
                "unexpected body: {body}"
            );
        }
    }

    #[tokio::test]
    async fn missing_table_reports_server_error() {
        let dir = tempfile::tempdir().unwrap();
        // Open without bootstrapping the schema.
        let db = crate::db::Database::open(&dir.path().join("bare.db"))
            .await
            .unwrap();
        let app = router(Arc::new(AppState::new(db, "test-server")));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
