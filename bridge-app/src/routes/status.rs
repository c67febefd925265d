use crate::config::StatusPage;
use crate::server::AppState;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/", get(get_status))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_status(Extension(state): Extension<Arc<AppState>>) -> Response {
    if state.status.page == StatusPage::Simple {
        return "groupbridge is running".into_response();
    }

    let link = state.link.snapshot().await;
    Json(serde_json::json!({
        "status": "ok",
        "transport": state.transport.transport_id(),
        "checked_at": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "link": link,
        "pending_questions": state.tracker.len(),
        "typing_loops": state.typing.active_count(),
    }))
    .into_response()
}
