use crate::error::{BridgeError, Result};
use crate::server::AppState;
use axum::Extension;
use axum::extract::Query;
use axum::routing::get;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
struct ResetQuery {
    #[serde(default)]
    token: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/reset-session", get(reset_session))
}

#[tracing::instrument(level = "info", skip_all)]
async fn reset_session(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ResetQuery>,
) -> Result<&'static str> {
    let Some(expected) = state.reset_token.as_deref() else {
        return Err(BridgeError::Unauthorized);
    };
    let presented = query.token.as_deref().unwrap_or_default();
    if !constant_time_eq(presented, expected) {
        return Err(BridgeError::Unauthorized);
    }

    state
        .transport
        .reset_session()
        .await
        .map_err(BridgeError::ResetFailed)?;
    tracing::warn!("chat session credentials removed; restart required");
    Ok("Session reset. Restart the server to link again.")
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    let left = left.as_bytes();
    let right = right.as_bytes();
    let mut diff = left.len() ^ right.len();
    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}
