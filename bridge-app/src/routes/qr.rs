use crate::config::QrRender;
use crate::error::{BridgeError, Result};
use crate::pairing;
use crate::server::AppState;
use axum::Extension;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;

const NO_QR: &str = "already authenticated or QR not available";

pub fn router() -> axum::Router {
    axum::Router::new().route("/qr", get(get_qr))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_qr(Extension(state): Extension<Arc<AppState>>) -> Result<Response> {
    let Some(code) = state.link.pending_qr().await else {
        return Ok(NO_QR.into_response());
    };
    match state.status.qr_render {
        QrRender::Raw => Ok(code.into_response()),
        QrRender::Html => {
            let svg = pairing::render_svg(&code).map_err(BridgeError::QrRender)?;
            Ok(Html(render_page(&svg)).into_response())
        }
    }
}

fn render_page(svg: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>Link groupbridge</title></head>\n\
         <body>\n<h2>Scan this code with the chat app to link the session</h2>\n\
         <div id=\"qr-code\">{svg}</div>\n</body>\n</html>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingTransport, app_state};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use bridge_transport::SenderId;
    use tower::ServiceExt;

    async fn fetch_qr(state: Arc<AppState>) -> (StatusCode, String) {
        let response = crate::routes::router()
            .layer(Extension(state))
            .oneshot(Request::builder().uri("/qr").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, String::from_utf8(body.to_vec()).expect("utf8"))
    }

    #[tokio::test]
    async fn without_code_reports_not_available() {
        let state = app_state(Arc::new(RecordingTransport::new()));
        let (status, body) = fetch_qr(state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, NO_QR);
    }

    #[tokio::test]
    async fn pending_code_renders_as_svg_image() {
        let state = app_state(Arc::new(RecordingTransport::new()));
        state.link.on_qr("2@a<b>,key==".to_string()).await;
        let (status, body) = fetch_qr(state).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("<!doctype html>"));
        assert!(body.contains("<div id=\"qr-code\">"));
        assert!(body.contains("<svg"));
        assert!(!body.contains("2@a<b>"));
    }

    #[tokio::test]
    async fn unencodable_code_is_a_server_error() {
        let state = app_state(Arc::new(RecordingTransport::new()));
        state.link.on_qr("x".repeat(8_000)).await;
        let (status, body) = fetch_qr(state).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("Failed to generate QR image"));
    }

    #[tokio::test]
    async fn raw_mode_returns_code_and_linked_session_hides_it() {
        let mut state = app_state(Arc::new(RecordingTransport::new()));
        Arc::get_mut(&mut state).expect("unique state").status.qr_render = QrRender::Raw;
        state.link.on_qr("2@abc".to_string()).await;
        let (_, body) = fetch_qr(state.clone()).await;
        assert_eq!(body, "2@abc");

        state.link.on_ready(SenderId::new("bot@c.us")).await;
        let (_, body) = fetch_qr(state).await;
        assert_eq!(body, NO_QR);
    }
}
