use crate::error::{BridgeError, Result};
use crate::reply::ReplyRequest;
use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Extension, Json};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/send-reply", post(send_reply))
}

#[tracing::instrument(level = "info", skip_all)]
async fn send_reply(
    Extension(state): Extension<Arc<AppState>>,
    body: std::result::Result<Json<ReplyRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>> {
    let Json(request) = body.map_err(|rejection| {
        tracing::debug!(error = %rejection, "unreadable reply body");
        BridgeError::BadRequest("Missing chatId or message".to_string())
    })?;
    state.replies.submit_reply(request).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use crate::server::AppState;
    use crate::test_support::{RecordingTransport, TransportCall, app_state};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use bridge_transport::{ChatId, OutboundPayload};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn post_reply(state: Arc<AppState>, body: &str) -> (StatusCode, serde_json::Value) {
        let response = crate::routes::router()
            .layer(axum::Extension(state))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/send-reply")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&body).expect("json"))
    }

    #[tokio::test]
    async fn delivers_text_reply() {
        let transport = Arc::new(RecordingTransport::new());
        let state = app_state(transport.clone());

        let (status, body) =
            post_reply(state, r#"{"chatId":"g1@g.us","message":"It's at 3pm"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "success": true }));
        assert_eq!(
            transport.calls(),
            vec![TransportCall::Send {
                chat_id: ChatId::new("g1@g.us"),
                payload: OutboundPayload::text("It's at 3pm"),
            }]
        );
    }

    #[tokio::test]
    async fn missing_fields_and_malformed_json_are_bad_requests() {
        let transport = Arc::new(RecordingTransport::new());
        let state = app_state(transport.clone());

        for body in [r#"{"message":"hi"}"#, r#"{"chatId":"g1@g.us"}"#, "not json"] {
            let (status, json) = post_reply(state.clone(), body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["error"], "Missing chatId or message");
        }
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_internal_error() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_send(true);
        let state = app_state(transport.clone());

        let (status, body) = post_reply(
            state,
            r#"{"chatId":"missing@g.us","message":"hi","buttonText":"Yes"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to send message");
    }
}
