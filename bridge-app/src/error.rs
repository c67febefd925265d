use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("transport failure: {0:#}")]
    TransportFailure(#[source] anyhow::Error),

    #[error("webhook dispatch failed: {0}")]
    WebhookDispatch(String),

    #[error("session reset failed: {0:#}")]
    ResetFailed(#[source] anyhow::Error),

    #[error("qr render failed: {0:#}")]
    QrRender(#[source] anyhow::Error),
}

impl BridgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::TransportFailure(_)
            | Self::WebhookDispatch(_)
            | Self::ResetFailed(_)
            | Self::QrRender(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-facing message. Internal detail stays in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::BadRequest(message) => message.clone(),
            Self::Unauthorized => "unauthorized".to_string(),
            Self::TransportFailure(_) => "Failed to send message".to_string(),
            Self::WebhookDispatch(_) => "Failed to forward question".to_string(),
            Self::ResetFailed(_) => "Failed to reset session".to_string(),
            Self::QrRender(_) => "Failed to generate QR image".to_string(),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        Self::WebhookDispatch(e.to_string())
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
        }
        (
            status,
            Json(serde_json::json!({ "error": self.public_message() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::BridgeError;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn kinds_map_to_expected_status_codes() {
        assert_eq!(
            BridgeError::BadRequest("x".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BridgeError::Unauthorized.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            BridgeError::TransportFailure(anyhow::anyhow!("socket closed")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn transport_failure_hides_source_detail_from_caller() {
        let err = BridgeError::TransportFailure(anyhow::anyhow!("chat not found: secret-id"));
        assert!(err.to_string().contains("chat not found"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let body: serde_json::Value = serde_json::from_slice(&body).expect("response json");
        assert_eq!(body["error"], "Failed to send message");
    }
}
