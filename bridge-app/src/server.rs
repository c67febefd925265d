//! groupbridge server.
//!
//! Wires the transport, question lifecycle and HTTP routes together.

use crate::config::{BridgeConfig, StatusConfig};
use crate::gateway::Gateway;
use crate::link::LinkState;
use crate::reply::ReplyGateway;
use crate::routes;
use crate::timer::{Timer, TokioTimer};
use crate::tracker::QuestionTracker;
use crate::typing::TypingCoordinator;
use crate::webhook::{QuestionForwarder, WebhookDispatcher};
use anyhow::{Context, Result};
use axum::Extension;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use bridge_transport::{ChatId, ChatTransport, HttpBridgeTransport, OutboundPayload};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const INBOUND_QUEUE_CAPACITY: usize = 256;

pub struct AppState {
    pub transport: Arc<dyn ChatTransport>,
    pub tracker: Arc<QuestionTracker>,
    pub typing: Arc<TypingCoordinator>,
    pub replies: Arc<ReplyGateway>,
    pub link: Arc<LinkState>,
    pub status: StatusConfig,
    pub reset_token: Option<String>,
    pub started_at: Instant,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = BridgeConfig::load_with_path(config_path).await?;
    let bind_addr = cfg.bind_addr()?;
    let auth_dir = cfg.auth_dir_path()?;
    tracing::info!(
        config_path = %path.display(),
        %bind_addr,
        transport_url = %cfg.transport.base_url,
        webhook_url = %cfg.webhook.url,
        auth_dir = ?auth_dir,
        question_timeout_seconds = cfg.questions.timeout_seconds,
        typing_refresh_seconds = cfg.questions.typing_refresh_seconds,
        recent_message_limit = cfg.questions.recent_message_limit,
        reset_endpoint_enabled = cfg.admin.reset_token().is_some(),
        "config ok"
    );
    Ok(())
}

pub async fn send_one_shot(
    config_path: Option<PathBuf>,
    chat_id: &str,
    message: &str,
    button: Option<&str>,
) -> Result<()> {
    let cfg = BridgeConfig::load(config_path).await?;
    let transport = build_transport(&cfg)?;
    let chat_id = ChatId::new(chat_id.trim());
    let payload = match button.map(str::trim).filter(|label| !label.is_empty()) {
        Some(label) => OutboundPayload::with_reply_button(message, &cfg.reply.button_id, label),
        None => OutboundPayload::text(message),
    };
    transport.send_message(&chat_id, payload).await?;
    tracing::info!(chat_id = %chat_id, "message sent");
    Ok(())
}

fn build_transport(cfg: &BridgeConfig) -> Result<HttpBridgeTransport> {
    Ok(HttpBridgeTransport::new(
        &cfg.transport.base_url,
        Duration::from_secs(cfg.transport.request_timeout_seconds),
    )?
    .with_auth_token(cfg.transport.auth_token.clone())
    .with_poll_interval(Duration::from_millis(cfg.transport.poll_interval_ms))
    .with_start_from_latest(cfg.transport.start_from_latest)
    .with_auth_dir(cfg.auth_dir_path()?))
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let started_at = Instant::now();
    let (cfg, path) = BridgeConfig::load_with_path(config_path).await?;
    tracing::info!(config_path = %path.display(), "config loaded");

    let addr = cfg.bind_addr()?;
    let listener = bind_listener(addr).await?;

    let transport: Arc<dyn ChatTransport> = Arc::new(build_transport(&cfg)?);
    let forwarder: Arc<dyn QuestionForwarder> = Arc::new(
        WebhookDispatcher::new(
            &cfg.webhook.url,
            Duration::from_secs(cfg.webhook.timeout_seconds),
        )?
        .with_auth_token(cfg.webhook.auth_token.clone()),
    );

    let timer: Arc<dyn Timer> = Arc::new(TokioTimer);
    let tracker = Arc::new(QuestionTracker::new(
        timer.clone(),
        cfg.questions.timeout(),
    ));
    let typing = Arc::new(TypingCoordinator::new(
        transport.clone(),
        timer,
        cfg.questions.typing_refresh(),
    ));
    let replies = Arc::new(ReplyGateway::new(
        transport.clone(),
        typing.clone(),
        tracker.clone(),
        cfg.reply.button_id.clone(),
        cfg.questions.clear_on_reply,
    ));
    let link = Arc::new(LinkState::new());

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
    transport.start(inbound_tx).await?;
    tracing::info!(transport = transport.transport_id(), "transport started");

    let gateway = Arc::new(Gateway::new(
        transport.clone(),
        tracker.clone(),
        typing.clone(),
        forwarder,
        link.clone(),
        &cfg.questions.reset_phrase,
        cfg.questions.recent_message_limit,
        inbound_rx,
    ));
    let shutdown = CancellationToken::new();
    let gateway_handle = gateway.start(shutdown.child_token());
    tracing::info!(
        question_timeout_seconds = cfg.questions.timeout_seconds,
        typing_refresh_seconds = cfg.questions.typing_refresh_seconds,
        "gateway started"
    );

    let state = Arc::new(AppState {
        transport,
        tracker,
        typing,
        replies,
        link,
        status: cfg.status.clone(),
        reset_token: cfg.admin.reset_token().map(str::to_string),
        started_at,
    });

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                path = %request.uri().path(),
                version = ?request.version(),
                request_id = %request_id(request)
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            // Only the path: `/reset-session` carries its secret in the query.
            tracing::info!(
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id(request),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(
            cfg.server.http_max_in_flight,
        ))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "groupbridge serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    match gateway_handle.await {
        Ok(()) => tracing::info!("gateway shutdown completed"),
        Err(e) => tracing::error!(error = %e, "gateway task join failed during shutdown"),
    }

    Ok(())
}

/// Bind before anything else starts so a taken port fails fast.
async fn bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind http listener on {addr}"))?;
    tracing::debug!(%addr, "http listener bound");
    Ok(listener)
}

/// Id assigned by `SetRequestIdLayer`, which sits outside the trace layer.
fn request_id<B>(request: &Request<B>) -> &str {
    request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("missing")
}

/// Resolves on ctrl-c, SIGTERM or an internal cancel, and cancels `shutdown` for everyone else.
async fn shutdown_signal(shutdown: CancellationToken) {
    let reason = tokio::select! {
        _ = shutdown.cancelled() => "internal",
        _ = ctrl_c() => "ctrl-c",
        _ = terminate() => "SIGTERM",
    };
    tracing::warn!(reason, "beginning graceful shutdown");
    shutdown.cancel();
}

async fn ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(error) => {
            tracing::error!(%error, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn request_id_comes_from_the_request_extension() {
        let mut request = Request::builder()
            .uri("/send-reply")
            .header("x-request-id", "spoofed")
            .body(())
            .expect("request");
        assert_eq!(request_id(&request), "missing");

        request
            .extensions_mut()
            .insert(RequestId::new(HeaderValue::from_static("req-42")));
        assert_eq!(request_id(&request), "req-42");
    }

    #[tokio::test]
    async fn bind_listener_reports_address_in_use() {
        let held = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = held.local_addr().expect("addr");
        let err = bind_listener(addr).await.expect_err("second bind should fail");
        assert!(err.to_string().contains(&format!("cannot bind http listener on {addr}")));
    }

    #[tokio::test]
    async fn shutdown_signal_returns_once_cancelled_elsewhere() {
        let shutdown = CancellationToken::new();
        let waiter = tokio::spawn(shutdown_signal(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("signal future resolves")
            .expect("join");
    }
}
