//! groupbridge configuration loader.
//!
//! TOML on disk, then environment overrides, then validation.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on the history window forwarded with a question.
pub const MAX_RECENT_MESSAGES: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub questions: QuestionsConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the chat-client sidecar.
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_transport_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Skip backlog messages present at startup.
    #[serde(default = "default_transport_start_from_latest")]
    pub start_from_latest: bool,
    #[serde(default = "default_transport_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Persisted session credentials shared with the sidecar. Removed by `/reset-session`.
    #[serde(default)]
    pub auth_dir: Option<String>,
}

fn default_transport_poll_interval_ms() -> u64 {
    1500
}

fn default_transport_start_from_latest() -> bool {
    true
}

fn default_transport_request_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_webhook_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_webhook_timeout_seconds() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionsConfig {
    #[serde(default = "default_question_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_typing_refresh_seconds")]
    pub typing_refresh_seconds: u64,
    #[serde(default = "default_recent_message_limit")]
    pub recent_message_limit: usize,
    /// Case-insensitive substring that clears the pending question of a chat.
    #[serde(default = "default_reset_phrase")]
    pub reset_phrase: String,
    /// Clear the pending question once a reply has been handed to the transport.
    #[serde(default = "default_clear_on_reply")]
    pub clear_on_reply: bool,
}

fn default_question_timeout_seconds() -> u64 {
    5 * 60
}

fn default_typing_refresh_seconds() -> u64 {
    10
}

fn default_recent_message_limit() -> usize {
    MAX_RECENT_MESSAGES
}

fn default_reset_phrase() -> String {
    "reset bot".to_string()
}

fn default_clear_on_reply() -> bool {
    true
}

impl Default for QuestionsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_question_timeout_seconds(),
            typing_refresh_seconds: default_typing_refresh_seconds(),
            recent_message_limit: default_recent_message_limit(),
            reset_phrase: default_reset_phrase(),
            clear_on_reply: default_clear_on_reply(),
        }
    }
}

impl QuestionsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn typing_refresh(&self) -> Duration {
        Duration::from_secs(self.typing_refresh_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyConfig {
    #[serde(default = "default_reply_button_id")]
    pub button_id: String,
}

fn default_reply_button_id() -> String {
    "btn_1".to_string()
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            button_id: default_reply_button_id(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Shared secret for `/reset-session`. Unset disables the endpoint.
    #[serde(default)]
    pub reset_token: Option<String>,
}

impl AdminConfig {
    pub fn reset_token(&self) -> Option<&str> {
        self.reset_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPage {
    #[default]
    Simple,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QrRender {
    #[default]
    Html,
    Raw,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusConfig {
    #[serde(default)]
    pub page: StatusPage,
    #[serde(default)]
    pub qr_render: QrRender,
}

impl BridgeConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let cfg = Self::from_toml_str(&contents)
            .map_err(|e| anyhow::anyhow!("config {}: {e}", path.display()))?;
        Ok((cfg, path))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let mut cfg: BridgeConfig =
            toml::from_str(contents).map_err(|e| anyhow::anyhow!("parse: {e}"))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORT") {
            if let Ok(port) = v.trim().parse::<u16>() {
                self.server.bind_addr = format!("0.0.0.0:{port}");
            }
        }
        if let Ok(v) = std::env::var("GROUPBRIDGE_TRANSPORT_URL") {
            if !v.trim().is_empty() {
                self.transport.base_url = v;
            }
        }
        if let Ok(v) = std::env::var("GROUPBRIDGE_TRANSPORT_TOKEN") {
            if !v.trim().is_empty() {
                self.transport.auth_token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("GROUPBRIDGE_WEBHOOK_URL") {
            if !v.trim().is_empty() {
                self.webhook.url = v;
            }
        }
        if let Ok(v) = std::env::var("GROUPBRIDGE_WEBHOOK_TOKEN") {
            if !v.trim().is_empty() {
                self.webhook.auth_token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("GROUPBRIDGE_RESET_TOKEN") {
            if !v.trim().is_empty() {
                self.admin.reset_token = Some(v);
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        if self.transport.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("transport.base_url is required"));
        }
        if self.transport.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("transport.poll_interval_ms must be > 0"));
        }
        if self.transport.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "transport.request_timeout_seconds must be > 0"
            ));
        }
        let webhook_url = self.webhook.url.trim();
        if webhook_url.is_empty() {
            return Err(anyhow::anyhow!("webhook.url is required"));
        }
        let parsed = reqwest::Url::parse(webhook_url)
            .map_err(|e| anyhow::anyhow!("invalid webhook.url: {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow::anyhow!(
                "invalid webhook.url scheme: {}",
                parsed.scheme()
            ));
        }
        if self.webhook.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("webhook.timeout_seconds must be > 0"));
        }
        if self.questions.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("questions.timeout_seconds must be > 0"));
        }
        if self.questions.typing_refresh_seconds == 0 {
            return Err(anyhow::anyhow!(
                "questions.typing_refresh_seconds must be > 0"
            ));
        }
        if !(1..=MAX_RECENT_MESSAGES).contains(&self.questions.recent_message_limit) {
            return Err(anyhow::anyhow!(
                "questions.recent_message_limit must be between 1 and {MAX_RECENT_MESSAGES}"
            ));
        }
        if self.questions.reset_phrase.trim().is_empty() {
            return Err(anyhow::anyhow!("questions.reset_phrase must not be empty"));
        }
        if self.reply.button_id.trim().is_empty() {
            return Err(anyhow::anyhow!("reply.button_id must not be empty"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .bind_addr
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server.bind_addr {:?}: {e}", self.server.bind_addr))
    }

    pub fn auth_dir_path(&self) -> anyhow::Result<Option<PathBuf>> {
        self.transport
            .auth_dir
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(expand_home)
            .transpose()
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".groupbridge").join("config.toml")
}

fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    if !path.starts_with("~/") {
        return Ok(PathBuf::from(path));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(path.replacen("~", &home, 1)))
}
