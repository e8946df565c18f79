//! 基于 HTTP Basic Auth 的控制 API 客户端
//!
//! - `GET/POST <base>/session`：Session 快照与命令执行
//! - `<base>/events`：WebSocket 事件流，按 ping 间隔保活，断线后立即（或按配置延迟）重连

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures_util::{FutureExt, SinkExt, StreamExt};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{ApiError, ControlApi, EventConsumer};
use crate::config::BettercapSection;

/// 命令 / Session 的解码结果：正常为 JSON，少数状态下引擎返回纯文本
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Json(Value),
    Text(String),
}

impl Reply {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Reply::Json(v) => Some(v),
            Reply::Text(_) => None,
        }
    }
}

/// 统一解码规则
///
/// - 非 2xx：返回 `ApiError::Status`（verbose_errors 时记录 info 日志）
/// - 2xx 但不是 JSON：记录 error 日志并返回原始文本
pub fn decode(status: StatusCode, body: String, verbose_errors: bool) -> Result<Reply, ApiError> {
    if !status.is_success() {
        let err = ApiError::Status {
            status: status.as_u16(),
            body: body.trim().to_string(),
        };
        if verbose_errors {
            tracing::info!("{}", err);
        }
        return Err(err);
    }

    match serde_json::from_str::<Value>(&body) {
        Ok(v) => Ok(Reply::Json(v)),
        Err(e) => {
            tracing::error!("Error while decoding json: error='{}' resp='{}'", e, body);
            Ok(Reply::Text(body))
        }
    }
}

/// 控制 API 客户端
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    url: String,
    websocket: String,
    username: String,
    password: String,
    ping_interval: Duration,
    ping_timeout: Duration,
    retry_delay: Duration,
}

impl Client {
    pub fn new(hostname: &str, scheme: &str, port: u16, username: &str, password: &str) -> Self {
        let ws_scheme = if scheme == "https" { "wss" } else { "ws" };
        Self {
            http: reqwest::Client::new(),
            url: format!("{scheme}://{hostname}:{port}/api"),
            websocket: format!("{ws_scheme}://{hostname}:{port}/api"),
            username: username.to_string(),
            password: password.to_string(),
            ping_interval: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(90),
            retry_delay: Duration::ZERO,
        }
    }

    /// 从 [bettercap] 配置段创建
    pub fn from_config(cfg: &BettercapSection) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("HTTP client build failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            http,
            ..Self::new(&cfg.hostname, &cfg.scheme, cfg.port, &cfg.username, &cfg.password)
        }
        .with_ping(
            Duration::from_secs(cfg.ping_interval_secs.max(1)),
            Duration::from_secs(cfg.ping_timeout_secs.max(1)),
        )
        .with_retry_delay(Duration::from_millis(cfg.retry_delay_ms))
    }

    pub fn with_ping(mut self, interval: Duration, timeout: Duration) -> Self {
        self.ping_interval = interval;
        self.ping_timeout = timeout;
        self
    }

    /// 事件流重连前的等待；默认 0（立即重连）
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn events_request(&self) -> Result<Request, ApiError> {
        let mut request = format!("{}/events", self.websocket)
            .into_client_request()
            .map_err(|e| ApiError::WebSocket(e.to_string()))?;
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));
        let value = HeaderValue::from_str(&format!("Basic {token}"))
            .map_err(|e| ApiError::WebSocket(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(request)
    }

    /// 单次连接：读到关闭 / 断开返回 Ok，保活超时或协议错误返回 Err
    async fn consume_connection(&self, consumer: &Arc<dyn EventConsumer>) -> Result<(), ApiError> {
        let request = self.events_request()?;
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ApiError::WebSocket(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let mut ping = tokio::time::interval(self.ping_interval);
        ping.tick().await;
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => return Err(ApiError::WebSocket(e.to_string())),
                        None => return Ok(()),
                    };
                    last_seen = Instant::now();
                    match msg {
                        WsMessage::Text(text) => dispatch(consumer, &text).await,
                        WsMessage::Binary(data) => match String::from_utf8(data) {
                            Ok(text) => dispatch(consumer, &text).await,
                            Err(e) => tracing::debug!("Error while parsing event ({})", e),
                        },
                        WsMessage::Close(_) => return Ok(()),
                        _ => {}
                    }
                }
                _ = ping.tick() => {
                    if last_seen.elapsed() >= self.ping_timeout {
                        return Err(ApiError::WebSocket(format!(
                            "no traffic for {}s",
                            last_seen.elapsed().as_secs()
                        )));
                    }
                    ws_tx
                        .send(WsMessage::Ping(Vec::new()))
                        .await
                        .map_err(|e| ApiError::WebSocket(e.to_string()))?;
                }
            }
        }
    }
}

/// 把一条消息交给消费者；错误与 panic 都只记录，不向上传播
pub(crate) async fn dispatch(consumer: &Arc<dyn EventConsumer>, text: &str) {
    match AssertUnwindSafe(consumer.consume(text)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Error while parsing event ({})", e),
        Err(_) => tracing::warn!("Event consumer panicked, stream continues"),
    }
}

#[async_trait]
impl ControlApi for Client {
    async fn session_reply(&self) -> Result<Reply, ApiError> {
        let resp = self
            .http
            .get(format!("{}/session", self.url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        decode(status, body, true)
    }

    async fn run(&self, cmd: &str, verbose_errors: bool) -> Result<Reply, ApiError> {
        let resp = self
            .http
            .post(format!("{}/session", self.url))
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({ "cmd": cmd }))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        decode(status, body, verbose_errors)
    }

    async fn stream_events(&self, consumer: Arc<dyn EventConsumer>) {
        loop {
            match self.consume_connection(&consumer).await {
                Ok(()) => tracing::debug!("Lost websocket connection. Reconnecting..."),
                Err(e) => tracing::debug!("Websocket exception ({})", e),
            }
            if !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
    }
}
