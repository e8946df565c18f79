//! 控制 API 客户端：Session 拉取、命令执行、可重连的事件流
//!
//! Orchestrator 只依赖 `ControlApi` trait；`Client` 是基于 reqwest + tokio-tungstenite 的实现。

pub mod client;
pub mod session;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{decode, Client, Reply};
pub use session::{AccessPoint, Interface, Module, Session, Station, WifiSession};

/// 控制 API 错误：传输失败、非 2xx、解析失败、WebSocket 失败
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// 事件流消费者：每条入站消息调用一次；返回错误只会被记录，不会中断订阅
#[async_trait]
pub trait EventConsumer: Send + Sync {
    async fn consume(&self, message: &str) -> anyhow::Result<()>;
}

/// 控制 API 接口（便于在测试中替换为假实现）
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// 原始 Session 响应；2xx 纯文本也算控制 API 已有响应
    async fn session_reply(&self) -> Result<Reply, ApiError>;

    /// 拉取并解析 Session 快照
    async fn session(&self) -> Result<Session, ApiError> {
        match self.session_reply().await? {
            Reply::Json(v) => serde_json::from_value(v).map_err(|e| ApiError::Decode(e.to_string())),
            Reply::Text(t) => Err(ApiError::Decode(format!("session is not json: {}", t.trim()))),
        }
    }

    /// 执行一条命令；verbose_errors=false 时不记录非 2xx 响应
    async fn run(&self, cmd: &str, verbose_errors: bool) -> Result<Reply, ApiError>;

    /// 订阅事件流，断线后无限重连，永不返回
    async fn stream_events(&self, consumer: Arc<dyn EventConsumer>);

    async fn is_module_running(&self, module: &str) -> Result<bool, ApiError> {
        Ok(self.session().await?.is_module_running(module))
    }

    async fn start_module(&self, module: &str) -> Result<Reply, ApiError> {
        self.run(&format!("{module} on"), true).await
    }

    async fn restart_module(&self, module: &str) -> Result<Reply, ApiError> {
        self.run(&format!("{module} off; {module} on"), true).await
    }
}
