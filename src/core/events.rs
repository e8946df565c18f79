//! Agent 事件：类型化的事件枚举 + 广播总线
//!
//! 发布方从不等待订阅方：基于 tokio broadcast，慢订阅者只会丢失（Lagged）旧事件；
//! 监听器回调出错只记录日志，不影响发布方与其他监听器。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::api::{AccessPoint, Station};
use crate::core::epoch::EpochData;
use crate::grid::Peer;

/// 握手对应的目标：能在 Session 中匹配到 AP/STA 时携带完整上下文，否则只有 MAC
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandshakeTarget {
    Resolved { ap: AccessPoint, sta: Station },
    Bare { ap_mac: String, sta_mac: String },
}

/// Agent 生命周期与行为事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Starting,
    Ready,
    Rebooting,
    /// 过滤前的 AP 列表
    UnfilteredAps { aps: Vec<AccessPoint> },
    /// 过滤、排序后的工作集
    WifiUpdate { aps: Vec<AccessPoint> },
    Associating { ap: AccessPoint },
    Association { ap: AccessPoint },
    Deauthenticating { ap: AccessPoint, sta: Station },
    Deauthentication { ap: AccessPoint, sta: Station },
    /// 一次交互结束，回到常态
    Normal,
    ChannelHop { channel: u32 },
    Handshake { file: String, target: HandshakeTarget },
    Epoch { data: EpochData },
    PeerDetected { peer: Peer },
    PeerLost { peer: Peer },
    /// 事件流中其它 tag，原样透传
    Raw { tag: String, payload: serde_json::Value },
}

/// 事件监听器（插件等外部协作者）
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &AgentEvent) -> anyhow::Result<()>;

    /// 监听器名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 广播总线
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 发布事件；没有订阅者时直接丢弃
    pub fn publish(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// 为监听器启动独立任务逐条投递；总线关闭时任务结束
    pub fn attach(&self, listener: Arc<dyn EventListener>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = listener.on_event(&event).await {
                            tracing::warn!("Listener '{}' failed: {}", listener.name(), e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("Listener '{}' lagged, skipped {} events", listener.name(), n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
