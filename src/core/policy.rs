//! 外部协作者接口：决策策略（Policy）与 Mesh 广播（Mesh）
//!
//! 决策 / 奖励逻辑不在本 crate 内实现；Orchestrator 只通过这两个窄接口查询与通知。

use std::time::Duration;

use async_trait::async_trait;

use crate::api::AccessPoint;
use crate::core::epoch::EpochData;
use crate::core::error::AgentError;
use crate::grid::Peer;

/// 奖励统计（由外部训练器提供，用于遥测上报）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RewardStats {
    pub train_epochs: u64,
    pub avg_reward: f64,
    pub min_reward: f64,
    pub max_reward: f64,
}

/// 决策策略 / 训练器
#[async_trait]
pub trait Policy: Send + Sync {
    /// 启动时阻塞直到策略就绪
    async fn wait_until_ready(&self) {}

    /// 当前扫描数据是否已过期（过期时所有动作都跳过）
    fn is_stale(&self, epoch: &EpochData) -> bool;

    /// 交互命令失败
    fn on_error(&self, who: &str, err: &AgentError) {
        tracing::error!("Error while interacting with {} ({})", who, err);
    }

    /// 等待（跳信道停留、侦察时长）
    async fn wait_for(&self, secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    /// 每次扫描后的 AP 与对等节点
    fn observe(&self, _aps: &[AccessPoint], _peers: &[Peer]) {}

    /// 一个 epoch 结束
    fn on_epoch(&self, _data: &EpochData) {}

    fn rewards(&self) -> RewardStats {
        RewardStats::default()
    }
}

/// 默认策略：立即就绪；连续 unknown BSSID 次数超过上限时视为过期
#[derive(Debug, Clone)]
pub struct DefaultPolicy {
    max_misses_for_recon: u64,
}

impl DefaultPolicy {
    pub fn new(max_misses_for_recon: u64) -> Self {
        Self {
            max_misses_for_recon,
        }
    }
}

#[async_trait]
impl Policy for DefaultPolicy {
    fn is_stale(&self, epoch: &EpochData) -> bool {
        epoch.missed_interactions > self.max_misses_for_recon
    }
}

/// 广播中的计数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvertisedStats {
    pub pwnd_run: usize,
    pub pwnd_tot: usize,
    pub uptime: u64,
    pub epoch: u64,
}

/// Mesh 广播与对等节点
#[async_trait]
pub trait Mesh: Send + Sync {
    async fn start_advertising(&self);

    /// 对等节点，按距离 / 最近出现排序
    async fn peers(&self) -> Vec<Peer>;

    async fn closest_peer(&self) -> Option<Peer> {
        self.peers().await.into_iter().next()
    }

    async fn update_advertisement(&self, stats: AdvertisedStats);
}

/// Mesh 关闭时的空实现
#[derive(Debug, Default)]
pub struct NullMesh;

#[async_trait]
impl Mesh for NullMesh {
    async fn start_advertising(&self) {
        tracing::info!("Mesh disabled, not advertising");
    }

    async fn peers(&self) -> Vec<Peer> {
        Vec::new()
    }

    async fn update_advertisement(&self, _stats: AdvertisedStats) {}
}
