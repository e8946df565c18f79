//! 优雅关闭
//!
//! 统一的关闭信号与清理：
//! - SIGTERM 视为有意重启，退出前写入恢复文件
//! - reboot / restart 在触发关闭前已自行保存
//! - Ctrl+C 直接退出，不留下恢复文件

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::orchestrator::Agent;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 服务重启（恢复文件已写入）
    Restart,
    /// 整机重启（恢复文件已写入）
    Reboot,
    FatalError(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(4);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 触发关闭；只有第一次调用的原因会被广播
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// 订阅关闭原因
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, saving state before exit...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self, reason: &ShutdownReason) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：管理多个清理任务
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    /// 每个清理任务的超时（秒）
    timeout_secs: u64,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 依次执行所有清理任务；失败或超时只记录日志
    pub async fn run_cleanup(&self, reason: &ShutdownReason) {
        tracing::info!(
            "Running {} cleanup tasks ({:?})...",
            self.cleanup_tasks.len(),
            reason
        );

        let timeout = tokio::time::Duration::from_secs(self.timeout_secs);

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup(reason)).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed successfully", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!("Cleanup task '{}' timed out after {}s", name, self.timeout_secs);
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }
}

/// SIGTERM 时写入恢复文件
pub struct RecoveryCleanup {
    agent: Arc<Agent>,
}

impl RecoveryCleanup {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for RecoveryCleanup {
    async fn cleanup(&self, reason: &ShutdownReason) -> anyhow::Result<()> {
        if *reason != ShutdownReason::Signal {
            return Ok(());
        }
        self.agent.save_recovery_state().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Recovery"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_manager_new() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown());
    }

    #[test]
    fn test_shutdown_manager_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_returns_after_trigger() {
        let manager = Arc::new(ShutdownManager::new());
        let waiter = Arc::clone(&manager);
        let handle = tokio::spawn(async move { waiter.wait_for_shutdown().await });
        manager.shutdown(ShutdownReason::Restart);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        manager.shutdown(ShutdownReason::Reboot);
        manager.shutdown(ShutdownReason::UserInitiated);
        assert_eq!(rx.try_recv().unwrap(), ShutdownReason::Reboot);
        assert!(rx.try_recv().is_err());
    }

    struct MockCleanup {
        seen: Arc<std::sync::Mutex<Vec<ShutdownReason>>>,
    }

    #[async_trait::async_trait]
    impl ShutdownCleanup for MockCleanup {
        async fn cleanup(&self, reason: &ShutdownReason) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(reason.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "MockCleanup"
        }
    }

    struct SlowCleanup;

    #[async_trait::async_trait]
    impl ShutdownCleanup for SlowCleanup {
        async fn cleanup(&self, _reason: &ShutdownReason) -> anyhow::Result<()> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Slow"
        }
    }

    #[tokio::test]
    async fn test_shutdown_coordinator_passes_reason() {
        let mut coordinator = ShutdownCoordinator::new().with_timeout(1);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        coordinator.register(SlowCleanup);
        coordinator.register(MockCleanup { seen: seen.clone() });

        coordinator.run_cleanup(&ShutdownReason::Signal).await;
        assert_eq!(*seen.lock().unwrap(), vec![ShutdownReason::Signal]);
    }
}
