//! pwnagent - 无线审计设备的控制 Agent
//!
//! 入口：初始化日志、加载配置、构建 Agent，运行自动模式直到收到关闭信号。
//! 用法：`pwnagent [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use pwnagent::config::load_config;
use pwnagent::core::{
    create_agent, run_auto, RecoveryCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pwnagent::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    tracing::info!("{} starting on {}", config.main.name, config.main.iface);

    let shutdown = Arc::new(ShutdownManager::new());
    let agent = create_agent(config, Arc::clone(&shutdown)).context("Failed to create agent")?;

    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(RecoveryCleanup::new(Arc::clone(&agent)));

    let mut reasons = shutdown.subscribe();
    shutdown.install_signal_handlers();

    tokio::select! {
        _ = run_auto(Arc::clone(&agent)) => {
            tracing::info!("Agent loop finished");
        }
        _ = shutdown.wait_for_shutdown() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let reason = reasons.try_recv().unwrap_or(ShutdownReason::UserInitiated);
    coordinator.run_cleanup(&reason).await;

    match reason {
        ShutdownReason::FatalError(msg) => anyhow::bail!("fatal error: {msg}"),
        ShutdownReason::Reboot => tracing::warn!("Exiting for reboot"),
        ShutdownReason::Restart => tracing::warn!("Exiting for restart"),
        _ => {}
    }
    Ok(())
}
