//! 自动模式主循环：侦察 → 逐信道关联 / 解除认证 → 结束 epoch

use std::sync::Arc;
use std::time::Duration;

use crate::core::orchestrator::Agent;

fn throttle(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// 一轮完整的扫描交互
pub async fn run_epoch(agent: &Agent) {
    let p = &agent.config().personality;
    let throttle_a = throttle(p.throttle_a);
    let throttle_d = throttle(p.throttle_d);

    agent.recon().await;
    for (channel, aps) in agent.group_by_channel().await {
        agent.set_channel(channel, true).await;

        if !agent.is_stale().await && agent.any_activity().await {
            tracing::info!("{} access points on channel {}", aps.len(), channel);
        }

        for ap in &aps {
            agent.associate(ap, throttle_a).await;
            for sta in &ap.clients {
                agent.deauth(ap, sta, throttle_d).await;
            }
        }
    }
    agent.next_epoch().await;
}

/// 启动 Agent 并无限循环
pub async fn run_auto(agent: Arc<Agent>) {
    agent.start().await;
    loop {
        run_epoch(&agent).await;
    }
}
