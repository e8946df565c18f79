//! Agent 构建器：统一的 Agent 初始化逻辑
//!
//! 控制 API、Mesh、策略都可以替换（测试注入假实现）；未指定时按配置构建默认实现。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use crate::api::{Client, ControlApi};
use crate::config::AppConfig;
use crate::core::error::AgentError;
use crate::core::events::EventBus;
use crate::core::orchestrator::{now_secs, Agent};
use crate::core::policy::{DefaultPolicy, Mesh, NullMesh, Policy};
use crate::core::recovery::RecoveryStore;
use crate::core::shutdown::ShutdownManager;
use crate::core::state::{AgentState, ViewState};
use crate::core::targets::ApFilter;
use crate::grid::{Advertiser, GridClient};

pub struct AgentBuilder {
    config: AppConfig,
    shutdown: Arc<ShutdownManager>,
    api: Option<Arc<dyn ControlApi>>,
    mesh: Option<Arc<dyn Mesh>>,
    policy: Option<Arc<dyn Policy>>,
    grid: Option<Option<GridClient>>,
    events: Option<EventBus>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig, shutdown: Arc<ShutdownManager>) -> Self {
        Self {
            config,
            shutdown,
            api: None,
            mesh: None,
            policy: None,
            grid: None,
            events: None,
        }
    }

    pub fn with_api(mut self, api: Arc<dyn ControlApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_mesh(mut self, mesh: Arc<dyn Mesh>) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// 指定 grid 客户端；传 None 关闭遥测上报
    pub fn with_grid(mut self, grid: Option<GridClient>) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 构建 Agent：校验过滤正则并创建抓包目录
    pub fn build(self) -> Result<Arc<Agent>, AgentError> {
        let config = self.config;

        let filter = ApFilter::new(&config.main.whitelist, config.main.filter.as_deref())
            .map_err(|e| AgentError::Config(format!("invalid AP filter: {e}")))?;

        let handshakes = &config.bettercap.handshakes;
        if let Err(e) = std::fs::create_dir_all(handshakes) {
            tracing::warn!("Could not create {} ({})", handshakes.display(), e);
        }

        let events = self.events.unwrap_or_default();

        let grid = match self.grid {
            Some(grid) => grid,
            None => config.grid.enabled.then(|| GridClient::new(&config.grid)),
        };

        let api: Arc<dyn ControlApi> = match self.api {
            Some(api) => api,
            None => Arc::new(Client::from_config(&config.bettercap)),
        };

        let mesh: Arc<dyn Mesh> = match (self.mesh, &grid) {
            (Some(mesh), _) => mesh,
            (None, Some(client)) => {
                let policy = serde_json::to_value(&config.personality).unwrap_or_default();
                Arc::new(
                    Advertiser::new(
                        client.clone(),
                        events.clone(),
                        &config.main.name,
                        Duration::from_secs(config.grid.peers_poll_secs),
                    )
                    .with_policy(policy),
                )
            }
            (None, None) => Arc::new(NullMesh),
        };

        let policy: Arc<dyn Policy> = match self.policy {
            Some(policy) => policy,
            None => Arc::new(DefaultPolicy::new(config.personality.max_misses_for_recon)),
        };

        let (view_tx, _) = watch::channel(ViewState::default());
        let recovery = RecoveryStore::new(&config.recovery.path);

        Ok(Arc::new(Agent {
            config,
            api,
            mesh,
            policy,
            grid,
            filter,
            recovery,
            state: Mutex::new(AgentState::new(now_secs())),
            events,
            view_tx,
            shutdown: self.shutdown,
        }))
    }
}

/// 便捷函数：按配置构建带默认组件的 Agent
pub fn create_agent(config: AppConfig, shutdown: Arc<ShutdownManager>) -> Result<Arc<Agent>, AgentError> {
    AgentBuilder::new(config, shutdown).build()
}
