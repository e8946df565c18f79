//! Agent 编排器：启动流程、后台循环、对外动作
//!
//! 负责：等待控制 API 与监听网卡、下发无线配置、启动事件流循环与 1Hz 刷新循环，
//! 并向外部策略提供 scan / associate / deauth / set_channel 等动作。
//! 所有领域状态放在一把 `Mutex<AgentState>` 中；持锁期间不做网络 I/O 与 sleep。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::api::{AccessPoint, ControlApi, EventConsumer, Station};
use crate::config::AppConfig;
use crate::core::epoch::EpochData;
use crate::core::error::{AgentError, RecoveryError};
use crate::core::events::{AgentEvent, EventBus, HandshakeTarget};
use crate::core::policy::{AdvertisedStats, Mesh, Policy};
use crate::core::recovery::RecoveryStore;
use crate::core::shutdown::{ShutdownManager, ShutdownReason};
use crate::core::state::{AgentPhase, AgentState, ViewState};
use crate::core::targets::{self, ApFilter};
use crate::grid::{GridClient, SessionSummary};

/// 事件流中的握手 tag
pub const HANDSHAKE_TAG: &str = "wifi.client.handshake";

const RETRY_INTERVAL: Duration = Duration::from_secs(1);
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// 当前时间（UNIX 秒，浮点）
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

pub fn secs_to_hhmmss(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// 抓包目录中唯一 .pcap 文件数量
pub fn total_unique_handshakes(dir: &Path) -> usize {
    let pattern = dir.join("*.pcap");
    match glob::glob(&pattern.to_string_lossy()) {
        Ok(paths) => paths.filter_map(Result::ok).count(),
        Err(e) => {
            tracing::debug!("Bad capture pattern {} ({})", pattern.display(), e);
            0
        }
    }
}

pub struct Agent {
    pub(crate) config: AppConfig,
    pub(crate) api: Arc<dyn ControlApi>,
    pub(crate) mesh: Arc<dyn Mesh>,
    pub(crate) policy: Arc<dyn Policy>,
    pub(crate) grid: Option<GridClient>,
    pub(crate) filter: ApFilter,
    pub(crate) recovery: RecoveryStore,
    pub(crate) state: Mutex<AgentState>,
    pub(crate) events: EventBus,
    pub(crate) view_tx: watch::Sender<ViewState>,
    pub(crate) shutdown: Arc<ShutdownManager>,
}

/// 事件流消费者：把每条消息交给 Agent
struct StreamHandler {
    agent: Arc<Agent>,
}

#[async_trait]
impl EventConsumer for StreamHandler {
    async fn consume(&self, message: &str) -> anyhow::Result<()> {
        self.agent.on_event(message).await
    }
}

impl Agent {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn view(&self) -> watch::Receiver<ViewState> {
        self.view_tx.subscribe()
    }

    /// 可用信道：配置了限制时即为该列表，否则为空（表示全部）
    pub fn supported_channels(&self) -> &[u32] {
        &self.config.personality.channels
    }

    pub async fn access_points(&self) -> Vec<AccessPoint> {
        self.state.lock().await.access_points.clone()
    }

    pub async fn total_aps(&self) -> usize {
        self.state.lock().await.tot_aps
    }

    pub async fn aps_on_channel(&self) -> usize {
        self.state.lock().await.aps_on_channel
    }

    pub async fn current_channel(&self) -> u32 {
        self.state.lock().await.current_channel
    }

    pub async fn handshakes(&self) -> std::collections::HashMap<String, Value> {
        self.state.lock().await.handshakes.clone()
    }

    pub async fn history(&self) -> std::collections::HashMap<String, u32> {
        self.state.lock().await.history.clone()
    }

    pub async fn last_pwnd(&self) -> Option<String> {
        self.state.lock().await.last_pwnd.clone()
    }

    pub async fn epoch(&self) -> EpochData {
        self.state.lock().await.epoch.data()
    }

    pub async fn any_activity(&self) -> bool {
        self.state.lock().await.epoch.any_activity
    }

    pub async fn is_stale(&self) -> bool {
        let data = self.state.lock().await.epoch.data();
        self.policy.is_stale(&data)
    }

    async fn uptime_secs(&self) -> u64 {
        let started_at = self.state.lock().await.started_at;
        (now_secs() - started_at).max(0.0) as u64
    }

    fn set_phase(&self, phase: AgentPhase) {
        self.view_tx.send_modify(|v| v.phase = phase);
    }

    // ---------------------------------------------------------------- 启动

    /// 启动流程：策略就绪 → 等待 API → 静音事件 → 监听网卡 → 无线配置 → 后台循环
    pub async fn start(self: &Arc<Self>) {
        self.policy.wait_until_ready().await;
        self.wait_api().await;
        self.setup_events().await;

        self.set_phase(AgentPhase::Starting);
        self.events.publish(AgentEvent::Starting);

        self.start_monitor_mode().await;
        self.start_event_polling();
        self.start_session_fetcher();
        self.start_grid_reporter();

        self.next_epoch().await;
        self.set_phase(AgentPhase::Ready);
        self.events.publish(AgentEvent::Ready);
    }

    /// 控制 API 启动可能晚于 Agent：每秒重试直到有响应
    async fn wait_api(&self) {
        loop {
            match self.api.session_reply().await {
                Ok(_) => return,
                Err(e) => {
                    tracing::info!("Waiting for control API to be available... ({})", e);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn setup_events(&self) {
        tracing::info!("Connecting to control API...");
        for tag in &self.config.bettercap.silence {
            let _ = self.api.run(&format!("events.ignore {tag}"), false).await;
        }
    }

    async fn run_logged(&self, cmd: &str) {
        if let Err(e) = self.api.run(cmd, true).await {
            tracing::warn!("Command '{}' failed ({})", cmd, e);
        }
    }

    async fn reset_wifi_settings(&self) {
        let p = &self.config.personality;
        let b = &self.config.bettercap;
        self.run_logged(&format!("set wifi.interface {}", self.config.main.iface)).await;
        self.run_logged(&format!("set wifi.ap.ttl {}", p.ap_ttl)).await;
        self.run_logged(&format!("set wifi.sta.ttl {}", p.sta_ttl)).await;
        self.run_logged(&format!("set wifi.rssi.min {}", p.min_rssi)).await;
        self.run_logged(&format!("set wifi.handshakes.file {}", b.handshakes.display())).await;
        self.run_logged("set wifi.handshakes.aggregate false").await;
    }

    async fn start_monitor_mode(&self) {
        let iface = &self.config.main.iface;
        let mon_start_cmd = self
            .config
            .main
            .mon_start_cmd
            .as_deref()
            .filter(|c| !c.is_empty());

        loop {
            match self.api.session().await {
                Ok(s) if s.has_interface(iface) => {
                    tracing::info!("Found monitor interface: {}", iface);
                    break;
                }
                Ok(_) => match mon_start_cmd {
                    Some(cmd) => {
                        tracing::info!("Starting monitor interface...");
                        self.run_logged(&format!("!{cmd}")).await;
                    }
                    None => {
                        tracing::info!("Waiting for monitor interface {}...", iface);
                        tokio::time::sleep(RETRY_INTERVAL).await;
                    }
                },
                Err(e) => {
                    tracing::warn!("Error while fetching interfaces ({})", e);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }

        tracing::info!(
            "Handshakes will be collected inside {}",
            self.config.bettercap.handshakes.display()
        );
        self.reset_wifi_settings().await;

        let wifi_running = match self.api.is_module_running("wifi").await {
            Ok(running) => running,
            Err(e) => {
                tracing::warn!("Could not read module state ({})", e);
                false
            }
        };
        let restart = !self.config.main.no_restart;
        if wifi_running && restart {
            tracing::debug!("Restarting wifi module...");
            if let Err(e) = self.api.restart_module("wifi.recon").await {
                tracing::warn!("Error while restarting wifi module ({})", e);
            }
            self.run_logged("wifi.clear").await;
        } else if !wifi_running {
            tracing::debug!("Starting wifi module...");
            if let Err(e) = self.api.start_module("wifi.recon").await {
                tracing::warn!("Error while starting wifi module ({})", e);
            }
        }

        self.mesh.start_advertising().await;
    }

    // ---------------------------------------------------------------- 后台循环

    fn start_event_polling(self: &Arc<Self>) {
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = agent.load_recovery_state(true, true).await {
                tracing::debug!("Recovery load failed ({})", e);
            }
            if let Err(e) = agent.api.run("events.clear", true).await {
                tracing::debug!("Error while clearing events ({})", e);
            }
            tracing::debug!("Polling events...");
            let consumer: Arc<dyn EventConsumer> = Arc::new(StreamHandler {
                agent: Arc::clone(&agent),
            });
            agent.api.stream_events(consumer).await;
        });
    }

    fn start_session_fetcher(self: &Arc<Self>) {
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match agent.api.session().await {
                    Ok(_) => agent.refresh_stats().await,
                    Err(e) => tracing::warn!("Error while fetching session ({})", e),
                }
                tokio::time::sleep(STATS_INTERVAL).await;
            }
        });
    }

    fn start_grid_reporter(self: &Arc<Self>) {
        let Some(grid) = self.grid.clone() else {
            return;
        };
        let secs = self.config.grid.report_interval_secs;
        if secs == 0 {
            return;
        }
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            // 第一次 tick 立即完成
            interval.tick().await;
            loop {
                interval.tick().await;
                if !grid.is_connected().await {
                    tracing::debug!("No internet connectivity, skipping grid report");
                    continue;
                }
                let summary = agent.session_summary().await;
                if let Err(e) = grid.push_telemetry(&summary).await {
                    tracing::warn!("Error while pushing grid data ({})", e);
                }
            }
        });
    }

    /// 1Hz 刷新：运行时间、广播、对等节点、AP/STA 计数、握手计数
    pub async fn refresh_stats(&self) {
        let uptime = self.uptime_secs().await;
        self.view_tx
            .send_modify(|v| v.uptime = secs_to_hhmmss(uptime));

        let pwnd_tot = total_unique_handshakes(&self.config.bettercap.handshakes);
        let stats = {
            let st = self.state.lock().await;
            AdvertisedStats {
                pwnd_run: st.handshakes.len(),
                pwnd_tot,
                uptime,
                epoch: st.epoch.epoch,
            }
        };
        self.mesh.update_advertisement(stats).await;

        let peers = self.mesh.peers().await;
        let peers_txt = match peers.first() {
            Some(closest) => format!("{} ({})", closest.name(), peers.len()),
            None => "-".to_string(),
        };
        self.view_tx.send_modify(|v| v.peers = peers_txt);

        let (aps, sta) = self.state.lock().await.update_counters();
        self.view_tx.send_modify(|v| {
            v.aps = aps;
            v.sta = sta;
        });

        self.update_handshakes(0).await;
    }

    async fn update_handshakes(&self, new_shakes: u64) {
        let total = total_unique_handshakes(&self.config.bettercap.handshakes);
        let txt = {
            let mut st = self.state.lock().await;
            st.epoch.track_handshakes(new_shakes);
            st.shakes_text(total)
        };
        self.view_tx.send_modify(|v| v.shakes = txt);
    }

    pub async fn session_summary(&self) -> SessionSummary {
        let rewards = self.policy.rewards();
        let peers = self.mesh.peers().await.len();
        let uptime = self.uptime_secs().await;
        let st = self.state.lock().await;
        let totals = st.epoch.totals();
        SessionSummary {
            duration: secs_to_hhmmss(uptime),
            epochs: st.epoch.epoch,
            train_epochs: rewards.train_epochs,
            avg_reward: rewards.avg_reward,
            min_reward: rewards.min_reward,
            max_reward: rewards.max_reward,
            deauthed: totals.deauths,
            associated: totals.associations,
            handshakes: st.handshakes.len() as u64,
            peers,
        }
    }

    /// 处理事件流中的一条消息；返回错误只会被事件流记录
    pub async fn on_event(&self, msg: &str) -> anyhow::Result<()> {
        let jmsg: Value = serde_json::from_str(msg)?;
        let tag = jmsg
            .get("tag")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("event without tag"))?
            .to_string();

        if tag != HANDSHAKE_TAG {
            let payload = jmsg.get("data").cloned().unwrap_or(Value::Null);
            self.events.publish(AgentEvent::Raw { tag, payload });
            return Ok(());
        }

        let field = |name: &str| -> anyhow::Result<String> {
            jmsg["data"][name]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("handshake event without {name}"))
        };
        let filename = field("file")?;
        let sta_mac = field("station")?;
        let ap_mac = field("ap")?;
        let key = AgentState::handshake_key(&sta_mac, &ap_mac);

        let is_new = self.state.lock().await.record_handshake(&key, jmsg.clone());
        if is_new {
            let resolved = match self.api.session().await {
                Ok(s) => s.find_ap_sta(&sta_mac, &ap_mac),
                Err(e) => {
                    tracing::warn!("Could not resolve handshake target ({})", e);
                    None
                }
            };

            let (last_pwnd, target) = match resolved {
                None => {
                    tracing::warn!("!!! Captured new handshake: {} !!!", key);
                    (
                        ap_mac.clone(),
                        HandshakeTarget::Bare {
                            ap_mac: ap_mac.clone(),
                            sta_mac: sta_mac.clone(),
                        },
                    )
                }
                Some((ap, sta)) => {
                    tracing::warn!(
                        "!!! Captured new handshake on channel {}, {} dBm: {} ({}) -> {} [{} ({})] !!!",
                        ap.channel,
                        ap.rssi,
                        sta.mac,
                        sta.vendor,
                        ap.hostname,
                        ap.mac,
                        ap.vendor
                    );
                    (ap.display_name().to_string(), HandshakeTarget::Resolved { ap, sta })
                }
            };

            self.state.lock().await.last_pwnd = Some(last_pwnd);
            self.events.publish(AgentEvent::Handshake {
                file: filename,
                target,
            });
        }

        self.update_handshakes(if is_new { 1 } else { 0 }).await;
        Ok(())
    }

    // ---------------------------------------------------------------- 恢复

    /// 重启前保存；覆盖已有文件
    pub async fn save_recovery_state(&self) -> Result<(), RecoveryError> {
        let data = self.state.lock().await.to_recovery();
        self.recovery.save(&data)
    }

    /// 读取恢复文件并恢复状态；no_errors 时任何失败都被吞掉（返回 Ok(false)）
    pub async fn load_recovery_state(&self, delete: bool, no_errors: bool) -> Result<bool, RecoveryError> {
        match self.recovery.load(delete) {
            Ok(data) => {
                self.state.lock().await.restore(data);
                Ok(true)
            }
            Err(e) if no_errors => {
                tracing::debug!("No recovery data loaded ({})", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn reboot(&self) {
        self.prepare_restart(ShutdownReason::Reboot).await;
    }

    pub async fn restart(&self) {
        self.prepare_restart(ShutdownReason::Restart).await;
    }

    async fn prepare_restart(&self, reason: ShutdownReason) {
        self.set_phase(AgentPhase::Rebooting);
        self.events.publish(AgentEvent::Rebooting);
        if let Err(e) = self.save_recovery_state().await {
            tracing::error!("Error while saving recovery data ({})", e);
        }
        self.shutdown.shutdown(reason);
    }

    // ---------------------------------------------------------------- 对外动作

    /// 拉取 Session、过滤、按信道排序并保存为当前工作集；失败时本轮为空
    pub async fn scan(&self) -> Vec<AccessPoint> {
        let aps = match self.api.session().await {
            Ok(s) => {
                let all = s.wifi.aps;
                self.events.publish(AgentEvent::UnfilteredAps { aps: all.clone() });
                self.filter.apply(all)
            }
            Err(e) => {
                tracing::error!("Error while getting access points ({})", e);
                Vec::new()
            }
        };
        self.set_access_points(aps).await
    }

    async fn set_access_points(&self, aps: Vec<AccessPoint>) -> Vec<AccessPoint> {
        let peers = self.mesh.peers().await;
        {
            let mut st = self.state.lock().await;
            st.access_points = aps.clone();
            st.epoch.observe(&aps, &peers);
        }
        self.events.publish(AgentEvent::WifiUpdate { aps: aps.clone() });
        self.policy.observe(&aps, &peers);
        aps
    }

    /// 重新扫描并按信道分组，最繁忙的信道在前
    pub async fn group_by_channel(&self) -> Vec<(u32, Vec<AccessPoint>)> {
        let aps = self.scan().await;
        targets::group_by_channel(&aps, &self.config.personality.channels)
    }

    async fn should_interact(&self, who: &str) -> bool {
        let max = self.config.personality.max_interactions;
        self.state.lock().await.should_interact(who, max)
    }

    async fn on_error(&self, who: &str, err: AgentError) {
        if err.is_unknown_bssid() {
            self.state.lock().await.epoch.track_miss();
        }
        self.policy.on_error(who, &err);
    }

    pub async fn associate(&self, ap: &AccessPoint, throttle: Duration) {
        if self.is_stale().await {
            tracing::debug!("Recon is stale, skipping assoc({}).", ap.mac);
            return;
        }
        if !self.config.personality.associate {
            tracing::debug!("Association disabled, skipping {}.", ap.mac);
            return;
        }
        if !self.should_interact(&ap.mac).await {
            tracing::debug!("Throttled, skipping assoc({}).", ap.mac);
            return;
        }

        self.events.publish(AgentEvent::Associating { ap: ap.clone() });
        tracing::info!(
            "Sending association frame to {} ({} {}) on channel {} [{} clients], {} dBm...",
            ap.hostname,
            ap.mac,
            ap.vendor,
            ap.channel,
            ap.clients.len(),
            ap.rssi
        );
        match self.api.run(&format!("wifi.assoc {}", ap.mac), true).await {
            Ok(_) => self.state.lock().await.epoch.track_assoc(),
            Err(e) => self.on_error(&ap.mac, e.into()).await,
        }

        self.events.publish(AgentEvent::Association { ap: ap.clone() });
        if !throttle.is_zero() {
            tokio::time::sleep(throttle).await;
        }
        self.events.publish(AgentEvent::Normal);
    }

    pub async fn deauth(&self, ap: &AccessPoint, sta: &Station, throttle: Duration) {
        if self.is_stale().await {
            tracing::debug!("Recon is stale, skipping deauth({}).", sta.mac);
            return;
        }
        if !self.config.personality.deauth {
            tracing::debug!("Deauthentication disabled, skipping {}.", sta.mac);
            return;
        }
        if !self.should_interact(&sta.mac).await {
            tracing::debug!("Throttled, skipping deauth({}).", sta.mac);
            return;
        }

        self.events.publish(AgentEvent::Deauthenticating {
            ap: ap.clone(),
            sta: sta.clone(),
        });
        tracing::info!(
            "Deauthing {} ({}) from {} ({} {}) on channel {}, {} dBm...",
            sta.mac,
            sta.vendor,
            ap.hostname,
            ap.mac,
            ap.vendor,
            ap.channel,
            ap.rssi
        );
        match self.api.run(&format!("wifi.deauth {}", sta.mac), true).await {
            Ok(_) => self.state.lock().await.epoch.track_deauth(),
            Err(e) => self.on_error(&sta.mac, e.into()).await,
        }

        self.events.publish(AgentEvent::Deauthentication {
            ap: ap.clone(),
            sta: sta.clone(),
        });
        if !throttle.is_zero() {
            tokio::time::sleep(throttle).await;
        }
        self.events.publish(AgentEvent::Normal);
    }

    /// 跳信道；上一轮有 deauth / assoc 时先在当前信道停留
    pub async fn set_channel(&self, channel: u32, verbose: bool) {
        if self.is_stale().await {
            tracing::debug!("Recon is stale, skipping set_channel({}).", channel);
            return;
        }

        let (current, wait, any_activity) = {
            let st = self.state.lock().await;
            (
                st.current_channel,
                targets::hop_wait(&st.epoch, &self.config.personality),
                st.epoch.any_activity,
            )
        };
        if channel == current {
            return;
        }

        if current != 0 && wait > 0 {
            if verbose {
                tracing::info!("Waiting for {}s on channel {}...", wait, current);
            } else {
                tracing::debug!("Waiting for {}s on channel {}...", wait, current);
            }
            self.policy.wait_for(wait).await;
        }
        if verbose && any_activity {
            tracing::info!("CHANNEL {}", channel);
        }

        match self.api.run(&format!("wifi.recon.channel {channel}"), true).await {
            Ok(_) => {
                {
                    let mut st = self.state.lock().await;
                    st.current_channel = channel;
                    st.epoch.track_hop();
                }
                self.view_tx.send_modify(|v| v.channel = channel.to_string());
                self.events.publish(AgentEvent::ChannelHop { channel });
            }
            Err(e) => tracing::error!("Error while setting channel ({})", e),
        }
    }

    /// 侦察：长时间无活动时延长侦察时长；未限制信道时在全部信道上扫描
    pub async fn recon(&self) {
        let p = &self.config.personality;
        let mut recon_time = p.recon_time;
        let inactive_for = self.state.lock().await.epoch.inactive_for;
        if inactive_for >= p.max_inactive_scale {
            recon_time *= p.recon_inactive_multiplier;
        }

        self.view_tx.send_modify(|v| v.channel = "*".to_string());

        if p.channels.is_empty() {
            self.state.lock().await.current_channel = 0;
            tracing::debug!("RECON {}s", recon_time);
            self.run_logged("wifi.recon.channel clear").await;
        } else {
            let list = p
                .channels
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",");
            tracing::debug!("RECON {}s ON CHANNELS {}", recon_time, list);
            if let Err(e) = self.api.run(&format!("wifi.recon.channel {list}"), true).await {
                tracing::error!("Error while setting wifi.recon.channels ({})", e);
            }
        }

        self.policy.wait_for(recon_time).await;
    }

    /// 结束当前 epoch 并通知外部
    pub async fn next_epoch(&self) -> EpochData {
        let data = self.state.lock().await.epoch.next();
        tracing::info!(
            "[epoch {}] duration hops={} deauths={} assocs={} handshakes={} aps={} peers={} inactive_for={}",
            data.epoch,
            data.num_hops,
            data.num_deauths,
            data.num_associations,
            data.num_handshakes,
            data.num_aps,
            data.num_peers,
            data.inactive_for
        );
        self.events.publish(AgentEvent::Epoch { data: data.clone() });
        self.policy.on_epoch(&data);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_secs_to_hhmmss() {
        assert_eq!(secs_to_hhmmss(0), "00:00:00");
        assert_eq!(secs_to_hhmmss(3661), "01:01:01");
        assert_eq!(secs_to_hhmmss(100 * 3600), "100:00:00");
    }

    #[test]
    fn test_total_unique_handshakes() {
        let dir = TempDir::new().unwrap();
        assert_eq!(total_unique_handshakes(dir.path()), 0);
        std::fs::write(dir.path().join("a.pcap"), b"").unwrap();
        std::fs::write(dir.path().join("b.pcap"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        assert_eq!(total_unique_handshakes(dir.path()), 2);
        assert_eq!(total_unique_handshakes(&dir.path().join("missing")), 0);
    }
}
