//! 状态定义：领域状态块 AgentState 与展示投影 ViewState
//!
//! AgentState 由一把互斥锁整体保护（AP 工作集、握手台账、交互历史、当前信道、epoch）；
//! 展示层只持有轻量的 ViewState，经 watch 通道推送。

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::api::AccessPoint;
use crate::core::epoch::Epoch;
use crate::core::recovery::RecoveryState;

/// 展示层看到的「投影」状态，均为已格式化的文本
#[derive(Clone, Debug, Serialize)]
pub struct ViewState {
    pub phase: AgentPhase,
    pub uptime: String,
    pub channel: String,
    pub aps: String,
    pub sta: String,
    pub shakes: String,
    /// 最近的对等节点摘要
    pub peers: String,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            phase: AgentPhase::Starting,
            uptime: "00:00:00".to_string(),
            channel: "00".to_string(),
            aps: "0".to_string(),
            sta: "0".to_string(),
            shakes: "0 (0)".to_string(),
            peers: "-".to_string(),
        }
    }
}

/// Agent 阶段（投影用）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum AgentPhase {
    Starting,
    Ready,
    Rebooting,
}

/// 领域状态块
#[derive(Debug)]
pub struct AgentState {
    pub started_at: f64,
    pub access_points: Vec<AccessPoint>,
    /// "<station> -> <ap>" → 原始握手事件
    pub handshakes: HashMap<String, Value>,
    /// 目标 MAC → 交互次数
    pub history: HashMap<String, u32>,
    pub last_pwnd: Option<String>,
    pub current_channel: u32,
    pub tot_aps: usize,
    pub aps_on_channel: usize,
    pub epoch: Epoch,
}

impl AgentState {
    pub fn new(started_at: f64) -> Self {
        Self {
            started_at,
            access_points: Vec::new(),
            handshakes: HashMap::new(),
            history: HashMap::new(),
            last_pwnd: None,
            current_channel: 0,
            tot_aps: 0,
            aps_on_channel: 0,
            epoch: Epoch::new(),
        }
    }

    pub fn handshake_key(station_mac: &str, ap_mac: &str) -> String {
        format!("{station_mac} -> {ap_mac}")
    }

    /// 首次出现返回 true；重复的 (STA, AP) 对不做任何修改
    pub fn record_handshake(&mut self, key: &str, event: Value) -> bool {
        if self.handshakes.contains_key(key) {
            return false;
        }
        self.handshakes.insert(key.to_string(), event);
        true
    }

    /// 目标 MAC 是否出现在任一握手键中（不区分大小写）
    pub fn has_handshake(&self, mac: &str) -> bool {
        let mac = mac.to_lowercase();
        self.handshakes
            .keys()
            .any(|key| key.to_lowercase().contains(&mac))
    }

    /// 交互节流：已抓到握手的目标永远跳过；首次交互总是允许；之后计数严格小于上限才允许
    pub fn should_interact(&mut self, who: &str, max_interactions: u32) -> bool {
        if self.has_handshake(who) {
            return false;
        }
        match self.history.get_mut(who) {
            None => {
                self.history.insert(who.to_string(), 1);
                true
            }
            Some(count) => {
                *count += 1;
                *count < max_interactions
            }
        }
    }

    /// 刷新 AP/STA 计数；锁定信道时返回 "本信道 (总数)"
    pub fn update_counters(&mut self) -> (String, String) {
        self.tot_aps = self.access_points.len();
        let tot_stas: usize = self.access_points.iter().map(|ap| ap.clients.len()).sum();
        if self.current_channel == 0 {
            return (self.tot_aps.to_string(), tot_stas.to_string());
        }
        let on_channel: Vec<&AccessPoint> = self
            .access_points
            .iter()
            .filter(|ap| ap.channel == self.current_channel)
            .collect();
        self.aps_on_channel = on_channel.len();
        let stas_on_channel: usize = on_channel.iter().map(|ap| ap.clients.len()).sum();
        (
            format!("{} ({})", self.aps_on_channel, self.tot_aps),
            format!("{} ({})", stas_on_channel, tot_stas),
        )
    }

    /// 握手计数文本："本次 (目录中总数) [最近目标]"
    pub fn shakes_text(&self, total_unique: usize) -> String {
        let mut txt = format!("{} ({})", self.handshakes.len(), total_unique);
        if let Some(last) = &self.last_pwnd {
            let short: String = last.chars().take(20).collect();
            txt.push_str(&format!(" [{short}]"));
        }
        txt
    }

    pub fn to_recovery(&self) -> RecoveryState {
        RecoveryState {
            started_at: self.started_at,
            epoch: self.epoch.epoch,
            history: self.history.clone(),
            handshakes: self.handshakes.clone(),
            last_pwnd: self.last_pwnd.clone(),
        }
    }

    pub fn restore(&mut self, data: RecoveryState) {
        self.started_at = data.started_at;
        self.epoch.epoch = data.epoch;
        self.history = data.history;
        self.handshakes = data.handshakes;
        self.last_pwnd = data.last_pwnd;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Station;

    #[test]
    fn test_should_interact_first_time_and_max() {
        let mut s = AgentState::new(0.0);
        assert!(s.should_interact("aa", 3));
        assert_eq!(s.history["aa"], 1);
        assert!(s.should_interact("aa", 3)); // 2 < 3
        assert!(!s.should_interact("aa", 3)); // 3
        assert!(!s.should_interact("aa", 3)); // 4
        assert_eq!(s.history["aa"], 4);
    }

    #[test]
    fn test_should_interact_first_time_even_with_max_one() {
        let mut s = AgentState::new(0.0);
        assert!(s.should_interact("aa", 1));
        assert!(!s.should_interact("aa", 1));
    }

    #[test]
    fn test_captured_target_never_interacts() {
        let mut s = AgentState::new(0.0);
        let key = AgentState::handshake_key("11:22:33:44:55:66", "AA:BB:CC:DD:EE:FF");
        assert!(s.record_handshake(&key, serde_json::json!({})));
        assert!(!s.should_interact("aa:bb:cc:dd:ee:ff", 10));
        assert!(!s.should_interact("11:22:33:44:55:66", 10));
        assert!(!s.history.contains_key("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_record_handshake_dedup() {
        let mut s = AgentState::new(0.0);
        assert!(s.record_handshake("a -> b", serde_json::json!({"n": 1})));
        assert!(!s.record_handshake("a -> b", serde_json::json!({"n": 2})));
        assert_eq!(s.handshakes.len(), 1);
        assert_eq!(s.handshakes["a -> b"]["n"], 1);
    }

    #[test]
    fn test_counters_global_and_per_channel() {
        let mut s = AgentState::new(0.0);
        s.access_points = vec![
            AccessPoint {
                channel: 1,
                clients: vec![Station::bare("x"), Station::bare("y")],
                ..Default::default()
            },
            AccessPoint {
                channel: 6,
                clients: vec![Station::bare("z")],
                ..Default::default()
            },
        ];
        assert_eq!(s.update_counters(), ("2".to_string(), "3".to_string()));
        s.current_channel = 1;
        assert_eq!(s.update_counters(), ("1 (2)".to_string(), "2 (3)".to_string()));
        assert_eq!(s.aps_on_channel, 1);
    }

    #[test]
    fn test_shakes_text() {
        let mut s = AgentState::new(0.0);
        s.record_handshake("a -> b", serde_json::json!({}));
        assert_eq!(s.shakes_text(7), "1 (7)");
        assert_eq!(s.shakes_text(12), "1 (12)");
        s.last_pwnd = Some("AVeryLongNetworkNameIndeed".into());
        assert_eq!(s.shakes_text(7), "1 (7) [AVeryLongNetworkName]");
    }

    #[test]
    fn test_default_view_shakes() {
        assert_eq!(ViewState::default().shakes, "0 (0)");
    }

    #[test]
    fn test_recovery_roundtrip_through_state() {
        let mut s = AgentState::new(10.5);
        s.epoch.epoch = 9;
        s.history.insert("aa".into(), 2);
        s.record_handshake("a -> b", serde_json::json!({}));
        s.last_pwnd = Some("b".into());

        let mut fresh = AgentState::new(99.0);
        fresh.restore(s.to_recovery());
        assert_eq!(fresh.started_at, 10.5);
        assert_eq!(fresh.epoch.epoch, 9);
        assert_eq!(fresh.history, s.history);
        assert_eq!(fresh.handshakes, s.handshakes);
        assert_eq!(fresh.last_pwnd, s.last_pwnd);
    }
}
