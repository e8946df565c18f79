//! 控制 API 的 Session 快照：网卡、模块状态、AP/STA 拓扑
//!
//! 只读结构；未知字段忽略，缺失字段取默认值，避免引擎版本差异导致整个快照解析失败。

use serde::{Deserialize, Serialize};

/// 引擎在某一时刻看到的无线环境与自身模块状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub interfaces: Vec<Interface>,
    pub modules: Vec<Module>,
    pub wifi: WifiSession,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interface {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Module {
    pub name: String,
    pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiSession {
    pub aps: Vec<AccessPoint>,
}

/// 接入点；hostname 即显示名（ESSID），隐藏网络为 `<hidden>` 或空
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPoint {
    pub mac: String,
    pub hostname: String,
    pub vendor: String,
    pub channel: u32,
    pub rssi: i32,
    pub encryption: String,
    pub clients: Vec<Station>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Station {
    pub mac: String,
    pub vendor: String,
}

impl Station {
    /// 只知道 MAC 的客户端（握手事件引用了扫描结果中不存在的 STA）
    pub fn bare(mac: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            vendor: String::new(),
        }
    }
}

impl AccessPoint {
    /// 未加密网络没有握手可抓
    pub fn is_open(&self) -> bool {
        self.encryption.is_empty() || self.encryption == "OPEN"
    }

    /// 名称为空或隐藏时用 MAC 代替
    pub fn display_name(&self) -> &str {
        if self.hostname.is_empty() || self.hostname == "<hidden>" {
            &self.mac
        } else {
            &self.hostname
        }
    }
}

impl Session {
    pub fn has_interface(&self, name: &str) -> bool {
        self.interfaces.iter().any(|i| i.name == name)
    }

    /// 模块不存在时视为未运行
    pub fn is_module_running(&self, name: &str) -> bool {
        self.modules
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.running)
            .unwrap_or(false)
    }

    /// 按 AP MAC、再按 STA MAC 查找；AP 存在而 STA 不在其客户端列表时合成一个空厂商的 STA
    pub fn find_ap_sta(&self, station_mac: &str, ap_mac: &str) -> Option<(AccessPoint, Station)> {
        let ap = self.wifi.aps.iter().find(|ap| ap.mac == ap_mac)?;
        let sta = ap
            .clients
            .iter()
            .find(|sta| sta.mac == station_mac)
            .cloned()
            .unwrap_or_else(|| Station::bare(station_mac));
        Some((ap.clone(), sta))
    }
}
