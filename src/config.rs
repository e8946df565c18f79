//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PWN__*` 覆盖（双下划线表示嵌套，如 `PWN__MAIN__IFACE=wlan0mon`）。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub main: MainSection,
    #[serde(default)]
    pub personality: PersonalitySection,
    #[serde(default)]
    pub bettercap: BettercapSection,
    #[serde(default)]
    pub grid: GridSection,
    #[serde(default)]
    pub recovery: RecoverySection,
}

/// [main] 段：设备名、监听网卡、白名单与过滤
#[derive(Debug, Clone, Deserialize)]
pub struct MainSection {
    #[serde(default = "default_name")]
    pub name: String,
    /// 监听模式网卡名
    #[serde(default = "default_iface")]
    pub iface: String,
    /// 网卡不存在时执行的启动命令（为空则只等待）
    #[serde(default)]
    pub mon_start_cmd: Option<String>,
    /// 为 true 时 wifi 模块已在运行则不重启
    #[serde(default)]
    pub no_restart: bool,
    /// 白名单：SSID、完整 MAC 或 MAC 前缀（前 8 个字符）
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// 名称 / MAC 正则过滤，未设置时不过滤
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_name() -> String {
    "pwnagent".to_string()
}

fn default_iface() -> String {
    "wlan0mon".to_string()
}

impl Default for MainSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            iface: default_iface(),
            mon_start_cmd: None,
            no_restart: false,
            whitelist: Vec::new(),
            filter: None,
        }
    }
}

/// [personality] 段：交互开关、节流上限、等待时长、信道限制
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalitySection {
    #[serde(default = "default_true")]
    pub associate: bool,
    #[serde(default = "default_true")]
    pub deauth: bool,
    #[serde(default = "default_ap_ttl")]
    pub ap_ttl: u64,
    #[serde(default = "default_sta_ttl")]
    pub sta_ttl: u64,
    #[serde(default = "default_min_rssi")]
    pub min_rssi: i32,
    /// 同一目标的最大交互次数
    #[serde(default = "default_max_interactions")]
    pub max_interactions: u32,
    /// 上一轮有 deauth 时，跳信道前的等待（秒）
    #[serde(default = "default_hop_recon_time")]
    pub hop_recon_time: u64,
    /// 上一轮只有 assoc 时，跳信道前的等待（秒）
    #[serde(default = "default_min_recon_time")]
    pub min_recon_time: u64,
    #[serde(default = "default_recon_time")]
    pub recon_time: u64,
    #[serde(default = "default_max_inactive_scale")]
    pub max_inactive_scale: u64,
    #[serde(default = "default_recon_inactive_multiplier")]
    pub recon_inactive_multiplier: u64,
    /// 允许的信道；为空表示全部
    #[serde(default)]
    pub channels: Vec<u32>,
    /// 命令连续报 unknown BSSID 超过该次数即视为侦察数据过期
    #[serde(default = "default_max_misses_for_recon")]
    pub max_misses_for_recon: u64,
    /// assoc 之后的停顿（秒）
    #[serde(default = "default_throttle_a")]
    pub throttle_a: f64,
    /// deauth 之后的停顿（秒）
    #[serde(default = "default_throttle_d")]
    pub throttle_d: f64,
}

fn default_true() -> bool {
    true
}

fn default_ap_ttl() -> u64 {
    120
}

fn default_sta_ttl() -> u64 {
    300
}

fn default_min_rssi() -> i32 {
    -200
}

fn default_max_interactions() -> u32 {
    3
}

fn default_hop_recon_time() -> u64 {
    10
}

fn default_min_recon_time() -> u64 {
    5
}

fn default_recon_time() -> u64 {
    30
}

fn default_max_inactive_scale() -> u64 {
    2
}

fn default_recon_inactive_multiplier() -> u64 {
    2
}

fn default_max_misses_for_recon() -> u64 {
    5
}

fn default_throttle_a() -> f64 {
    0.4
}

fn default_throttle_d() -> f64 {
    0.9
}

impl Default for PersonalitySection {
    fn default() -> Self {
        Self {
            associate: true,
            deauth: true,
            ap_ttl: default_ap_ttl(),
            sta_ttl: default_sta_ttl(),
            min_rssi: default_min_rssi(),
            max_interactions: default_max_interactions(),
            hop_recon_time: default_hop_recon_time(),
            min_recon_time: default_min_recon_time(),
            recon_time: default_recon_time(),
            max_inactive_scale: default_max_inactive_scale(),
            recon_inactive_multiplier: default_recon_inactive_multiplier(),
            channels: Vec::new(),
            max_misses_for_recon: default_max_misses_for_recon(),
            throttle_a: default_throttle_a(),
            throttle_d: default_throttle_d(),
        }
    }
}

/// [bettercap] 段：控制 API 地址、认证、抓包目录、事件流参数
#[derive(Debug, Clone, Deserialize)]
pub struct BettercapSection {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    /// 握手抓包文件目录
    #[serde(default = "default_handshakes")]
    pub handshakes: PathBuf,
    /// 启动时静音的事件 tag
    #[serde(default = "default_silence")]
    pub silence: Vec<String>,
    /// 单次 HTTP 请求超时（秒）
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    /// 事件流断线后重连前的等待（毫秒），0 表示立即重连
    #[serde(default)]
    pub retry_delay_ms: u64,
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_username() -> String {
    "user".to_string()
}

fn default_password() -> String {
    "pass".to_string()
}

fn default_handshakes() -> PathBuf {
    PathBuf::from("/root/handshakes")
}

fn default_silence() -> Vec<String> {
    vec![
        "ble.device.new".into(),
        "ble.device.lost".into(),
        "wifi.ap.new".into(),
        "wifi.ap.lost".into(),
        "wifi.client.probe".into(),
        "wifi.client.new".into(),
        "wifi.client.lost".into(),
        "mod.started".into(),
        "mod.stopped".into(),
        "sys.log".into(),
    ]
}

fn default_api_timeout() -> u64 {
    30
}

fn default_ping_interval() -> u64 {
    60
}

fn default_ping_timeout() -> u64 {
    90
}

impl Default for BettercapSection {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            scheme: default_scheme(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
            handshakes: default_handshakes(),
            silence: default_silence(),
            timeout_secs: default_api_timeout(),
            ping_interval_secs: default_ping_interval(),
            ping_timeout_secs: default_ping_timeout(),
            retry_delay_ms: 0,
        }
    }
}

/// [grid] 段：本地 Mesh 守护进程地址、连通性探测、上报周期
#[derive(Debug, Clone, Deserialize)]
pub struct GridSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_grid_address")]
    pub api_address: String,
    /// 外网连通性探测主机
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// 遥测上报周期（秒），0 表示不上报
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_peers_poll")]
    pub peers_poll_secs: u64,
    /// 本地模型状态文件（上报时尽力读取）
    #[serde(default = "default_brain_path")]
    pub brain_path: PathBuf,
}

fn default_grid_address() -> String {
    "http://127.0.0.1:8666/api/v1".to_string()
}

fn default_probe_host() -> String {
    "api.pwnagotchi.ai".to_string()
}

fn default_probe_port() -> u16 {
    443
}

fn default_probe_timeout() -> u64 {
    30
}

fn default_report_interval() -> u64 {
    300
}

fn default_peers_poll() -> u64 {
    3
}

fn default_brain_path() -> PathBuf {
    PathBuf::from("/root/brain.json")
}

impl Default for GridSection {
    fn default() -> Self {
        Self {
            enabled: true,
            api_address: default_grid_address(),
            probe_host: default_probe_host(),
            probe_port: default_probe_port(),
            probe_timeout_secs: default_probe_timeout(),
            report_interval_secs: default_report_interval(),
            peers_poll_secs: default_peers_poll(),
            brain_path: default_brain_path(),
        }
    }
}

/// [recovery] 段：崩溃恢复文件路径
#[derive(Debug, Clone, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_recovery_path")]
    pub path: PathBuf,
}

fn default_recovery_path() -> PathBuf {
    PathBuf::from("/root/.pwnagotchi-recovery")
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            path: default_recovery_path(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 PWN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PWN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PWN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.bettercap.port, 8081);
        assert_eq!(cfg.personality.max_interactions, 3);
        assert!(cfg.personality.hop_recon_time > cfg.personality.min_recon_time);
        assert!(cfg.personality.channels.is_empty());
        assert_eq!(cfg.grid.api_address, "http://127.0.0.1:8666/api/v1");
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[main]
iface = "mon0"
whitelist = ["HomeNet", "aa:bb:cc"]

[personality]
channels = [1, 6, 11]
max_interactions = 5
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.main.iface, "mon0");
        assert_eq!(cfg.main.whitelist.len(), 2);
        assert_eq!(cfg.personality.channels, vec![1, 6, 11]);
        assert_eq!(cfg.personality.max_interactions, 5);
        // 未给出的键保持默认
        assert!(cfg.personality.deauth);
        assert_eq!(cfg.bettercap.hostname, "localhost");
    }
}
