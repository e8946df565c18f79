//! 对等节点与遥测会话摘要

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 守护进程返回的对等节点记录；advertisement 为对方广播的任意 JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Peer {
    pub fingerprint: String,
    pub met_at: String,
    pub detected_at: String,
    pub seen_at: String,
    pub prev_seen_at: String,
    pub encounters: u64,
    pub channel: u32,
    pub rssi: i32,
    pub session_id: String,
    pub advertisement: Value,
}

impl Peer {
    /// 唯一标识：指纹，缺失时取广播中的 identity
    pub fn identity(&self) -> &str {
        if !self.fingerprint.is_empty() {
            return &self.fingerprint;
        }
        self.advertisement
            .get("identity")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.advertisement
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("???")
    }

    pub fn pwnd_tot(&self) -> u64 {
        self.advertisement
            .get("pwnd_tot")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

/// 上报给 grid 的会话摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub duration: String,
    pub epochs: u64,
    pub train_epochs: u64,
    pub avg_reward: f64,
    pub min_reward: f64,
    pub max_reward: f64,
    pub deauthed: u64,
    pub associated: u64,
    pub handshakes: u64,
    pub peers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_accessors() {
        let p: Peer = serde_json::from_value(serde_json::json!({
            "fingerprint": "abc",
            "encounters": 3,
            "rssi": -50,
            "advertisement": {"name": "buddy", "pwnd_tot": 12, "identity": "xyz"}
        }))
        .unwrap();
        assert_eq!(p.identity(), "abc");
        assert_eq!(p.name(), "buddy");
        assert_eq!(p.pwnd_tot(), 12);

        let anon = Peer::default();
        assert_eq!(anon.name(), "???");
        assert_eq!(anon.identity(), "");
    }
}
