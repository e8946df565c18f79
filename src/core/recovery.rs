//! 崩溃恢复：重启前保存内存状态，下一次启动时加载并删除
//!
//! 单文件 JSON：`started_at`、`epoch`、`history`、`handshakes`、`last_pwnd`。
//! 任一时刻最多存在一个未被消费的恢复文件。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::RecoveryError;

/// 恢复快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    /// UNIX 秒（浮点）
    pub started_at: f64,
    pub epoch: u64,
    pub history: HashMap<String, u32>,
    pub handshakes: HashMap<String, Value>,
    pub last_pwnd: Option<String>,
}

/// 固定路径上的恢复文件
#[derive(Debug, Clone)]
pub struct RecoveryStore {
    path: PathBuf,
}

impl RecoveryStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 覆盖写入；父目录不存在时自动创建
    pub fn save(&self, state: &RecoveryState) -> Result<(), RecoveryError> {
        tracing::warn!("Writing recovery data to {}...", self.path.display());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string(state)?)?;
        Ok(())
    }

    /// 读取快照；delete 为 true 时读取成功后删除文件
    pub fn load(&self, delete: bool) -> Result<RecoveryState, RecoveryError> {
        let data = std::fs::read_to_string(&self.path)?;
        let state: RecoveryState = serde_json::from_str(&data)?;
        tracing::info!(
            "Found recovery data: epoch={} handshakes={} history={}",
            state.epoch,
            state.handshakes.len(),
            state.history.len()
        );
        if delete {
            tracing::info!("Deleting {}", self.path.display());
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::error!("Could not delete {} ({})", self.path.display(), e);
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> RecoveryState {
        let mut history = HashMap::new();
        history.insert("aa:bb:cc:dd:ee:ff".to_string(), 2);
        let mut handshakes = HashMap::new();
        handshakes.insert(
            "11:22:33:44:55:66 -> aa:bb:cc:dd:ee:ff".to_string(),
            serde_json::json!({"tag": "wifi.client.handshake", "data": {"file": "/x.pcap"}}),
        );
        RecoveryState {
            started_at: 1700000000.25,
            epoch: 42,
            history,
            handshakes,
            last_pwnd: Some("HomeNet".to_string()),
        }
    }

    #[test]
    fn test_save_then_load_deletes_file() {
        let dir = TempDir::new().unwrap();
        let store = RecoveryStore::new(dir.path().join("sub").join("recovery"));
        let state = sample();
        store.save(&state).unwrap();
        assert!(store.path().exists());

        let loaded = store.load(true).unwrap();
        assert_eq!(loaded, state);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_load_keep_file() {
        let dir = TempDir::new().unwrap();
        let store = RecoveryStore::new(dir.path().join("recovery"));
        store.save(&sample()).unwrap();
        store.load(false).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = RecoveryStore::new(dir.path().join("recovery"));
        assert!(matches!(store.load(true), Err(RecoveryError::Io(_))));

        std::fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(true), Err(RecoveryError::Json(_))));
        // 解析失败时不删除
        assert!(store.path().exists());
    }

    #[test]
    fn test_null_last_pwnd() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recovery");
        std::fs::write(
            &path,
            r#"{"started_at": 1.5, "epoch": 0, "history": {}, "handshakes": {}, "last_pwnd": null}"#,
        )
        .unwrap();
        let state = RecoveryStore::new(&path).load(true).unwrap();
        assert_eq!(state.last_pwnd, None);
        assert_eq!(state.started_at, 1.5);
    }
}
