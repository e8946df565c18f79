//! Agent 错误类型
//!
//! 各层（控制 API / Mesh / 恢复文件）各自定义错误，这里统一包装，供错误处理回调与上层使用。

use thiserror::Error;

use crate::api::ApiError;
use crate::grid::GridError;

/// 恢复文件读写错误（缺失或损坏默认被吞掉，不阻塞启动）
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("recovery io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recovery json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Control API error: {0}")]
    Api(#[from] ApiError),

    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 引擎已不认识该 BSSID：说明扫描结果过期
    pub fn is_unknown_bssid(&self) -> bool {
        self.to_string().contains("is an unknown BSSID")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_bssid_detection() {
        let err = AgentError::Api(ApiError::Status {
            status: 400,
            body: "aa:bb:cc:dd:ee:ff is an unknown BSSID or it is in the association skip list.".into(),
        });
        assert!(err.is_unknown_bssid());

        let err = AgentError::Api(ApiError::Decode("oops".into()));
        assert!(!err.is_unknown_bssid());
    }
}
