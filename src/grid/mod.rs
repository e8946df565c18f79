//! Mesh（grid）客户端：本地对等发现守护进程的 HTTP API
//!
//! - **client**: 连通性探测、通用请求、广播数据、对等节点、遥测、收件箱
//! - **peer**: 对等节点与遥测数据结构
//! - **advertiser**: 广播自身计数并轮询对等节点，实现 `core::policy::Mesh`

pub mod advertiser;
pub mod client;
pub mod peer;

use thiserror::Error;

pub use advertiser::Advertiser;
pub use client::{Body, GridClient};
pub use peer::{Peer, SessionSummary};

/// Mesh 守护进程错误
#[derive(Error, Debug)]
pub enum GridError {
    #[error("grid transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("(status {status}) {body}")]
    Status { status: u16, body: String },

    #[error("grid json error: {0}")]
    Json(#[from] serde_json::Error),
}
