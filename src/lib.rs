//! pwnagent - 无线审计设备的控制 Agent
//!
//! 模块划分：
//! - **api**: 控制 API 客户端（Session、命令、可重连事件流）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排、状态、epoch、节流、恢复、事件、关闭
//! - **grid**: Mesh 守护进程客户端与对等节点广播
//! - **observability**: tracing 初始化

pub mod api;
pub mod config;
pub mod core;
pub mod grid;
pub mod observability;
