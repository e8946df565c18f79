//! 核心编排层：状态、epoch、目标选择、恢复、事件、主控 Agent 与关闭

pub mod builder;
pub mod driver;
pub mod epoch;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod policy;
pub mod recovery;
pub mod shutdown;
pub mod state;
pub mod targets;

pub use builder::{create_agent, AgentBuilder};
pub use driver::run_auto;
pub use epoch::{Epoch, EpochData};
pub use error::{AgentError, RecoveryError};
pub use events::{AgentEvent, EventBus, EventListener, HandshakeTarget};
pub use orchestrator::Agent;
pub use policy::{AdvertisedStats, DefaultPolicy, Mesh, NullMesh, Policy, RewardStats};
pub use recovery::{RecoveryState, RecoveryStore};
pub use shutdown::{RecoveryCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use state::{AgentPhase, AgentState, ViewState};
pub use targets::ApFilter;
