//! 实时同步模块
//!
//! - `live_sequence`：回调 → 异步流的桥接，负责释放后端订阅
//! - `bridge`：会话、用户、消息三种订阅的查询和映射

pub mod bridge;
pub mod live_sequence;

pub use bridge::{SyncBridge, NO_IDENTITY_MESSAGE};
pub use live_sequence::{LiveSequence, SnapshotEnvelope};
