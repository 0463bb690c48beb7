//! AnonChat SDK - 匿名聊天客户端核心
//!
//! 本 SDK 提供匿名聊天应用的无界面核心：
//! - 🔐 匿名身份：启动时复用已有身份或申请新的匿名身份
//! - 📡 实时同步：会话、用户、消息三种订阅，以可取消的异步流交付
//! - ✉️ 写命令：发消息、建会话、写用户记录、刷新在线时间
//! - 💓 在线心跳：前台定期刷新 `lastAction`
//! - 💳 订阅计费：购买结果广播，断线按有上限的指数退避重连
//! - ⚙️ 生命周期：前后台切换统一通知各模块
//!
//! 后端（文档数据库、身份服务、计费服务）都是 trait，
//! [`backend::memory`] 提供内存实现。
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use anonchat_sdk::{AnonChatConfig, AnonChatSDK, Backends};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AnonChatConfig::builder()
//!         .heartbeat_interval_secs(60)
//!         .timezone_hours(8)
//!         .build();
//!
//!     let sdk = AnonChatSDK::initialize(config, Backends::in_memory()).await?;
//!     let uid = sdk.wait_until_signed_in().await?;
//!     println!("signed in as {}", uid);
//!
//!     // 与另一个用户建立会话并发送消息
//!     let chat_id = sdk.create_chat("another-user").await?;
//!     sdk.send_message(&chat_id, "Hello!").await?;
//!
//!     // 观察消息
//!     let mut messages = sdk.messages(&chat_id);
//!     if let Some(envelope) = messages.next().await {
//!         println!("{:?}", envelope);
//!     }
//!     messages.close();
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod backend;
pub mod billing;
pub mod chat_key;
pub mod commands;
pub mod config;
pub mod entities;
pub mod envelope;
pub mod error;
pub mod lifecycle;
pub mod presence;
pub mod sdk;
pub mod session;
pub mod sync;
pub mod utils;
pub mod version;
pub mod views;

// 重新导出核心类型，方便使用
pub use backend::{
    BillingConnection, BillingResponse, CollectionPath, Document, DocumentStore, Fields, Filter,
    IdentityProvider, ListenerRegistration, OrderBy, Query, SignInOutcome, SnapshotEvent,
    WriteOutcome,
};
pub use billing::{BillingManager, PurchaseResult, ReconnectBackoff};
pub use chat_key::{ordered_participants, resolve_chat_key, ChatKeyError};
pub use commands::{CommandError, CommandService};
pub use config::{AnonChatConfig, AnonChatConfigBuilder, CollectionConfig, PresenceConfig, ReconnectConfig};
pub use entities::{ChatRecord, DecodeError, MessageRecord, PresenceStatus, Record, UserRecord};
pub use envelope::DataEnvelope;
pub use error::{AnonChatError, Result};
pub use lifecycle::{LifecycleHook, LifecycleManager};
pub use presence::PresenceHeartbeat;
pub use sdk::{AnonChatSDK, Backends};
pub use session::{SessionBootstrap, SessionState};
pub use sync::{LiveSequence, SnapshotEnvelope, SyncBridge};
pub use utils::{now_utc, TimeFormatter, TimezoneConfig};
pub use version::SDK_VERSION;
pub use views::{ChatListModel, ChatListState, ThreadModel, ThreadState, ViewPhase};
