//! 统一 SDK 接口 - AnonChatSDK 主入口
//!
//! 分层架构设计：
//! ```text
//! AnonChatSDK
//!   ├── SessionBootstrap (身份确认)
//!   ├── SyncBridge       (实时订阅 → 异步流)
//!   ├── CommandService   (写命令)
//!   ├── PresenceHeartbeat(在线心跳)
//!   ├── BillingManager   (订阅计费，可选)
//!   └── LifecycleManager (前后台切换)
//! ```
//!
//! 设计原则：
//! - 显式构造：所有服务在 `initialize` 时创建一次，通过 `Arc` 共享，没有全局单例
//! - 后端可替换：文档库、身份、计费都是 trait，内存实现用于测试和演示
//! - 读路径的错误是流里的 `Error` 值，写路径的错误是一次性的 `Result`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::backend::memory::{MemoryBillingConnection, MemoryDocumentStore, MemoryIdentityProvider};
use crate::backend::{BillingConnection, DocumentStore, IdentityProvider};
use crate::billing::{BillingManager, PurchaseResult};
use crate::commands::CommandService;
use crate::config::AnonChatConfig;
use crate::entities::{ChatRecord, MessageRecord, UserRecord};
use crate::error::{AnonChatError, Result};
use crate::lifecycle::LifecycleManager;
use crate::presence::PresenceHeartbeat;
use crate::session::{wait_for_terminal, SessionBootstrap, SessionState};
use crate::sync::{LiveSequence, SyncBridge};
use crate::utils::{now_utc, TimeFormatter};
use crate::views::{ChatListModel, ThreadModel, ThreadState};

/// SDK 依赖的外部服务
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn DocumentStore>,
    pub identity: Arc<dyn IdentityProvider>,
    /// 不接入计费时为 None
    pub billing: Option<Arc<dyn BillingConnection>>,
}

impl Backends {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            billing: None,
        }
    }

    pub fn with_billing(mut self, billing: Arc<dyn BillingConnection>) -> Self {
        self.billing = Some(billing);
        self
    }

    /// 全内存后端
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryIdentityProvider::new()),
        )
        .with_billing(Arc::new(MemoryBillingConnection::new()))
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("store", &self.store)
            .field("identity", &self.identity)
            .field("billing", &self.billing)
            .finish()
    }
}

/// 匿名聊天 SDK
pub struct AnonChatSDK {
    config: AnonChatConfig,
    identity: Arc<dyn IdentityProvider>,
    bridge: Arc<SyncBridge>,
    commands: Arc<CommandService>,
    session: SessionBootstrap,
    presence: Arc<PresenceHeartbeat>,
    billing: Option<Arc<BillingManager>>,
    lifecycle: LifecycleManager,
    formatter: TimeFormatter,
    shutting_down: AtomicBool,
}

impl AnonChatSDK {
    /// 初始化 SDK 并立即开始身份确认
    pub async fn initialize(config: AnonChatConfig, backends: Backends) -> Result<Arc<Self>> {
        info!("正在初始化 AnonChatSDK...");
        config.validate()?;

        let formatter = TimeFormatter::new(config.timezone);
        info!("显示时区偏移: {} 秒", config.timezone.offset_seconds);

        let Backends {
            store,
            identity,
            billing,
        } = backends;

        let bridge = Arc::new(SyncBridge::new(
            store.clone(),
            identity.clone(),
            config.collections.clone(),
        ));
        let commands = Arc::new(CommandService::new(
            store,
            identity.clone(),
            config.collections.clone(),
        ));
        let session = SessionBootstrap::new(identity.clone(), commands.clone());
        let presence = Arc::new(PresenceHeartbeat::new(commands.clone(), config.presence.clone()));
        let billing = billing.map(|connection| BillingManager::new(connection, config.reconnect.clone()));

        let mut lifecycle = LifecycleManager::new();
        lifecycle.register_hook(presence.clone());
        if let Some(billing) = &billing {
            lifecycle.register_hook(billing.clone());
        }

        let sdk = Arc::new(Self {
            config,
            identity,
            bridge,
            commands,
            session,
            presence,
            billing,
            lifecycle,
            formatter,
            shutting_down: AtomicBool::new(false),
        });

        sdk.session.start();
        if sdk.config.debug_mode {
            debug!("AnonChatSDK initialized: {:?}", sdk);
        }
        info!("✅ AnonChatSDK 初始化完成 (v{})", crate::version::SDK_VERSION);
        Ok(sdk)
    }

    pub fn config(&self) -> &AnonChatConfig {
        &self.config
    }

    pub fn formatter(&self) -> &TimeFormatter {
        &self.formatter
    }

    fn ensure_active(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AnonChatError::ShuttingDown("SDK is shut down".into()));
        }
        Ok(())
    }

    // ========== 会话 ==========

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// 重新确认身份（取消进行中的流程）
    pub fn restart_session(&self) -> Result<()> {
        self.ensure_active()?;
        self.session.start();
        Ok(())
    }

    /// 等待身份确认结果；登录失败时返回错误
    pub async fn wait_until_signed_in(&self) -> Result<String> {
        let mut receiver = self.session.subscribe();
        match wait_for_terminal(&mut receiver).await {
            Some(SessionState::SignedIn(uid)) => Ok(uid),
            Some(_) => Err(AnonChatError::NotInitialized("anonymous sign-in failed".into())),
            None => Err(AnonChatError::ShuttingDown("session bootstrap dropped".into())),
        }
    }

    pub fn current_uid(&self) -> Option<String> {
        self.identity.current_identity()
    }

    // ========== 实时订阅 ==========

    pub fn chats(&self) -> LiveSequence<ChatRecord> {
        self.bridge.chats()
    }

    pub fn users(&self) -> LiveSequence<UserRecord> {
        self.bridge.users()
    }

    pub fn messages(&self, chat_id: &str) -> LiveSequence<MessageRecord> {
        self.bridge.messages(chat_id)
    }

    /// 会话列表界面状态
    pub fn chat_list(&self) -> ChatListModel {
        ChatListModel::drive(self.bridge.chats(), self.bridge.users())
    }

    /// 单个会话界面状态
    pub fn thread(&self, chat_id: &str) -> Result<ThreadModel> {
        let uid = self
            .current_uid()
            .ok_or_else(|| AnonChatError::NotInitialized("no signed-in identity".into()))?;
        Ok(ThreadModel::drive(
            self.bridge.messages(chat_id),
            ThreadState::new(chat_id, uid),
        ))
    }

    // ========== 写命令 ==========

    pub fn commands(&self) -> &Arc<CommandService> {
        &self.commands
    }

    /// 发送消息；空白内容在本地拒绝
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        self.ensure_active()?;
        let text = ThreadState::validate_outgoing(text)?;
        self.commands.send_message(chat_id, text).await?;
        Ok(())
    }

    pub async fn create_chat(&self, other_user_id: &str) -> Result<String> {
        self.ensure_active()?;
        Ok(self.commands.create_chat(other_user_id).await?)
    }

    pub async fn refresh_presence(&self) -> Result<()> {
        self.ensure_active()?;
        self.commands.refresh_presence().await?;
        Ok(())
    }

    /// 用户最后活跃时间的展示文案
    pub fn format_last_seen(&self, user: &UserRecord) -> Option<String> {
        user.last_action
            .map(|last_action| self.formatter.format_last_seen(last_action, now_utc()))
    }

    // ========== 计费 ==========

    fn billing(&self) -> Result<&Arc<BillingManager>> {
        self.billing
            .as_ref()
            .ok_or_else(|| AnonChatError::Billing("billing is not configured".into()))
    }

    pub fn start_purchase(&self, sku: &str) -> Result<()> {
        self.ensure_active()?;
        self.billing()?.start_purchase(sku);
        Ok(())
    }

    pub fn purchase_results(&self) -> Result<watch::Receiver<Option<PurchaseResult>>> {
        Ok(self.billing()?.subscribe())
    }

    pub fn billing_manager(&self) -> Option<&Arc<BillingManager>> {
        self.billing.as_ref()
    }

    // ========== 生命周期 ==========

    pub fn presence(&self) -> &Arc<PresenceHeartbeat> {
        &self.presence
    }

    /// App 切换到前台
    pub async fn on_app_foreground(&self) -> Result<()> {
        self.ensure_active()?;
        self.lifecycle.notify_foreground().await
    }

    /// App 切换到后台
    pub async fn on_app_background(&self) -> Result<()> {
        self.ensure_active()?;
        self.lifecycle.notify_background().await
    }

    /// 关闭 SDK：取消身份确认、停止心跳、断开计费
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("AnonChatSDK already shut down");
            return Ok(());
        }
        info!("正在关闭 AnonChatSDK...");

        self.session.cancel();
        self.presence.stop();
        if let Some(billing) = &self.billing {
            billing.shutdown().await;
        }

        info!("AnonChatSDK 关闭完成");
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AnonChatSDK {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnonChatSDK")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("lifecycle", &self.lifecycle)
            .field("shutting_down", &self.shutting_down)
            .finish()
    }
}
