//! 会话启动
//!
//! 启动时确认身份：已有持久化身份就直接用，没有就申请匿名身份。
//! 拿到身份后写一次用户记录，然后在 watch 通道上发布 `SignedIn`。
//! 同一时间只有一个启动流程，重新启动会取消上一次，被取消的流程不会发布任何状态。

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{IdentityProvider, SignInOutcome};
use crate::commands::CommandService;

/// 登录状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// 启动流程还没有结果
    #[default]
    Unknown,
    SignedIn(String),
    SignedOut,
}

impl SessionState {
    /// 是否已有确定结果
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Unknown)
    }

    pub fn uid(&self) -> Option<&str> {
        match self {
            SessionState::SignedIn(uid) => Some(uid),
            _ => None,
        }
    }
}

/// 等待第一个确定状态；发布端已销毁时返回 None
pub async fn wait_for_terminal(receiver: &mut watch::Receiver<SessionState>) -> Option<SessionState> {
    receiver
        .wait_for(SessionState::is_terminal)
        .await
        .ok()
        .map(|state| state.clone())
}

struct BootstrapRun {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// 会话启动器
pub struct SessionBootstrap {
    identity: Arc<dyn IdentityProvider>,
    commands: Arc<CommandService>,
    state: Arc<watch::Sender<SessionState>>,
    running: Arc<Mutex<Option<BootstrapRun>>>,
}

impl SessionBootstrap {
    pub fn new(identity: Arc<dyn IdentityProvider>, commands: Arc<CommandService>) -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        Self {
            identity,
            commands,
            state: Arc::new(state),
            running: Arc::new(Mutex::new(None)),
        }
    }

    /// 订阅登录状态（只保留最新值）
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// 启动（或重新启动）身份确认流程
    pub fn start(&self) {
        let token = CancellationToken::new();

        let mut running = self.running.lock();
        if let Some(previous) = running.take() {
            previous.token.cancel();
            previous.handle.abort();
            debug!("previous session bootstrap cancelled");
        }

        let identity = self.identity.clone();
        let commands = self.commands.clone();
        let state = self.state.clone();
        let slot = self.running.clone();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let resolved = tokio::select! {
                _ = task_token.cancelled() => return,
                resolved = resolve_session(identity, commands) => resolved,
            };

            // 与 start() 使用同一把锁，取消和发布不会交错
            let guard = slot.lock();
            if task_token.is_cancelled() {
                debug!("session bootstrap finished after cancellation, dropping result");
                return;
            }
            info!("session state resolved: {:?}", resolved);
            state.send_replace(resolved);
            drop(guard);
        });

        *running = Some(BootstrapRun { token, handle });
    }

    /// 取消正在进行的启动流程
    pub fn cancel(&self) {
        if let Some(run) = self.running.lock().take() {
            run.token.cancel();
            run.handle.abort();
            debug!("session bootstrap cancelled");
        }
    }
}

impl Drop for SessionBootstrap {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for SessionBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBootstrap")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

async fn resolve_session(
    identity: Arc<dyn IdentityProvider>,
    commands: Arc<CommandService>,
) -> SessionState {
    let uid = match identity.current_identity() {
        Some(uid) => {
            debug!("reusing persisted identity: {}", uid);
            uid
        }
        None => match identity.sign_in_anonymously().await {
            SignInOutcome::SignedIn(uid) => {
                info!("✅ anonymous sign-in succeeded: {}", uid);
                uid
            }
            SignInOutcome::Failed(reason) => {
                warn!("anonymous sign-in failed: {}", reason);
                return SessionState::SignedOut;
            }
            SignInOutcome::Cancelled => {
                warn!("anonymous sign-in cancelled by the backend");
                return SessionState::SignedOut;
            }
        },
    };

    // 身份已经存在，用户记录写失败不影响登录结果
    if let Err(e) = commands.save_user_record().await {
        warn!("saving user record for {} failed: {}", uid, e);
    }
    SessionState::SignedIn(uid)
}
