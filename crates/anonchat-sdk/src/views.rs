//! 界面状态
//!
//! 把实时序列折叠成界面可以直接渲染的状态：
//! - [`ChatListState`]：会话列表 + 用户列表，两路都到齐之前是 `Loading`
//! - [`ThreadState`]：单个会话的消息，最新的在前
//!
//! 错误推送不会清空已有数据，而是变成一条瞬时提示（notice）。
//! [`ChatListModel`] / [`ThreadModel`] 在后台任务里驱动序列，状态通过 `watch` 发布，
//! 提示通过 mpsc 逐条投递。

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::commands::{CommandError, CommandResult};
use crate::entities::{ChatRecord, MessageRecord, UserRecord};
use crate::envelope::DataEnvelope;
use crate::sync::{LiveSequence, SnapshotEnvelope};

/// 加载阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewPhase {
    #[default]
    Loading,
    Ready,
}

/// 会话列表界面状态
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatListState {
    phase: ViewPhase,
    chats: Vec<ChatRecord>,
    users: Vec<UserRecord>,
    chats_seen: bool,
    users_seen: bool,
}

impl ChatListState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ViewPhase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase == ViewPhase::Loading
    }

    pub fn chats(&self) -> &[ChatRecord] {
        &self.chats
    }

    pub fn users(&self) -> &[UserRecord] {
        &self.users
    }

    /// 应用一条会话推送；错误原样返回作为提示
    pub fn apply_chats(&mut self, envelope: SnapshotEnvelope<ChatRecord>) -> Option<String> {
        self.chats_seen = true;
        let notice = match envelope {
            DataEnvelope::Success(chats) => {
                self.chats = chats;
                None
            }
            DataEnvelope::Error(message) => Some(message),
        };
        self.refresh_phase();
        notice
    }

    /// 应用一条用户推送
    pub fn apply_users(&mut self, envelope: SnapshotEnvelope<UserRecord>) -> Option<String> {
        self.users_seen = true;
        let notice = match envelope {
            DataEnvelope::Success(users) => {
                self.users = users;
                None
            }
            DataEnvelope::Error(message) => Some(message),
        };
        self.refresh_phase();
        notice
    }

    fn refresh_phase(&mut self) {
        if self.chats_seen && self.users_seen {
            self.phase = ViewPhase::Ready;
        }
    }
}

/// 单个会话界面状态
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadState {
    chat_id: String,
    current_uid: String,
    phase: ViewPhase,
    /// 最新的在前
    messages: Vec<MessageRecord>,
}

impl ThreadState {
    pub fn new(chat_id: impl Into<String>, current_uid: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            current_uid: current_uid.into(),
            phase: ViewPhase::Loading,
            messages: Vec::new(),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn phase(&self) -> ViewPhase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase == ViewPhase::Loading
    }

    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    /// 应用一条消息推送（推送按时间升序，展示按时间倒序）
    pub fn apply(&mut self, envelope: SnapshotEnvelope<MessageRecord>) -> Option<String> {
        self.phase = ViewPhase::Ready;
        match envelope {
            DataEnvelope::Success(mut messages) => {
                messages.reverse();
                self.messages = messages;
                None
            }
            DataEnvelope::Error(message) => Some(message),
        }
    }

    /// 是否是自己发出的消息
    pub fn is_outgoing(&self, message: &MessageRecord) -> bool {
        message.from == self.current_uid
    }

    /// 发送前校验：空白内容不发送，其余原样返回
    pub fn validate_outgoing(text: &str) -> CommandResult<&str> {
        if text.trim().is_empty() {
            return Err(CommandError::LocalPreconditionFailed("message is empty".into()));
        }
        Ok(text)
    }
}

/// 会话列表驱动器
///
/// 同时消费会话和用户两个序列；关闭或 drop 时结束后台任务，序列随之释放后端订阅。
#[derive(Debug)]
pub struct ChatListModel {
    state: watch::Receiver<ChatListState>,
    notices: mpsc::UnboundedReceiver<String>,
    task: JoinHandle<()>,
}

impl ChatListModel {
    pub fn drive(mut chats: LiveSequence<ChatRecord>, mut users: LiveSequence<UserRecord>) -> Self {
        let (state_tx, state) = watch::channel(ChatListState::new());
        let (notice_tx, notices) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut chats_open = true;
            let mut users_open = true;
            loop {
                tokio::select! {
                    envelope = chats.next(), if chats_open => match envelope {
                        Some(envelope) => {
                            let mut notice = None;
                            state_tx.send_modify(|state| notice = state.apply_chats(envelope));
                            if let Some(notice) = notice {
                                let _ = notice_tx.send(notice);
                            }
                        }
                        None => chats_open = false,
                    },
                    envelope = users.next(), if users_open => match envelope {
                        Some(envelope) => {
                            let mut notice = None;
                            state_tx.send_modify(|state| notice = state.apply_users(envelope));
                            if let Some(notice) = notice {
                                let _ = notice_tx.send(notice);
                            }
                        }
                        None => users_open = false,
                    },
                    else => break,
                }
            }
            debug!("chat list sequences finished");
        });

        Self {
            state,
            notices,
            task,
        }
    }

    /// 当前状态快照
    pub fn state(&self) -> ChatListState {
        self.state.borrow().clone()
    }

    /// 等待状态变化；驱动任务结束后返回 false
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }

    /// 等待满足条件的状态
    pub async fn wait_until<F>(&mut self, predicate: F) -> Option<ChatListState>
    where
        F: FnMut(&ChatListState) -> bool,
    {
        self.state.wait_for(predicate).await.ok().map(|state| state.clone())
    }

    /// 下一条瞬时提示
    pub async fn next_notice(&mut self) -> Option<String> {
        self.notices.recv().await
    }

    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for ChatListModel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 单个会话驱动器
#[derive(Debug)]
pub struct ThreadModel {
    state: watch::Receiver<ThreadState>,
    notices: mpsc::UnboundedReceiver<String>,
    task: JoinHandle<()>,
}

impl ThreadModel {
    pub fn drive(mut messages: LiveSequence<MessageRecord>, initial: ThreadState) -> Self {
        let (state_tx, state) = watch::channel(initial);
        let (notice_tx, notices) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Some(envelope) = messages.next().await {
                let mut notice = None;
                state_tx.send_modify(|state| notice = state.apply(envelope));
                if let Some(notice) = notice {
                    let _ = notice_tx.send(notice);
                }
            }
            debug!("thread sequence finished: {}", messages.label());
        });

        Self {
            state,
            notices,
            task,
        }
    }

    pub fn state(&self) -> ThreadState {
        self.state.borrow().clone()
    }

    pub async fn wait_until<F>(&mut self, predicate: F) -> Option<ThreadState>
    where
        F: FnMut(&ThreadState) -> bool,
    {
        self.state.wait_for(predicate).await.ok().map(|state| state.clone())
    }

    pub async fn next_notice(&mut self) -> Option<String> {
        self.notices.recv().await
    }

    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for ThreadModel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryDocumentStore, MemoryIdentityProvider};
    use crate::config::CollectionConfig;
    use crate::entities::Record;
    use crate::sync::SyncBridge;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn message(from: &str, minute: u32, value: &str) -> MessageRecord {
        MessageRecord::new(from, Utc.with_ymd_and_hms(2024, 1, 17, 12, minute, 0).unwrap(), value)
    }

    #[test]
    fn test_chat_list_waits_for_both_sources() {
        let mut state = ChatListState::new();
        assert!(state.apply_chats(DataEnvelope::Success(vec![])).is_none());
        assert!(state.is_loading());

        let notice = state.apply_users(DataEnvelope::Error("UNAVAILABLE".into()));
        assert_eq!(notice.as_deref(), Some("UNAVAILABLE"));
        assert_eq!(state.phase(), ViewPhase::Ready);
    }

    #[test]
    fn test_chat_list_error_keeps_previous_data() {
        let mut state = ChatListState::new();
        state.apply_chats(DataEnvelope::Success(vec![ChatRecord::new("b+a", vec!["b".into(), "a".into()])]));
        state.apply_users(DataEnvelope::Success(vec![]));

        let notice = state.apply_chats(DataEnvelope::Error("denied".into()));
        assert_eq!(notice.as_deref(), Some("denied"));
        assert_eq!(state.chats().len(), 1);
    }

    #[test]
    fn test_thread_state_newest_first() {
        let mut state = ThreadState::new("you+me", "me");
        assert!(state.is_loading());
        state.apply(DataEnvelope::Success(vec![
            message("you", 1, "hi"),
            message("me", 2, "hello"),
        ]));
        assert!(!state.is_loading());
        assert_eq!(state.messages()[0].value, "hello");
        assert!(state.is_outgoing(&state.messages()[0]));
        assert!(!state.is_outgoing(&state.messages()[1]));
    }

    #[test]
    fn test_thread_error_ends_loading_without_clearing() {
        let mut state = ThreadState::new("you+me", "me");
        state.apply(DataEnvelope::Success(vec![message("you", 1, "hi")]));
        let notice = state.apply(DataEnvelope::Error("UNAVAILABLE".into()));
        assert_eq!(notice.as_deref(), Some("UNAVAILABLE"));
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn test_validate_outgoing() {
        assert!(ThreadState::validate_outgoing("").is_err());
        assert!(ThreadState::validate_outgoing("  \n\t").is_err());
        assert_eq!(ThreadState::validate_outgoing(" hi ").unwrap(), " hi ");
    }

    #[tokio::test]
    async fn test_chat_list_model_combines_sequences() {
        let store = MemoryDocumentStore::new();
        let bridge = SyncBridge::new(
            Arc::new(store.clone()),
            Arc::new(MemoryIdentityProvider::with_identity("me")),
            CollectionConfig::default(),
        );
        let collections = CollectionConfig::default();

        let mut model = ChatListModel::drive(bridge.chats(), bridge.users());
        let ready = model.wait_until(|state| !state.is_loading()).await.unwrap();
        assert!(ready.chats().is_empty());

        store.insert_raw(
            &collections.users_path(),
            "you",
            UserRecord::new("you", Utc::now()).encode().unwrap(),
        );
        let state = model.wait_until(|state| state.users().len() == 1).await.unwrap();
        assert_eq!(state.users()[0].uid(), "you");

        store.emit_error(&collections.chats_path(), "PERMISSION_DENIED");
        assert_eq!(model.next_notice().await.as_deref(), Some("PERMISSION_DENIED"));
        assert_eq!(model.state().users().len(), 1);

        drop(model);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.release_count(), 2);
    }

    #[tokio::test]
    async fn test_thread_model_follows_messages() {
        let store = MemoryDocumentStore::new();
        let bridge = SyncBridge::new(
            Arc::new(store.clone()),
            Arc::new(MemoryIdentityProvider::with_identity("me")),
            CollectionConfig::default(),
        );
        let path = CollectionConfig::default().messages_path("you+me");

        let mut model = ThreadModel::drive(bridge.messages("you+me"), ThreadState::new("you+me", "me"));
        model.wait_until(|state| !state.is_loading()).await.unwrap();

        store.insert_raw(&path, "m1", message("you", 1, "hi").encode().unwrap());
        store.insert_raw(&path, "m2", message("me", 2, "hey").encode().unwrap());
        let state = model.wait_until(|state| state.messages().len() == 2).await.unwrap();
        assert_eq!(state.messages()[0].value, "hey");
        assert_eq!(state.chat_id(), "you+me");
    }
}
