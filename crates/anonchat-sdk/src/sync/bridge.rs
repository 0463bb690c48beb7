//! 同步桥：三种订阅的查询、过滤和映射

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{DocumentStore, Filter, IdentityProvider, OrderBy, Query, SnapshotCallback};
use crate::config::CollectionConfig;
use crate::entities::{
    ChatRecord, MessageRecord, Record, UserRecord, FIELD_EMPLOYEE, FIELD_LAST_ACTION, FIELD_TIME,
};

use super::live_sequence::{envelopes_for, LiveSequence};

/// 订阅前需要当前身份，但身份还没解析出来
pub const NO_IDENTITY_MESSAGE: &str = "no signed-in identity";

/// 实时同步桥
///
/// 三种订阅：
/// - 会话列表：`employee` 包含当前身份，不排序（由消费方排序）
/// - 用户列表：按 `lastAction` 升序，每次推送都剔除当前身份
/// - 消息列表：会话下的消息子集合，按 `time` 升序
pub struct SyncBridge {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    collections: CollectionConfig,
}

impl SyncBridge {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        collections: CollectionConfig,
    ) -> Self {
        Self {
            store,
            identity,
            collections,
        }
    }

    /// 当前身份参与的会话
    pub fn chats(&self) -> LiveSequence<ChatRecord> {
        let Some(uid) = self.identity.current_identity() else {
            warn!("chats subscription requested without identity");
            return LiveSequence::failed("chats", NO_IDENTITY_MESSAGE);
        };

        let query = Query::collection(self.collections.chats_path())
            .with_filter(Filter::array_contains(FIELD_EMPLOYEE, uid));
        self.open("chats".to_string(), query, |records| records)
    }

    /// 其他用户（不含自己）
    pub fn users(&self) -> LiveSequence<UserRecord> {
        let Some(uid) = self.identity.current_identity() else {
            warn!("users subscription requested without identity");
            return LiveSequence::failed("users", NO_IDENTITY_MESSAGE);
        };

        let query = Query::collection(self.collections.users_path())
            .with_order_by(OrderBy::ascending(FIELD_LAST_ACTION));
        self.open("users".to_string(), query, move |mut records: Vec<UserRecord>| {
            records.retain(|user| user.uid() != uid);
            records
        })
    }

    /// 某个会话的消息
    pub fn messages(&self, chat_id: &str) -> LiveSequence<MessageRecord> {
        let label = format!("messages:{}", chat_id);
        if chat_id.is_empty() {
            return LiveSequence::failed(label, "chat id must not be empty");
        }

        let query = Query::collection(self.collections.messages_path(chat_id))
            .with_order_by(OrderBy::ascending(FIELD_TIME));
        self.open(label, query, |records| records)
    }

    fn open<T, F>(&self, label: String, query: Query, post: F) -> LiveSequence<T>
    where
        T: Record + Send + 'static,
        F: Fn(Vec<T>) -> Vec<T> + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let callback_label = label.clone();
        let callback: SnapshotCallback = Arc::new(move |event| {
            for envelope in envelopes_for::<T, _>(event, &post) {
                if sender.send(envelope).is_err() {
                    // 消费方已关闭，等待后端回收订阅
                    debug!("dropping snapshot for closed sequence: {}", callback_label);
                    break;
                }
            }
        });

        debug!("opening subscription {} on {}", label, query.collection);
        let registration = self.store.subscribe(query, callback);
        LiveSequence::new(label, receiver, registration)
    }
}

impl std::fmt::Debug for SyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncBridge")
            .field("collections", &self.collections)
            .finish()
    }
}
