//! 写命令
//!
//! 每个命令都是一次性的异步动作，结果只有两种：`Ok(())` 或 [`CommandError`]。
//! 命令不自动重试，调用方也不能中途取消；只能观察到后端自己的取消结果。

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{DocumentStore, Fields, IdentityProvider, WriteOutcome};
use crate::chat_key::{ordered_participants, resolve_chat_key};
use crate::config::CollectionConfig;
use crate::entities::{ChatRecord, MessageRecord, Record, UserRecord, FIELD_LAST_ACTION};
use crate::utils::now_utc;

/// 后端取消写入时给用户看的文案
pub const GENERIC_FAILURE_MESSAGE: &str = "something went wrong";

/// 写命令失败原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// 本地前置条件不满足（例如还没有身份），没有发起任何后端请求
    #[error("precondition failed: {0}")]
    LocalPreconditionFailed(String),
    /// 后端取消了写入
    #[error("operation was cancelled by the backend")]
    BackendCancelled,
    /// 后端拒绝，保留后端原始信息
    #[error("backend rejected the operation: {0}")]
    BackendRejected(String),
}

impl CommandError {
    /// 瞬时提示文案
    pub fn user_message(&self) -> String {
        match self {
            CommandError::LocalPreconditionFailed(reason) => reason.clone(),
            CommandError::BackendCancelled => GENERIC_FAILURE_MESSAGE.to_string(),
            CommandError::BackendRejected(reason) => reason.clone(),
        }
    }
}

pub type CommandResult<T = ()> = std::result::Result<T, CommandError>;

impl<T> WriteOutcome<T> {
    /// 三种后端结果映射到命令结果
    pub fn into_command_result(self) -> CommandResult<T> {
        match self {
            WriteOutcome::Ok(value) => Ok(value),
            WriteOutcome::Cancelled => Err(CommandError::BackendCancelled),
            WriteOutcome::Failed(reason) => Err(CommandError::BackendRejected(reason)),
        }
    }
}

/// 写命令服务
pub struct CommandService {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    collections: CollectionConfig,
}

impl CommandService {
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

    fn require_identity(&self) -> CommandResult<String> {
        self.identity
            .current_identity()
            .ok_or_else(|| CommandError::LocalPreconditionFailed("no signed-in identity".into()))
    }

    fn encode<R: Record>(record: &R) -> CommandResult<Fields> {
        record
            .encode()
            .map_err(|e| CommandError::LocalPreconditionFailed(e.to_string()))
    }

    /// 发送消息
    pub async fn send_message(&self, chat_id: &str, text: &str) -> CommandResult {
        let uid = self.require_identity()?;
        if chat_id.is_empty() {
            return Err(CommandError::LocalPreconditionFailed("chat id must not be empty".into()));
        }

        let message = MessageRecord::new(uid, now_utc(), text);
        let fields = Self::encode(&message)?;
        let collection = self.collections.messages_path(chat_id);

        let result = self.store.add(&collection, fields).await.into_command_result();
        match &result {
            Ok(message_id) => debug!("message {} sent to chat {}", message_id, chat_id),
            Err(e) => warn!("send message to chat {} failed: {}", chat_id, e),
        }
        result.map(|_| ())
    }

    /// 与另一个用户创建会话，返回会话 id
    pub async fn create_chat(&self, other_user_id: &str) -> CommandResult<String> {
        let uid = self.require_identity()?;
        let chat_id = resolve_chat_key(&uid, other_user_id)
            .map_err(|e| CommandError::LocalPreconditionFailed(e.to_string()))?;
        let employee = ordered_participants(&uid, other_user_id)
            .map_err(|e| CommandError::LocalPreconditionFailed(e.to_string()))?;

        let chat = ChatRecord::new(chat_id.clone(), employee.to_vec());
        let fields = Self::encode(&chat)?;

        self.store
            .set(&self.collections.chats_path(), &chat_id, fields)
            .await
            .into_command_result()
            .map_err(|e| {
                warn!("create chat {} failed: {}", chat_id, e);
                e
            })?;

        info!("✅ chat created: {}", chat_id);
        Ok(chat_id)
    }

    /// 写入（覆盖）当前用户记录；没有身份时什么都不做
    pub async fn save_user_record(&self) -> CommandResult {
        let Some(uid) = self.identity.current_identity() else {
            debug!("save_user_record skipped: no identity yet");
            return Ok(());
        };

        let fields = Self::encode(&UserRecord::new(uid.clone(), now_utc()))?;
        self.store
            .set(&self.collections.users_path(), &uid, fields)
            .await
            .into_command_result()?;
        debug!("user record saved: {}", uid);
        Ok(())
    }

    /// 只更新当前用户的 `lastAction`；没有身份时什么都不做
    pub async fn refresh_presence(&self) -> CommandResult {
        let Some(uid) = self.identity.current_identity() else {
            debug!("refresh_presence skipped: no identity yet");
            return Ok(());
        };

        let mut fields = Fields::new();
        fields.insert(
            FIELD_LAST_ACTION.to_string(),
            Value::from(now_utc().timestamp_millis()),
        );
        self.store
            .update(&self.collections.users_path(), &uid, fields)
            .await
            .into_command_result()?;
        debug!("presence refreshed: {}", uid);
        Ok(())
    }
}

impl std::fmt::Debug for CommandService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandService")
            .field("collections", &self.collections)
            .finish()
    }
}
