use std::fmt;

use crate::chat_key::ChatKeyError;
use crate::commands::CommandError;
use crate::entities::DecodeError;

/// SDK 顶层错误
///
/// 领域内的窄错误（写命令、会话 key、解码）各自用 thiserror 定义，
/// 在跨模块边界时统一折叠成这里的变体。
#[derive(Debug)]
pub enum AnonChatError {
    /// 写命令失败（含本地前置条件、后端取消、后端拒绝）
    Command(CommandError),
    /// 会话 key 推导失败
    ChatKey(ChatKeyError),
    /// 文档解码失败
    Decode(DecodeError),
    JsonError(String),
    Config(String),
    NotInitialized(String),
    ShuttingDown(String),
    Billing(String),
    Runtime(String),
}

impl fmt::Display for AnonChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnonChatError::Command(e) => write!(f, "Command error: {}", e),
            AnonChatError::ChatKey(e) => write!(f, "Chat key error: {}", e),
            AnonChatError::Decode(e) => write!(f, "Decode error: {}", e),
            AnonChatError::JsonError(e) => write!(f, "JSON error: {}", e),
            AnonChatError::Config(e) => write!(f, "Config error: {}", e),
            AnonChatError::NotInitialized(e) => write!(f, "Not initialized: {}", e),
            AnonChatError::ShuttingDown(e) => write!(f, "Shutting down: {}", e),
            AnonChatError::Billing(e) => write!(f, "Billing error: {}", e),
            AnonChatError::Runtime(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for AnonChatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnonChatError::Command(e) => Some(e),
            AnonChatError::ChatKey(e) => Some(e),
            AnonChatError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommandError> for AnonChatError {
    fn from(error: CommandError) -> Self {
        AnonChatError::Command(error)
    }
}

impl From<ChatKeyError> for AnonChatError {
    fn from(error: ChatKeyError) -> Self {
        AnonChatError::ChatKey(error)
    }
}

impl From<DecodeError> for AnonChatError {
    fn from(error: DecodeError) -> Self {
        AnonChatError::Decode(error)
    }
}

impl From<serde_json::Error> for AnonChatError {
    fn from(error: serde_json::Error) -> Self {
        AnonChatError::JsonError(error.to_string())
    }
}

impl AnonChatError {
    /// 给 UI 的提示文案（瞬时通知用）
    pub fn user_message(&self) -> String {
        match self {
            AnonChatError::Command(e) => e.user_message(),
            other => other.to_string(),
        }
    }

    /// 判断是否是写命令错误
    pub fn is_command_error(&self) -> bool {
        matches!(self, AnonChatError::Command(_))
    }
}

pub type Result<T> = std::result::Result<T, AnonChatError>;
