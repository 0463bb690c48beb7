//! 领域实体
//!
//! 三类文档：会话 [`ChatRecord`]、消息 [`MessageRecord`]、用户 [`UserRecord`]。
//! 所有时间字段在后端以 UTC 毫秒时间戳存储；未知的多余字段在解码时忽略。

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{Document, Fields};

/// 文档解码/编码失败
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("document {doc_id} is malformed: {reason}")]
    Malformed { doc_id: String, reason: String },
    #[error("record could not be encoded: {0}")]
    Encode(String),
}

/// 会话字段名
pub const FIELD_EMPLOYEE: &str = "employee";
/// 消息时间字段名
pub const FIELD_TIME: &str = "time";
/// 用户最后活跃时间字段名
pub const FIELD_LAST_ACTION: &str = "lastAction";

/// 可以从后端文档解码的记录
pub trait Record: DeserializeOwned + Serialize + Sized {
    /// 解码后回填文档 id（只有 id 来自文档 key 的记录需要覆盖）
    fn assign_id(&mut self, _doc_id: &str) {}

    fn decode(document: &Document) -> Result<Self, DecodeError> {
        let mut record: Self = serde_json::from_value(Value::Object(document.fields.clone()))
            .map_err(|e| DecodeError::Malformed {
                doc_id: document.id.clone(),
                reason: e.to_string(),
            })?;
        record.assign_id(&document.id);
        Ok(record)
    }

    fn encode(&self) -> Result<Fields, DecodeError> {
        match serde_json::to_value(self).map_err(|e| DecodeError::Encode(e.to_string()))? {
            Value::Object(fields) => Ok(fields),
            other => Err(DecodeError::Encode(format!("expected an object, got {}", other))),
        }
    }
}

/// 批量解码，任意一个失败则整体失败
pub fn decode_all<T: Record>(documents: &[Document]) -> Result<Vec<T>, DecodeError> {
    documents.iter().map(T::decode).collect()
}

/// 两人会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChatRecord {
    /// 文档 id，由参与者推导，不写入字段
    #[serde(skip)]
    pub id: String,
    /// 两个参与者，按会话 key 的顺序存储
    #[serde(default)]
    pub employee: Vec<String>,
    /// 最近消息，仅内存中使用，不持久化
    #[serde(skip)]
    pub last_message: Vec<MessageRecord>,
}

impl ChatRecord {
    pub fn new(id: impl Into<String>, employee: Vec<String>) -> Self {
        Self {
            id: id.into(),
            employee,
            last_message: Vec::new(),
        }
    }

    /// 对方的身份；无法确定时返回空字符串
    pub fn opponent(&self, current_uid: &str) -> &str {
        self.employee
            .iter()
            .find(|uid| uid.as_str() != current_uid)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn has_participant(&self, uid: &str) -> bool {
        self.employee.iter().any(|member| member == uid)
    }
}

impl Record for ChatRecord {
    fn assign_id(&mut self, doc_id: &str) {
        self.id = doc_id.to_string();
    }
}

/// 单条消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// 发送者身份
    #[serde(default)]
    pub from: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub value: String,
}

impl MessageRecord {
    pub fn new(from: impl Into<String>, time: DateTime<Utc>, value: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            time,
            value: value.into(),
        }
    }
}

impl Record for MessageRecord {}

/// 用户在线状态分级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceStatus {
    /// 3 分钟内活跃
    Online,
    /// 1 小时内活跃
    Recently,
    /// 7 天内活跃
    LastWeek,
    LongAgo,
    /// 从未上报
    Unknown,
}

impl PresenceStatus {
    pub fn from_elapsed_seconds(elapsed: i64) -> Self {
        match elapsed {
            e if e <= 3 * 60 => PresenceStatus::Online,
            e if e <= 3600 => PresenceStatus::Recently,
            e if e <= 7 * 86400 => PresenceStatus::LastWeek,
            _ => PresenceStatus::LongAgo,
        }
    }
}

/// 用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserRecord {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(
        rename = "lastAction",
        default,
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub last_action: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(uid: impl Into<String>, last_action: DateTime<Utc>) -> Self {
        Self {
            uid: Some(uid.into()),
            last_action: Some(last_action),
        }
    }

    pub fn uid(&self) -> &str {
        self.uid.as_deref().unwrap_or("")
    }

    /// 以 `now` 为基准计算在线状态
    pub fn presence(&self, now: DateTime<Utc>) -> PresenceStatus {
        match self.last_action {
            Some(last_action) => PresenceStatus::from_elapsed_seconds((now - last_action).num_seconds()),
            None => PresenceStatus::Unknown,
        }
    }
}

impl Record for UserRecord {}
