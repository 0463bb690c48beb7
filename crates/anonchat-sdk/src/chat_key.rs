//! 两人会话的文档 key 推导
//!
//! 双方无论谁发起都要落到同一个会话文档上，所以 key 只由参与者集合决定，与顺序无关。
//!
//! 规则：从左到右找到第一个不同字符的位置，按该位置的字符降序排列两个 id，用 `+` 连接。
//! 一个 id 是另一个的前缀时不存在这样的位置，此时按完整字符串降序排列。

use std::cmp::Ordering;

/// key 中两个参与者之间的分隔符
pub const CHAT_KEY_SEPARATOR: char = '+';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatKeyError {
    #[error("participant id must not be empty")]
    EmptyParticipant,
    #[error("cannot open a chat with yourself ({0})")]
    SameParticipant(String),
}

/// 排好序的两个参与者（会话文档 `employee` 字段的顺序）
pub fn ordered_participants(a: &str, b: &str) -> Result<[String; 2], ChatKeyError> {
    if a.is_empty() || b.is_empty() {
        return Err(ChatKeyError::EmptyParticipant);
    }
    if a == b {
        return Err(ChatKeyError::SameParticipant(a.to_string()));
    }

    let first_difference = a
        .chars()
        .zip(b.chars())
        .find(|(x, y)| x != y);

    let ordering = match first_difference {
        Some((x, y)) => x.cmp(&y),
        None => a.cmp(b),
    };

    match ordering {
        Ordering::Less => Ok([b.to_string(), a.to_string()]),
        _ => Ok([a.to_string(), b.to_string()]),
    }
}

/// 推导会话 key
pub fn resolve_chat_key(a: &str, b: &str) -> Result<String, ChatKeyError> {
    let [first, second] = ordered_participants(a, b)?;
    Ok(format!("{}{}{}", first, CHAT_KEY_SEPARATOR, second))
}
