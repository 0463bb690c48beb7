//! 数据信封：跨异步边界携带「成功载荷或错误文案」

use serde::{Deserialize, Serialize};

/// 读路径上的每一次推送都是一个信封
///
/// 错误是内联值而不是流的终止，消费方需要自行分支处理。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataEnvelope<T> {
    Success(T),
    Error(String),
}

impl<T> DataEnvelope<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, DataEnvelope::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DataEnvelope::Error(_))
    }

    /// 取出成功载荷
    pub fn success(self) -> Option<T> {
        match self {
            DataEnvelope::Success(data) => Some(data),
            DataEnvelope::Error(_) => None,
        }
    }

    /// 取出错误文案
    pub fn error(&self) -> Option<&str> {
        match self {
            DataEnvelope::Success(_) => None,
            DataEnvelope::Error(message) => Some(message),
        }
    }

    pub fn as_ref(&self) -> DataEnvelope<&T> {
        match self {
            DataEnvelope::Success(data) => DataEnvelope::Success(data),
            DataEnvelope::Error(message) => DataEnvelope::Error(message.clone()),
        }
    }

    pub fn map<U, F>(self, f: F) -> DataEnvelope<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            DataEnvelope::Success(data) => DataEnvelope::Success(f(data)),
            DataEnvelope::Error(message) => DataEnvelope::Error(message),
        }
    }
}

impl<T, E: std::fmt::Display> From<std::result::Result<T, E>> for DataEnvelope<T> {
    fn from(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(data) => DataEnvelope::Success(data),
            Err(e) => DataEnvelope::Error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let ok: DataEnvelope<Vec<u32>> = DataEnvelope::Success(vec![1, 2]);
        assert!(ok.is_success());
        assert_eq!(ok.error(), None);
        assert_eq!(ok.map(|v| v.len()).success(), Some(2));

        let err: DataEnvelope<Vec<u32>> = DataEnvelope::Error("offline".into());
        assert!(err.is_error());
        assert_eq!(err.error(), Some("offline"));
        assert_eq!(err.success(), None);
    }

    #[test]
    fn test_from_result() {
        let parsed: std::result::Result<u32, std::num::ParseIntError> = "x".parse();
        let envelope: DataEnvelope<u32> = parsed.into();
        assert!(envelope.is_error());
    }
}
