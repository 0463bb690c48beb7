//! SDK 配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::CollectionPath;
use crate::error::{AnonChatError, Result};
use crate::utils::TimezoneConfig;

/// 后端集合命名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// 用户集合
    pub users: String,
    /// 会话集合
    pub chats: String,
    /// 会话文档下的消息子集合
    pub messages: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            users: "user".to_string(),
            chats: "chat".to_string(),
            messages: "communication".to_string(),
        }
    }
}

impl CollectionConfig {
    pub fn users_path(&self) -> CollectionPath {
        CollectionPath::root(&self.users)
    }

    pub fn chats_path(&self) -> CollectionPath {
        CollectionPath::root(&self.chats)
    }

    pub fn messages_path(&self, chat_id: &str) -> CollectionPath {
        self.chats_path().child(chat_id, &self.messages)
    }
}

/// 在线心跳配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// 心跳间隔（秒）
    pub heartbeat_interval_secs: u64,
    /// 是否在前台时自动心跳
    pub enable_heartbeat: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 60,
            enable_heartbeat: true,
        }
    }
}

impl PresenceConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// 计费服务重连配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// 初始重连间隔（毫秒）
    pub initial_interval_ms: u64,
    /// 最大重连间隔（毫秒）
    pub max_interval_ms: u64,
    /// 退避倍数
    pub backoff_multiplier: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1000,  // 初始 1 秒
            max_interval_ms: 15_000,    // 1s → 2s → 4s → 8s → 15s 封顶
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// SDK 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnonChatConfig {
    pub collections: CollectionConfig,
    pub presence: PresenceConfig,
    pub reconnect: ReconnectConfig,
    /// 显示用时区；存储始终是 UTC
    pub timezone: TimezoneConfig,
    /// 调试模式
    pub debug_mode: bool,
}

impl AnonChatConfig {
    pub fn builder() -> AnonChatConfigBuilder {
        AnonChatConfigBuilder::new()
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        let collections = &self.collections;
        for (label, name) in [
            ("users", &collections.users),
            ("chats", &collections.chats),
            ("messages", &collections.messages),
        ] {
            if name.trim().is_empty() {
                return Err(AnonChatError::Config(format!("{} collection name is empty", label)));
            }
            if name.contains('/') {
                return Err(AnonChatError::Config(format!(
                    "{} collection name must not contain '/': {}",
                    label, name
                )));
            }
        }

        if self.presence.heartbeat_interval_secs == 0 {
            return Err(AnonChatError::Config("heartbeat interval must be positive".into()));
        }

        let reconnect = &self.reconnect;
        if reconnect.initial_interval_ms == 0 {
            return Err(AnonChatError::Config("reconnect initial interval must be positive".into()));
        }
        if reconnect.max_interval_ms < reconnect.initial_interval_ms {
            return Err(AnonChatError::Config(
                "reconnect max interval is smaller than the initial interval".into(),
            ));
        }
        if !reconnect.backoff_multiplier.is_finite() || reconnect.backoff_multiplier < 1.0 {
            return Err(AnonChatError::Config("reconnect backoff multiplier must be >= 1.0".into()));
        }
        if !reconnect.jitter_factor.is_finite() || !(0.0..=1.0).contains(&reconnect.jitter_factor) {
            return Err(AnonChatError::Config("reconnect jitter factor must be within 0.0-1.0".into()));
        }
        if self.timezone.to_fixed_offset().is_none() {
            return Err(AnonChatError::Config(format!(
                "invalid timezone offset: {}s",
                self.timezone.offset_seconds
            )));
        }
        Ok(())
    }
}

pub struct AnonChatConfigBuilder {
    config: AnonChatConfig,
}

impl AnonChatConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AnonChatConfig::default(),
        }
    }

    pub fn collections(mut self, collections: CollectionConfig) -> Self {
        self.config.collections = collections;
        self
    }

    pub fn heartbeat_interval_secs(mut self, secs: u64) -> Self {
        self.config.presence.heartbeat_interval_secs = secs;
        self
    }

    pub fn enable_heartbeat(mut self, enable: bool) -> Self {
        self.config.presence.enable_heartbeat = enable;
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    /// 设置显示时区（小时偏移）
    pub fn timezone_hours(mut self, hours: i32) -> Self {
        self.config.timezone = TimezoneConfig::from_hours(hours);
        self
    }

    pub fn timezone(mut self, timezone: TimezoneConfig) -> Self {
        self.config.timezone = timezone;
        self
    }

    pub fn debug_mode(mut self, debug: bool) -> Self {
        self.config.debug_mode = debug;
        self
    }

    pub fn build(self) -> AnonChatConfig {
        self.config
    }
}

impl Default for AnonChatConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
