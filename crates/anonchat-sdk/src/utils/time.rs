//! 时间处理工具模块
//!
//! # 设计原则
//!
//! - **写入层**: 所有写入后端的时间字段都来自 [`now_utc`]，UTC、毫秒精度
//! - **显示层**: [`TimeFormatter`] 按配置的时区偏移格式化
//! - **多语言**: 不包含硬编码文本，由应用层处理国际化

use chrono::{DateTime, FixedOffset, Local, Offset, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// 规范化的当前时间（UTC，截断到毫秒）
///
/// 所有写命令都使用它打时间戳，保证不同设备写入的时间可直接比较。
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// 时区配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimezoneConfig {
    /// 时区偏移（秒），例如：+08:00 = 28800, -05:00 = -18000
    pub offset_seconds: i32,
}

impl TimezoneConfig {
    /// 创建时区配置（从小时偏移）
    pub fn from_hours(hours: i32) -> Self {
        Self {
            offset_seconds: hours * 3600,
        }
    }

    /// 创建时区配置（从分钟偏移）
    pub fn from_minutes(minutes: i32) -> Self {
        Self {
            offset_seconds: minutes * 60,
        }
    }

    /// UTC
    pub fn utc() -> Self {
        Self { offset_seconds: 0 }
    }

    /// 使用系统本地时区
    pub fn local() -> Self {
        Self {
            offset_seconds: Local::now().offset().local_minus_utc(),
        }
    }

    /// 获取 FixedOffset，偏移超出 ±24h 时返回 None
    pub fn to_fixed_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.offset_seconds)
    }
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self::utc()
    }
}

/// 时间格式化工具
///
/// 每个实例持有自己的时区，由 SDK 按配置构造后注入给使用方。
#[derive(Debug, Clone, Copy)]
pub struct TimeFormatter {
    offset: FixedOffset,
}

impl TimeFormatter {
    /// 非法偏移时退回 UTC
    pub fn new(config: TimezoneConfig) -> Self {
        let offset = config
            .to_fixed_offset()
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// 将 UTC 时间转换为配置的时区
    pub fn to_timezone(&self, time: DateTime<Utc>) -> DateTime<FixedOffset> {
        time.with_timezone(&self.offset)
    }

    /// 格式: "YYYY-MM-DD HH:MM:SS"
    pub fn format_standard(&self, time: DateTime<Utc>) -> String {
        self.to_timezone(time).format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// 格式: "HH:MM"
    pub fn format_time_short(&self, time: DateTime<Utc>) -> String {
        self.to_timezone(time).format("%H:%M").to_string()
    }

    /// 最后活跃时间的展示：同一天只显示时分，否则显示日期和时分
    pub fn format_last_seen(&self, last_seen: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let seen = self.to_timezone(last_seen);
        let today = self.to_timezone(now);
        if seen.date_naive() == today.date_naive() {
            seen.format("%H:%M").to_string()
        } else {
            seen.format("%Y-%m-%d %H:%M").to_string()
        }
    }

    /// 距离 `now` 的秒数（正数表示过去）
    pub fn seconds_since(time: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        (now - time).num_seconds()
    }
}

impl Default for TimeFormatter {
    fn default() -> Self {
        Self::new(TimezoneConfig::default())
    }
}
