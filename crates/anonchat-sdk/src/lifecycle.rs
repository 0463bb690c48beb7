//! SDK 生命周期管理
//!
//! App 前后台切换时统一通知各模块：在线心跳、计费连接。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;

/// 生命周期回调 Hook
///
/// 各模块通过实现此 trait 来响应生命周期变化
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// 模块名，只用于日志
    fn name(&self) -> &str;

    /// App 切换到后台时调用
    async fn on_background(&self) -> Result<()>;

    /// App 切换到前台时调用
    async fn on_foreground(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Background,
    Foreground,
}

/// 生命周期管理器
#[derive(Default)]
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        info!("✅ 生命周期 Hook 已注册: {} (当前共 {} 个)", hook.name(), self.hooks.len() + 1);
        self.hooks.push(hook);
    }

    /// 通知所有 Hook：App 切换到后台
    ///
    /// 按注册顺序执行，某个 Hook 失败会记录错误并继续，最后返回第一个错误
    pub async fn notify_background(&self) -> Result<()> {
        self.notify(Transition::Background).await
    }

    /// 通知所有 Hook：App 切换到前台
    pub async fn notify_foreground(&self) -> Result<()> {
        self.notify(Transition::Foreground).await
    }

    async fn notify(&self, transition: Transition) -> Result<()> {
        info!("🔄 通知所有模块：{:?}", transition);

        let mut first_error = None;
        let mut failed = 0usize;
        for hook in &self.hooks {
            let result = match transition {
                Transition::Background => hook.on_background().await,
                Transition::Foreground => hook.on_foreground().await,
            };
            if let Err(e) = result {
                warn!("⚠️ Hook {} 切换失败 ({:?}): {}", hook.name(), transition, e);
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                warn!("⚠️ {} 个模块切换失败，所有模块都已尝试执行", failed);
                Err(e)
            }
            None => {
                info!("✅ 所有模块切换完成: {:?}", transition);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.hooks.iter().map(|hook| hook.name()).collect();
        f.debug_struct("LifecycleManager").field("hooks", &names).finish()
    }
}
