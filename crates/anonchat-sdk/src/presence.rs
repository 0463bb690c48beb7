//! 在线心跳
//!
//! 前台时按固定间隔刷新当前用户的 `lastAction`，切到后台停止。
//! 其他用户据此计算在线状态（见 [`crate::entities::PresenceStatus`]）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::CommandService;
use crate::config::PresenceConfig;
use crate::error::Result;
use crate::lifecycle::LifecycleHook;

struct HeartbeatTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// 在线心跳
pub struct PresenceHeartbeat {
    commands: Arc<CommandService>,
    config: PresenceConfig,
    task: Mutex<Option<HeartbeatTask>>,
    beats: Arc<AtomicU64>,
}

impl PresenceHeartbeat {
    pub fn new(commands: Arc<CommandService>, config: PresenceConfig) -> Self {
        Self {
            commands,
            config,
            task: Mutex::new(None),
            beats: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 启动心跳；已在运行时什么都不做。第一次刷新立即执行
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            debug!("presence heartbeat already running");
            return;
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let commands = self.commands.clone();
        let beats = self.beats.clone();
        let period = self.config.heartbeat_interval();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {
                        beats.fetch_add(1, Ordering::Relaxed);
                        // 单次失败只记录，下一拍继续
                        if let Err(e) = commands.refresh_presence().await {
                            warn!("presence refresh failed: {}", e);
                        }
                    }
                }
            }
            debug!("presence heartbeat loop exited");
        });

        info!("💓 presence heartbeat started ({}s)", period.as_secs());
        *task = Some(HeartbeatTask { token, handle });
    }

    /// 停止心跳；可重复调用
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.token.cancel();
            task.handle.abort();
            info!("presence heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// 已执行的心跳次数
    pub fn beat_count(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }
}

impl Drop for PresenceHeartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PresenceHeartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceHeartbeat")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

#[async_trait]
impl LifecycleHook for PresenceHeartbeat {
    fn name(&self) -> &str {
        "presence"
    }

    async fn on_background(&self) -> Result<()> {
        self.stop();
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        if self.config.enable_heartbeat {
            self.start();
        } else {
            self.commands.refresh_presence().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryDocumentStore, MemoryIdentityProvider};
    use crate::config::CollectionConfig;
    use crate::entities::{Record, UserRecord};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    async fn setup(config: PresenceConfig, with_record: bool) -> (MemoryDocumentStore, PresenceHeartbeat) {
        let store = MemoryDocumentStore::new();
        if with_record {
            let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            store.insert_raw(
                &CollectionConfig::default().users_path(),
                "me",
                UserRecord::new("me", old).encode().unwrap(),
            );
        }
        let commands = Arc::new(CommandService::new(
            Arc::new(store.clone()),
            Arc::new(MemoryIdentityProvider::with_identity("me")),
            CollectionConfig::default(),
        ));
        (store, PresenceHeartbeat::new(commands, config))
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_refreshes_on_interval() {
        let (store, heartbeat) = setup(PresenceConfig::default(), true).await;
        heartbeat.start();
        heartbeat.start();

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(heartbeat.beat_count(), 3);
        assert_eq!(store.write_count(), 3);

        let stored = store
            .document(&CollectionConfig::default().users_path(), "me")
            .unwrap();
        let user = UserRecord::decode(&crate::backend::Document::new("me", stored)).unwrap();
        assert!(user.last_action.unwrap() > Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_heartbeat() {
        let (store, heartbeat) = setup(PresenceConfig::default(), true).await;
        heartbeat.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        heartbeat.stop();
        heartbeat.stop();
        assert!(!heartbeat.is_running());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_keeps_heartbeat_alive() {
        let (store, heartbeat) = setup(PresenceConfig::default(), false).await;
        heartbeat.start();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(heartbeat.is_running());
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_hooks() {
        let (_store, heartbeat) = setup(PresenceConfig::default(), true).await;
        heartbeat.on_foreground().await.unwrap();
        assert!(heartbeat.is_running());
        heartbeat.on_background().await.unwrap();
        assert!(!heartbeat.is_running());

        let disabled = PresenceConfig {
            enable_heartbeat: false,
            ..PresenceConfig::default()
        };
        let (store_disabled, heartbeat) = setup(disabled, true).await;
        heartbeat.on_foreground().await.unwrap();
        assert!(!heartbeat.is_running());
        assert_eq!(store_disabled.write_count(), 1);
    }
}
