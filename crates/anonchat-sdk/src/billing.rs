//! 订阅计费
//!
//! ## 职责
//!
//! 1. **连接管理**：前台建立计费连接，后台断开
//! 2. **断线重连**：指数退避，间隔有上限，连接成功后重置
//! 3. **购买流程**：新的购买会取消上一次未完成的流程
//! 4. **结果广播**：`watch` 通道，只保留最新结果
//!
//! 退避参数来自 [`ReconnectConfig`]：默认 1s → 2s → 4s → 8s → 15s 封顶，带少量随机抖动。

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{BillingConnection, BillingResponse};
use crate::config::ReconnectConfig;
use crate::error::{AnonChatError, Result};
use crate::lifecycle::LifecycleHook;

/// 购买结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseResult {
    Ok,
    UserCancelled,
    AlreadyOwned,
    DeveloperError,
    UnknownError,
}

impl PurchaseResult {
    /// 已拥有也算成功
    pub fn is_success(&self) -> bool {
        matches!(self, PurchaseResult::Ok | PurchaseResult::AlreadyOwned)
    }
}

impl From<&BillingResponse> for PurchaseResult {
    fn from(response: &BillingResponse) -> Self {
        match response {
            BillingResponse::Ok => PurchaseResult::Ok,
            BillingResponse::UserCancelled => PurchaseResult::UserCancelled,
            BillingResponse::ItemAlreadyOwned => PurchaseResult::AlreadyOwned,
            BillingResponse::DeveloperError => PurchaseResult::DeveloperError,
            BillingResponse::ServiceDisconnected | BillingResponse::Error(_) => {
                PurchaseResult::UnknownError
            }
        }
    }
}

/// 重连退避状态
#[derive(Debug)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    current: Duration,
    attempts: u64,
}

impl ReconnectBackoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current: Duration::from_millis(config.initial_interval_ms),
            attempts: 0,
            config,
        }
    }

    /// 取出本次等待时间（含抖动），并把下一次间隔翻倍（不超过上限）
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.attempts += 1;

        let max = Duration::from_millis(self.config.max_interval_ms);
        // 倍数异常或乘积溢出时停在上限
        self.current = Duration::try_from_secs_f64(base.as_secs_f64() * self.config.backoff_multiplier)
            .unwrap_or(max)
            .min(max);

        let delay = self.with_jitter(base).min(max);
        debug!(
            "billing reconnect attempt #{}, wait {}ms, next base {}ms",
            self.attempts,
            delay.as_millis(),
            self.current.as_millis()
        );
        delay
    }

    fn with_jitter(&self, base: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-factor..=factor);
        Duration::try_from_secs_f64((base.as_secs_f64() * (1.0 + spread)).max(0.0)).unwrap_or(base)
    }

    /// 连接成功后重置
    pub fn reset(&mut self) {
        if self.attempts > 0 {
            info!("billing connected, backoff reset after {} attempts", self.attempts);
        }
        self.current = Duration::from_millis(self.config.initial_interval_ms);
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// 下一次等待的基准间隔（不含抖动）
    pub fn current_interval(&self) -> Duration {
        self.current
    }
}

/// 计费管理器
pub struct BillingManager {
    connection: Arc<dyn BillingConnection>,
    backoff: Mutex<ReconnectBackoff>,
    results: watch::Sender<Option<PurchaseResult>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    purchase_task: Mutex<Option<JoinHandle<()>>>,
    this: Weak<BillingManager>,
}

impl BillingManager {
    pub fn new(connection: Arc<dyn BillingConnection>, config: ReconnectConfig) -> Arc<Self> {
        let (results, _) = watch::channel(None);
        Arc::new_cyclic(|this| Self {
            connection,
            backoff: Mutex::new(ReconnectBackoff::new(config)),
            results,
            reconnect_task: Mutex::new(None),
            purchase_task: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// 订阅购买结果（只保留最新值，尚无结果时为 None）
    pub fn subscribe(&self) -> watch::Receiver<Option<PurchaseResult>> {
        self.results.subscribe()
    }

    pub fn latest_result(&self) -> Option<PurchaseResult> {
        *self.results.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.connection.is_ready()
    }

    /// 基准重连间隔，供观察退避状态
    pub fn current_backoff(&self) -> Duration {
        self.backoff.lock().current_interval()
    }

    /// 未就绪时建立连接
    pub async fn connect(&self) {
        if self.connection.is_ready() {
            debug!("billing connection already ready");
            return;
        }
        let response = self.connection.start_connection().await;
        self.on_setup_finished(response);
    }

    /// 连接建立结果
    pub fn on_setup_finished(&self, response: BillingResponse) {
        match response {
            BillingResponse::Ok => {
                if let Some(task) = self.reconnect_task.lock().take() {
                    task.abort();
                }
                self.backoff.lock().reset();
                info!("✅ billing connection ready");
            }
            BillingResponse::ServiceDisconnected => self.on_service_disconnected(),
            other => warn!("billing setup finished with {:?}", other),
        }
    }

    /// 与计费服务断开：取消已安排的重连，按退避间隔重新安排一次
    pub fn on_service_disconnected(&self) {
        let delay = self.backoff.lock().next_delay();
        let manager = self.this.clone();

        let mut slot = self.reconnect_task.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        warn!("billing service disconnected, reconnecting in {}ms", delay.as_millis());
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let response = manager.connection.start_connection().await;
            manager.on_setup_finished(response);
        }));
    }

    /// 购买流程回调
    pub fn on_purchases_updated(&self, response: BillingResponse) {
        let result = PurchaseResult::from(&response);
        info!("purchase updated: {:?} -> {:?}", response, result);
        self.results.send_replace(Some(result));
    }

    /// 发起购买；上一次未完成的流程会被取消。拉起失败时发布 `UnknownError`
    pub fn start_purchase(&self, sku: &str) {
        let manager = self.this.clone();
        let sku = sku.to_string();

        let mut slot = self.purchase_task.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
            debug!("previous purchase flow cancelled");
        }

        *slot = Some(tokio::spawn(async move {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let response = manager.connection.launch_purchase(&sku).await;
            if response != BillingResponse::Ok {
                warn!("launching purchase flow for {} failed: {:?}", sku, response);
                manager.results.send_replace(Some(PurchaseResult::UnknownError));
            } else {
                debug!("purchase flow launched: {}", sku);
            }
        }));
    }

    /// 停止重连并断开连接
    pub async fn shutdown(&self) {
        for slot in [&self.reconnect_task, &self.purchase_task] {
            if let Some(task) = slot.lock().take() {
                task.abort();
            }
        }
        if self.connection.is_ready() {
            self.connection.end_connection().await;
        }
        info!("billing connection closed");
    }
}

impl std::fmt::Debug for BillingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingManager")
            .field("connection", &self.connection)
            .field("backoff", &*self.backoff.lock())
            .field("latest_result", &self.latest_result())
            .finish()
    }
}

#[async_trait]
impl LifecycleHook for BillingManager {
    fn name(&self) -> &str {
        "billing"
    }

    async fn on_background(&self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        self.connect().await;
        if self.connection.is_ready() || self.reconnect_task.lock().is_some() {
            return Ok(());
        }
        Err(AnonChatError::Billing("billing connection could not be established".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBillingConnection;

    fn no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            jitter_factor: 0.0,
            ..ReconnectConfig::default()
        }
    }

    fn manager() -> (Arc<MemoryBillingConnection>, Arc<BillingManager>) {
        let connection = Arc::new(MemoryBillingConnection::new());
        let manager = BillingManager::new(connection.clone(), no_jitter());
        (connection, manager)
    }

    #[test]
    fn test_purchase_result_success() {
        assert!(PurchaseResult::Ok.is_success());
        assert!(PurchaseResult::AlreadyOwned.is_success());
        assert!(!PurchaseResult::UserCancelled.is_success());
        assert!(!PurchaseResult::DeveloperError.is_success());
        assert!(!PurchaseResult::UnknownError.is_success());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = ReconnectBackoff::new(no_jitter());
        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 15000, 15000]);
        assert_eq!(backoff.attempts(), 6);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let mut backoff = ReconnectBackoff::new(ReconnectConfig::default());
        for _ in 0..20 {
            let base = backoff.current_interval().as_secs_f64();
            let delay = backoff.next_delay().as_secs_f64();
            assert!(delay >= base * 0.9 - 1e-6);
            assert!(delay <= 15.0 + 1e-6);
        }
    }

    #[test]
    fn test_backoff_stays_at_cap_when_growth_overflows() {
        for multiplier in [f64::NAN, f64::INFINITY, f64::MAX] {
            let mut backoff = ReconnectBackoff::new(ReconnectConfig {
                backoff_multiplier: multiplier,
                max_interval_ms: u64::MAX,
                ..no_jitter()
            });
            assert_eq!(backoff.next_delay(), Duration::from_secs(1));
            assert_eq!(backoff.current_interval(), Duration::from_millis(u64::MAX));
            assert_eq!(backoff.next_delay(), Duration::from_millis(u64::MAX));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_with_unbounded_multiplier_schedules_reconnect() {
        let connection = Arc::new(MemoryBillingConnection::new());
        let manager = BillingManager::new(
            connection.clone(),
            ReconnectConfig {
                backoff_multiplier: f64::INFINITY,
                ..no_jitter()
            },
        );
        connection.script_start(BillingResponse::ServiceDisconnected);

        manager.connect().await;
        assert_eq!(manager.current_backoff(), Duration::from_secs(15));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(connection.start_calls(), 2);
        assert!(manager.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_with_backoff_until_ready() {
        let (connection, manager) = manager();
        connection.script_start(BillingResponse::ServiceDisconnected);
        connection.script_start(BillingResponse::ServiceDisconnected);

        manager.connect().await;
        assert_eq!(connection.start_calls(), 1);
        assert_eq!(manager.current_backoff(), Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(connection.start_calls(), 2);
        assert_eq!(manager.current_backoff(), Duration::from_secs(4));

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert_eq!(connection.start_calls(), 2);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(connection.start_calls(), 3);
        assert!(manager.is_ready());
        assert_eq!(manager.current_backoff(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_disconnect_replaces_pending_reconnect() {
        let (connection, manager) = manager();
        manager.on_service_disconnected();
        manager.on_service_disconnected();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(connection.start_calls(), 1);
        assert!(manager.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purchase_launch_failure_posts_unknown_error() {
        let (connection, manager) = manager();
        connection.script_launch(BillingResponse::Error("sku not found".into()));
        let mut receiver = manager.subscribe();

        manager.start_purchase("premium_monthly");
        receiver.changed().await.unwrap();
        assert_eq!(*receiver.borrow(), Some(PurchaseResult::UnknownError));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_purchase_cancels_previous_flow() {
        let (connection, manager) = manager();
        connection.set_launch_delay(Duration::from_millis(500));

        manager.start_purchase("premium_monthly");
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.start_purchase("premium_yearly");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(connection.launched(), vec!["premium_yearly".to_string()]);
        assert_eq!(manager.latest_result(), None);

        manager.on_purchases_updated(BillingResponse::ItemAlreadyOwned);
        assert_eq!(manager.latest_result(), Some(PurchaseResult::AlreadyOwned));
        assert!(manager.latest_result().unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_connects_and_disconnects() {
        let (connection, manager) = manager();
        manager.on_foreground().await.unwrap();
        assert!(manager.is_ready());

        manager.on_foreground().await.unwrap();
        assert_eq!(connection.start_calls(), 1);

        manager.on_background().await.unwrap();
        assert!(!manager.is_ready());
        assert_eq!(connection.end_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_error_is_reported_on_foreground() {
        let (connection, manager) = manager();
        connection.script_start(BillingResponse::DeveloperError);
        let err = manager.on_foreground().await.unwrap_err();
        assert!(matches!(err, AnonChatError::Billing(_)));
    }
}
