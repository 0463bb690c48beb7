//! 后端抽象层
//!
//! 身份服务和文档数据库都是外部协作方（由平台层绑定具体厂商 SDK），
//! SDK 只通过这里的 trait 访问它们。
//!
//! - [`IdentityProvider`]：匿名身份
//! - [`DocumentStore`]：集合订阅 + 单文档写入
//! - [`memory`]：内存实现，用于测试和演示

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod memory;

/// 文档字段
pub type Fields = serde_json::Map<String, Value>;

/// 后端文档（id 来自文档 key，不在字段里）
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// 集合路径，例如 `chat` 或 `chat/{chat_id}/communication`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath {
    segments: Vec<String>,
}

impl CollectionPath {
    /// 顶层集合
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// 某个文档下的子集合
    pub fn child(&self, doc_id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(doc_id.into());
        segments.push(name.into());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// 集合名（最后一段）
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// 查询过滤条件
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// 数组字段包含某个值
    ArrayContains { field: String, value: Value },
    /// 字段等于某个值
    Equals { field: String, value: Value },
}

impl Filter {
    pub fn array_contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// 判断文档是否满足条件（缺失字段视为不满足）
    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Filter::ArrayContains { field, value } => match fields.get(field) {
                Some(Value::Array(items)) => items.contains(value),
                _ => false,
            },
            Filter::Equals { field, value } => fields.get(field) == Some(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    /// 按字段比较两个文档
    ///
    /// 缺失字段排在最前面，与文档数据库对 null 的排序一致。
    pub fn compare(&self, a: &Fields, b: &Fields) -> Ordering {
        let ordering = compare_values(a.get(&self.field), b.get(&self.field));
        match self.direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    }
}

/// 值排序：null < bool < number < string < 其他
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => x
                    .as_f64()
                    .unwrap_or_default()
                    .partial_cmp(&y.as_f64().unwrap_or_default())
                    .unwrap_or(Ordering::Equal),
            }
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// 集合订阅查询
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub filter: Option<Filter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(collection: CollectionPath) -> Self {
        Self {
            collection,
            filter: None,
            order_by: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }
}

/// 后端推送的一次快照通知
///
/// 数据和错误可以同时出现，也可以只有其一。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotEvent {
    pub documents: Option<Vec<Document>>,
    pub error: Option<String>,
}

impl SnapshotEvent {
    pub fn data(documents: Vec<Document>) -> Self {
        Self {
            documents: Some(documents),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            documents: None,
            error: Some(message.into()),
        }
    }
}

/// 快照回调，可能在任意线程上被调用
pub type SnapshotCallback = Arc<dyn Fn(SnapshotEvent) + Send + Sync>;

/// 订阅句柄：调用 [`ListenerRegistration::remove`] 释放后端订阅
///
/// 释放动作最多执行一次，句柄被 drop 时不会自动释放（由上层决定时机）。
pub struct ListenerRegistration {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// 不需要释放动作的句柄
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// 释放后端订阅；重复调用无效果
    pub fn remove(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_removed(&self) -> bool {
        self.release.is_none()
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// 后端写入结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T = ()> {
    Ok(T),
    /// 后端取消了写入（区别于拒绝）
    Cancelled,
    /// 后端拒绝，携带后端原始错误信息
    Failed(String),
}

/// 文档数据库
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// 订阅集合；每次数据变化都会回调一次，首次订阅立即推送当前快照
    fn subscribe(&self, query: Query, callback: SnapshotCallback) -> ListenerRegistration;

    /// 覆盖写入（upsert）
    async fn set(&self, collection: &CollectionPath, doc_id: &str, fields: Fields) -> WriteOutcome;

    /// 局部更新，文档不存在时由后端拒绝
    async fn update(&self, collection: &CollectionPath, doc_id: &str, fields: Fields) -> WriteOutcome;

    /// 新增文档，id 由后端生成
    async fn add(&self, collection: &CollectionPath, fields: Fields) -> WriteOutcome<String>;
}

/// 匿名登录结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    SignedIn(String),
    Failed(String),
    Cancelled,
}

/// 身份服务
#[async_trait]
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    /// 已持久化的当前身份
    fn current_identity(&self) -> Option<String>;

    /// 申请一个新的匿名身份
    async fn sign_in_anonymously(&self) -> SignInOutcome;
}

/// 计费服务响应码
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingResponse {
    Ok,
    UserCancelled,
    ItemAlreadyOwned,
    DeveloperError,
    /// 与计费服务的连接断开，需要重连
    ServiceDisconnected,
    Error(String),
}

/// 计费服务连接
#[async_trait]
pub trait BillingConnection: Send + Sync + fmt::Debug {
    /// 建立连接，返回建立结果
    async fn start_connection(&self) -> BillingResponse;

    async fn end_connection(&self);

    fn is_ready(&self) -> bool;

    /// 拉起购买流程；返回的是拉起结果，购买结果另行回调
    async fn launch_purchase(&self, sku: &str) -> BillingResponse;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    #[test]
    fn test_collection_path() {
        let chats = CollectionPath::root("chat");
        let messages = chats.child("a+b", "communication");
        assert_eq!(chats.to_string(), "chat");
        assert_eq!(messages.to_string(), "chat/a+b/communication");
        assert_eq!(messages.name(), "communication");
    }

    #[test]
    fn test_filter_matches() {
        let doc = fields(json!({ "employee": ["a", "b"], "uid": "a" }));
        assert!(Filter::array_contains("employee", "a").matches(&doc));
        assert!(!Filter::array_contains("employee", "c").matches(&doc));
        assert!(!Filter::array_contains("uid", "a").matches(&doc));
        assert!(Filter::equals("uid", "a").matches(&doc));
        assert!(!Filter::equals("missing", "a").matches(&doc));
    }

    #[test]
    fn test_order_by_puts_missing_first() {
        let order = OrderBy::ascending("lastAction");
        let missing = fields(json!({ "uid": "x" }));
        let early = fields(json!({ "lastAction": 10 }));
        let late = fields(json!({ "lastAction": 20 }));
        assert_eq!(order.compare(&missing, &early), Ordering::Less);
        assert_eq!(order.compare(&early, &late), Ordering::Less);
        assert_eq!(order.compare(&late, &early), Ordering::Greater);
    }

    #[test]
    fn test_listener_registration_releases_once() {
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let mut registration = ListenerRegistration::new(move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });
        registration.remove();
        registration.remove();
        assert!(registration.is_removed());
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }
}
