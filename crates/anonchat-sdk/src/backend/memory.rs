//! 内存后端
//!
//! 实现 [`DocumentStore`]、[`IdentityProvider`] 和 [`BillingConnection`]，行为尽量贴近真实的托管服务：
//! 订阅时立即推送当前快照、写入后向所有相关订阅重新推送、`update` 对不存在的文档报错、
//! `add` 自动生成文档 id。另外提供注入写入结果、快照错误、原始文档和计数的测试钩子。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::debug;

use super::{
    BillingConnection, BillingResponse, CollectionPath, Document, DocumentStore, Fields,
    IdentityProvider, ListenerRegistration, Query, SignInOutcome, SnapshotCallback, SnapshotEvent,
    WriteOutcome,
};

/// 预设的写入结果（按写入顺序消费，队列空时正常写入）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedWrite {
    Cancelled,
    Failed(String),
}

struct Listener {
    query: Query,
    callback: SnapshotCallback,
}

#[derive(Default)]
struct StoreInner {
    collections: Mutex<BTreeMap<CollectionPath, BTreeMap<String, Fields>>>,
    listeners: Mutex<HashMap<u64, Listener>>,
    /// 取快照到回调完成期间持有，同一订阅的推送按写入顺序串行
    dispatch: ReentrantMutex<()>,
    scripted_writes: Mutex<VecDeque<ScriptedWrite>>,
    next_listener_id: AtomicU64,
    subscribe_count: AtomicUsize,
    release_count: AtomicUsize,
    write_count: AtomicUsize,
}

/// 内存文档数据库
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for MemoryDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDocumentStore")
            .field("active_listeners", &self.active_listener_count())
            .field("write_count", &self.write_count())
            .finish()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一次写入返回给定结果，而不是真正写入
    pub fn script_write(&self, outcome: ScriptedWrite) {
        self.inner.scripted_writes.lock().push_back(outcome);
    }

    /// 直接写入原始字段（不经过编码，可用于构造畸形文档），并推送给订阅方
    pub fn insert_raw(&self, collection: &CollectionPath, doc_id: &str, fields: Fields) {
        self.inner
            .collections
            .lock()
            .entry(collection.clone())
            .or_default()
            .insert(doc_id.to_string(), fields);
        self.notify(collection);
    }

    /// 向某个集合的所有订阅方推送一条错误通知
    pub fn emit_error(&self, collection: &CollectionPath, message: &str) {
        let _dispatch = self.inner.dispatch.lock();
        for callback in self.callbacks_for(collection) {
            callback(SnapshotEvent::failure(message));
        }
    }

    /// 向某个集合的所有订阅方推送一条同时带错误和当前数据的通知
    pub fn emit_error_with_data(&self, collection: &CollectionPath, message: &str) {
        let _dispatch = self.inner.dispatch.lock();
        let targets = self.snapshots_for(collection);
        for (callback, documents) in targets {
            callback(SnapshotEvent {
                documents: Some(documents),
                error: Some(message.to_string()),
            });
        }
    }

    pub fn document(&self, collection: &CollectionPath, doc_id: &str) -> Option<Fields> {
        self.inner
            .collections
            .lock()
            .get(collection)
            .and_then(|docs| docs.get(doc_id).cloned())
    }

    pub fn documents(&self, collection: &CollectionPath) -> Vec<Document> {
        self.inner
            .collections
            .lock()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn subscribe_count(&self) -> usize {
        self.inner.subscribe_count.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.inner.release_count.load(Ordering::SeqCst)
    }

    pub fn active_listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// 到达后端的写入次数（含被预设结果拦截的）
    pub fn write_count(&self) -> usize {
        self.inner.write_count.load(Ordering::SeqCst)
    }

    fn run_query(&self, query: &Query) -> Vec<Document> {
        let collections = self.inner.collections.lock();
        let mut documents: Vec<Document> = collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| {
                        query
                            .filter
                            .as_ref()
                            .map(|filter| filter.matches(fields))
                            .unwrap_or(true)
                    })
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order_by) = &query.order_by {
            documents.sort_by(|a, b| order_by.compare(&a.fields, &b.fields));
        }
        documents
    }

    fn callbacks_for(&self, collection: &CollectionPath) -> Vec<SnapshotCallback> {
        self.inner
            .listeners
            .lock()
            .values()
            .filter(|listener| &listener.query.collection == collection)
            .map(|listener| listener.callback.clone())
            .collect()
    }

    fn snapshots_for(&self, collection: &CollectionPath) -> Vec<(SnapshotCallback, Vec<Document>)> {
        let queries: Vec<(Query, SnapshotCallback)> = self
            .inner
            .listeners
            .lock()
            .values()
            .filter(|listener| &listener.query.collection == collection)
            .map(|listener| (listener.query.clone(), listener.callback.clone()))
            .collect();

        queries
            .into_iter()
            .map(|(query, callback)| {
                let documents = self.run_query(&query);
                (callback, documents)
            })
            .collect()
    }

    /// 回调在数据锁外执行；分发锁可重入，回调里再写 store 不会死锁
    fn notify(&self, collection: &CollectionPath) {
        let _dispatch = self.inner.dispatch.lock();
        for (callback, documents) in self.snapshots_for(collection) {
            callback(SnapshotEvent::data(documents));
        }
    }

    fn take_scripted(&self) -> Option<ScriptedWrite> {
        self.inner.write_count.fetch_add(1, Ordering::SeqCst);
        self.inner.scripted_writes.lock().pop_front()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn subscribe(&self, query: Query, callback: SnapshotCallback) -> ListenerRegistration {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribe_count.fetch_add(1, Ordering::SeqCst);
        debug!("memory store: listener {} subscribed to {}", id, query.collection);

        let dispatch = self.inner.dispatch.lock();
        let initial = self.run_query(&query);
        self.inner.listeners.lock().insert(
            id,
            Listener {
                query,
                callback: callback.clone(),
            },
        );
        callback(SnapshotEvent::data(initial));
        drop(dispatch);

        let inner = Arc::downgrade(&self.inner);
        ListenerRegistration::new(move || {
            if let Some(inner) = inner.upgrade() {
                if inner.listeners.lock().remove(&id).is_some() {
                    inner.release_count.fetch_add(1, Ordering::SeqCst);
                    debug!("memory store: listener {} released", id);
                }
            }
        })
    }

    async fn set(&self, collection: &CollectionPath, doc_id: &str, fields: Fields) -> WriteOutcome {
        match self.take_scripted() {
            Some(ScriptedWrite::Cancelled) => return WriteOutcome::Cancelled,
            Some(ScriptedWrite::Failed(reason)) => return WriteOutcome::Failed(reason),
            None => {}
        }

        self.inner
            .collections
            .lock()
            .entry(collection.clone())
            .or_default()
            .insert(doc_id.to_string(), fields);
        self.notify(collection);
        WriteOutcome::Ok(())
    }

    async fn update(&self, collection: &CollectionPath, doc_id: &str, fields: Fields) -> WriteOutcome {
        match self.take_scripted() {
            Some(ScriptedWrite::Cancelled) => return WriteOutcome::Cancelled,
            Some(ScriptedWrite::Failed(reason)) => return WriteOutcome::Failed(reason),
            None => {}
        }

        {
            let mut collections = self.inner.collections.lock();
            let existing = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(doc_id));
            match existing {
                Some(existing) => {
                    for (key, value) in fields {
                        existing.insert(key, value);
                    }
                }
                None => {
                    return WriteOutcome::Failed(format!(
                        "NOT_FOUND: No document to update: {}/{}",
                        collection, doc_id
                    ));
                }
            }
        }
        self.notify(collection);
        WriteOutcome::Ok(())
    }

    async fn add(&self, collection: &CollectionPath, fields: Fields) -> WriteOutcome<String> {
        match self.take_scripted() {
            Some(ScriptedWrite::Cancelled) => return WriteOutcome::Cancelled,
            Some(ScriptedWrite::Failed(reason)) => return WriteOutcome::Failed(reason),
            None => {}
        }

        let doc_id = uuid::Uuid::new_v4().simple().to_string();
        self.inner
            .collections
            .lock()
            .entry(collection.clone())
            .or_default()
            .insert(doc_id.clone(), fields);
        self.notify(collection);
        WriteOutcome::Ok(doc_id)
    }
}

/// 内存身份服务
#[derive(Debug, Default)]
pub struct MemoryIdentityProvider {
    current: Mutex<Option<String>>,
    scripted: Mutex<VecDeque<SignInOutcome>>,
    sign_in_delay: Mutex<Option<Duration>>,
    sign_in_calls: AtomicUsize,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已有持久化身份的情况
    pub fn with_identity(uid: impl Into<String>) -> Self {
        let provider = Self::default();
        *provider.current.lock() = Some(uid.into());
        provider
    }

    pub fn set_identity(&self, uid: Option<String>) {
        *self.current.lock() = uid;
    }

    /// 下一次匿名登录返回给定结果；队列空时生成新身份
    pub fn script_sign_in(&self, outcome: SignInOutcome) {
        self.scripted.lock().push_back(outcome);
    }

    pub fn set_sign_in_delay(&self, delay: Duration) {
        *self.sign_in_delay.lock() = Some(delay);
    }

    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    fn current_identity(&self) -> Option<String> {
        self.current.lock().clone()
    }

    async fn sign_in_anonymously(&self) -> SignInOutcome {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sign_in_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .scripted
            .lock()
            .pop_front()
            .unwrap_or_else(|| SignInOutcome::SignedIn(uuid::Uuid::new_v4().simple().to_string()));

        if let SignInOutcome::SignedIn(uid) = &outcome {
            *self.current.lock() = Some(uid.clone());
        }
        outcome
    }
}

/// 内存计费连接
///
/// `start_connection` 按预设顺序返回结果（队列空时返回 `Ok`），
/// 返回 `Ok` 后进入就绪状态；`launch_purchase` 可设置延迟以模拟用户停留在购买界面。
#[derive(Debug, Default)]
pub struct MemoryBillingConnection {
    ready: AtomicBool,
    scripted_starts: Mutex<VecDeque<BillingResponse>>,
    scripted_launches: Mutex<VecDeque<BillingResponse>>,
    launch_delay: Mutex<Option<Duration>>,
    launched: Mutex<Vec<String>>,
    start_calls: AtomicUsize,
    end_calls: AtomicUsize,
}

impl MemoryBillingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_start(&self, response: BillingResponse) {
        self.scripted_starts.lock().push_back(response);
    }

    pub fn script_launch(&self, response: BillingResponse) {
        self.scripted_launches.lock().push_back(response);
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.launch_delay.lock() = Some(delay);
    }

    /// 模拟服务端断开
    pub fn drop_connection(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn end_calls(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }

    /// 已完成拉起的商品
    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().clone()
    }
}

#[async_trait]
impl BillingConnection for MemoryBillingConnection {
    async fn start_connection(&self) -> BillingResponse {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .scripted_starts
            .lock()
            .pop_front()
            .unwrap_or(BillingResponse::Ok);
        self.ready
            .store(response == BillingResponse::Ok, Ordering::SeqCst);
        debug!("memory billing start_connection -> {:?}", response);
        response
    }

    async fn end_connection(&self) {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn launch_purchase(&self, sku: &str) -> BillingResponse {
        let delay = *self.launch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let response = self
            .scripted_launches
            .lock()
            .pop_front()
            .unwrap_or(BillingResponse::Ok);
        if response == BillingResponse::Ok {
            self.launched.lock().push(sku.to_string());
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Filter, OrderBy};
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    fn collecting_callback() -> (SnapshotCallback, Arc<Mutex<Vec<SnapshotEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: SnapshotCallback = Arc::new(move |event| sink.lock().push(event));
        (callback, events)
    }

    #[tokio::test]
    async fn test_subscribe_pushes_initial_and_updates() {
        let store = MemoryDocumentStore::new();
        let users = CollectionPath::root("user");
        store.set(&users, "b", fields(json!({ "uid": "b", "lastAction": 20 }))).await;

        let (callback, events) = collecting_callback();
        let query = Query::collection(users.clone()).with_order_by(OrderBy::ascending("lastAction"));
        let mut registration = store.subscribe(query, callback);

        store.set(&users, "a", fields(json!({ "uid": "a", "lastAction": 10 }))).await;

        {
            let events = events.lock();
            assert_eq!(events.len(), 2);
            let ids: Vec<_> = events[1]
                .documents
                .as_ref()
                .unwrap()
                .iter()
                .map(|doc| doc.id.clone())
                .collect();
            assert_eq!(ids, vec!["a", "b"]);
        }

        registration.remove();
        store.set(&users, "c", fields(json!({ "uid": "c" }))).await;
        assert_eq!(events.lock().len(), 2);
        assert_eq!(store.release_count(), 1);
    }

    #[test]
    fn test_concurrent_writes_deliver_latest_snapshot_last() {
        let users = CollectionPath::root("user");
        for _ in 0..50 {
            let store = MemoryDocumentStore::new();
            let (callback, events) = collecting_callback();
            let _registration = store.subscribe(Query::collection(users.clone()), callback);

            let writers: Vec<_> = (0..8)
                .map(|i| {
                    let store = store.clone();
                    let users = users.clone();
                    std::thread::spawn(move || {
                        let uid = format!("u{}", i);
                        store.insert_raw(&users, &uid, fields(json!({ "uid": uid })));
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            let events = events.lock();
            assert_eq!(events.len(), 9);
            let counts: Vec<usize> = events
                .iter()
                .map(|event| event.documents.as_ref().unwrap().len())
                .collect();
            assert!(counts.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", counts);
            assert_eq!(counts.last(), Some(&8));
        }
    }

    #[tokio::test]
    async fn test_callback_may_write_back_into_store() {
        let store = MemoryDocumentStore::new();
        let users = CollectionPath::root("user");
        let audit = CollectionPath::root("audit");

        let writer = store.clone();
        let target = audit.clone();
        let callback: SnapshotCallback = Arc::new(move |event| {
            let count = event.documents.map(|docs| docs.len()).unwrap_or(0);
            writer.insert_raw(&target, "last", fields(json!({ "count": count })));
        });
        let _registration = store.subscribe(Query::collection(users.clone()), callback);

        store.set(&users, "a", fields(json!({ "uid": "a" }))).await;
        assert_eq!(store.document(&audit, "last"), Some(fields(json!({ "count": 1 }))));
    }

    #[tokio::test]
    async fn test_filter_applies_to_snapshots() {
        let store = MemoryDocumentStore::new();
        let chats = CollectionPath::root("chat");
        store.set(&chats, "b+a", fields(json!({ "employee": ["b", "a"] }))).await;
        store.set(&chats, "c+d", fields(json!({ "employee": ["c", "d"] }))).await;

        let (callback, events) = collecting_callback();
        let query = Query::collection(chats).with_filter(Filter::array_contains("employee", "a"));
        let _registration = store.subscribe(query, callback);

        let events = events.lock();
        let documents = events[0].documents.as_ref().unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].id, "b+a");
    }

    #[tokio::test]
    async fn test_update_missing_document_fails() {
        let store = MemoryDocumentStore::new();
        let users = CollectionPath::root("user");
        let outcome = store.update(&users, "ghost", fields(json!({ "lastAction": 1 }))).await;
        assert!(matches!(outcome, WriteOutcome::Failed(reason) if reason.starts_with("NOT_FOUND")));
    }

    #[tokio::test]
    async fn test_scripted_writes_are_consumed_in_order() {
        let store = MemoryDocumentStore::new();
        let users = CollectionPath::root("user");
        store.script_write(ScriptedWrite::Cancelled);
        store.script_write(ScriptedWrite::Failed("denied".into()));

        assert_eq!(store.set(&users, "a", Fields::new()).await, WriteOutcome::Cancelled);
        assert_eq!(
            store.set(&users, "a", Fields::new()).await,
            WriteOutcome::Failed("denied".into())
        );
        assert_eq!(store.set(&users, "a", Fields::new()).await, WriteOutcome::Ok(()));
        assert_eq!(store.write_count(), 3);
    }

    #[tokio::test]
    async fn test_add_generates_id() {
        let store = MemoryDocumentStore::new();
        let messages = CollectionPath::root("chat").child("a+b", "communication");
        let outcome = store.add(&messages, fields(json!({ "value": "hi" }))).await;
        let WriteOutcome::Ok(doc_id) = outcome else {
            panic!("add should succeed");
        };
        assert!(store.document(&messages, &doc_id).is_some());
    }

    #[tokio::test]
    async fn test_identity_provider_sign_in() {
        let provider = MemoryIdentityProvider::new();
        assert_eq!(provider.current_identity(), None);

        provider.script_sign_in(SignInOutcome::Failed("network".into()));
        assert_eq!(
            provider.sign_in_anonymously().await,
            SignInOutcome::Failed("network".into())
        );
        assert_eq!(provider.current_identity(), None);

        let SignInOutcome::SignedIn(uid) = provider.sign_in_anonymously().await else {
            panic!("default sign-in should succeed");
        };
        assert_eq!(provider.current_identity(), Some(uid));
        assert_eq!(provider.sign_in_calls(), 2);
    }

    #[tokio::test]
    async fn test_billing_connection_scripted_start() {
        let connection = MemoryBillingConnection::new();
        connection.script_start(BillingResponse::ServiceDisconnected);

        assert_eq!(connection.start_connection().await, BillingResponse::ServiceDisconnected);
        assert!(!connection.is_ready());
        assert_eq!(connection.start_connection().await, BillingResponse::Ok);
        assert!(connection.is_ready());

        connection.end_connection().await;
        assert!(!connection.is_ready());
        assert_eq!(connection.start_calls(), 2);
        assert_eq!(connection.end_calls(), 1);
    }
}
