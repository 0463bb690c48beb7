//! 实时序列：把后端快照回调桥接成可取消的异步流
//!
//! 生产方是后端回调（任意线程），只往无界 mpsc 里推信封；消费方通过
//! [`futures::Stream`] 或 [`LiveSequence::next_envelope`] 读取。
//! 关闭（`close()` 或 drop）时释放后端订阅，且只释放一次。

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::backend::{ListenerRegistration, SnapshotEvent};
use crate::entities::{decode_all, Record};
use crate::envelope::DataEnvelope;

/// 一次推送的内容
pub type SnapshotEnvelope<T> = DataEnvelope<Vec<T>>;

/// 实时序列
pub struct LiveSequence<T> {
    label: String,
    receiver: mpsc::UnboundedReceiver<SnapshotEnvelope<T>>,
    registration: Option<ListenerRegistration>,
    closed: bool,
}

impl<T> LiveSequence<T> {
    pub(crate) fn new(
        label: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<SnapshotEnvelope<T>>,
        registration: ListenerRegistration,
    ) -> Self {
        Self {
            label: label.into(),
            receiver,
            registration: Some(registration),
            closed: false,
        }
    }

    /// 没能打开后端订阅的序列：先推一条错误，随后结束
    pub(crate) fn failed(label: impl Into<String>, message: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(DataEnvelope::Error(message.into()));
        Self {
            label: label.into(),
            receiver,
            registration: None,
            closed: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 等待下一条推送；关闭后返回 None
    pub async fn next_envelope(&mut self) -> Option<SnapshotEnvelope<T>> {
        if self.closed {
            return None;
        }
        self.receiver.recv().await
    }

    /// 停止观察并释放后端订阅；可重复调用
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.release();
        self.receiver.close();
        debug!("live sequence closed: {}", self.label);
    }

    fn release(&mut self) {
        if let Some(mut registration) = self.registration.take() {
            registration.remove();
            debug!("backend subscription released: {}", self.label);
        }
    }
}

impl<T> Stream for LiveSequence<T> {
    type Item = SnapshotEnvelope<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        this.receiver.poll_recv(cx)
    }
}

impl<T> Drop for LiveSequence<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> std::fmt::Debug for LiveSequence<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSequence")
            .field("label", &self.label)
            .field("closed", &self.closed)
            .finish()
    }
}

/// 把一次快照通知映射成要推送的信封
///
/// 通知里的错误和数据各自独立处理：有错误就推 `Error`，有数据就解码，
/// 解码成功推 `Success`、失败推 `Error`。
pub(crate) fn envelopes_for<T, F>(event: SnapshotEvent, post: F) -> Vec<SnapshotEnvelope<T>>
where
    T: Record,
    F: Fn(Vec<T>) -> Vec<T>,
{
    let mut envelopes = Vec::with_capacity(2);

    if let Some(message) = event.error {
        envelopes.push(DataEnvelope::Error(message));
    }

    match event.documents {
        Some(documents) => match decode_all::<T>(&documents) {
            Ok(records) => envelopes.push(DataEnvelope::Success(post(records))),
            Err(e) => envelopes.push(DataEnvelope::Error(e.to_string())),
        },
        None if envelopes.is_empty() => {
            envelopes.push(DataEnvelope::Error("snapshot carried no data".to_string()));
        }
        None => {}
    }

    envelopes
}
