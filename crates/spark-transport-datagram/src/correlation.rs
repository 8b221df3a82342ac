use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use spark_codec_mux::Message;
use tokio::sync::oneshot;

use crate::error::RequestError;

/// 挂起的请求/响应交换：UID → 等待响应的一次性槽位。
///
/// # 设计初衷（Why）
/// - 身份消息的 UID 约定只负责“打标签”，真正的配对需要一个显式组件；
/// - 每个槽位只能被完成一次，响应到达或等待方放弃时立即清理。
///
/// # 契约说明（What）
/// - `register`：登记 UID 与请求目标，返回在响应到达时完成的 [`PendingResponse`]；
///   同一 UID 重复登记会替换旧槽位，旧的等待方随即观察到 [`RequestError::Disposed`]；
/// - `resolve`：只有响应来自登记的目标地址时才交给对应等待方，真正交付时返回 `true`；
///   其他地址的同 UID 响应不会消耗槽位；
/// - 等待方被丢弃（包括超时）时槽位自动移除，迟到的响应不再命中。
#[derive(Default)]
pub struct PendingExchanges {
    slots: Mutex<HashMap<u32, Slot>>,
}

#[derive(Debug)]
struct Slot {
    target: SocketAddr,
    reply: oneshot::Sender<Arc<dyn Message>>,
}

impl PendingExchanges {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(self: &Arc<Self>, uid: u32, target: SocketAddr) -> PendingResponse {
        let (reply, rx) = oneshot::channel();
        if self.slots.lock().insert(uid, Slot { target, reply }).is_some() {
            tracing::debug!(uid, "pending exchange replaced");
        }
        PendingResponse {
            uid,
            rx,
            exchanges: Arc::downgrade(self),
        }
    }

    pub fn resolve(&self, uid: u32, remote: SocketAddr, message: Arc<dyn Message>) -> bool {
        let slot = {
            let mut slots = self.slots.lock();
            match slots.get(&uid) {
                Some(slot) if slot.target == remote => slots.remove(&uid),
                Some(slot) => {
                    tracing::debug!(
                        uid,
                        remote = %remote,
                        expected = %slot.target,
                        "response from unexpected peer ignored for correlation"
                    );
                    None
                }
                None => None,
            }
        };
        slot.is_some_and(|slot| slot.reply.send(message).is_ok())
    }

    /// 放弃全部挂起交换，等待方观察到 [`RequestError::Disposed`]。
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.slots.lock().drain().collect();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.slots.lock().contains_key(&uid)
    }
}

impl core::fmt::Debug for PendingExchanges {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PendingExchanges")
            .field("pending", &self.len())
            .finish()
    }
}

/// 等待某个 UID 的响应。
#[derive(Debug)]
pub struct PendingResponse {
    uid: u32,
    rx: oneshot::Receiver<Arc<dyn Message>>,
    exchanges: Weak<PendingExchanges>,
}

impl PendingResponse {
    pub fn uid(&self) -> u32 {
        self.uid
    }
}

impl Future for PendingResponse {
    type Output = Result<Arc<dyn Message>, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.map_err(|_closed| RequestError::Disposed))
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.rx.is_terminated() {
            return;
        }
        self.rx.close();
        if let Some(exchanges) = self.exchanges.upgrade() {
            let mut slots = exchanges.slots.lock();
            if slots.get(&self.uid).is_some_and(|slot| slot.reply.is_closed()) {
                slots.remove(&self.uid);
            }
        }
    }
}
