use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::metrics::{PoolMetrics, PoolStats};

/// `ObjectPool` 是线程安全、无上界的自由链表，负责复用任意类型的实例。
///
/// # 模块角色（Why）
/// - 高负载下每个数据报都做一次堆分配不可接受，池以少量常驻内存换取稳态零分配；
/// - 作为 [`BufferPool`](crate::BufferPool) 与 [`IdentifierPool`](crate::IdentifierPool) 的共同底座，
///   统一“归还 / 取出 / 销毁”三种动作的语义。
///
/// # 核心机制（How）
/// - 内部维护 `parking_lot::Mutex<VecDeque<T>>`：尾部入队、头部出队，近似 FIFO；
/// - `disposed` 原子标记在销毁后令所有入队、出队成为返回失败的空操作；
/// - 锁只覆盖队列操作本身，不覆盖任何 IO，竞争窗口极短。
///
/// # 契约说明（What）
/// - `enqueue`：实例进入自由链表返回 `true`；池已销毁时丢弃实例并返回 `false`；
/// - `try_dequeue`：取出一个实例，池为空或已销毁时返回 `None`；
/// - `dispose`：幂等；已被取出的实例仍归调用方所有，可继续使用直到主动归还（归还将被拒绝并丢弃）；
/// - 同一实例在任一时刻只属于池或一个调用方，所有权转移依赖 move 语义显式完成。
pub struct ObjectPool<T> {
    free: Mutex<VecDeque<T>>,
    disposed: AtomicBool,
    metrics: PoolMetrics,
}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectPool<T> {
    /// 创建空池。
    pub fn new() -> Self {
        Self {
            free: Mutex::new(VecDeque::new()),
            disposed: AtomicBool::new(false),
            metrics: PoolMetrics::default(),
        }
    }

    /// 将实例归还到自由链表。
    pub fn enqueue(&self, item: T) -> bool {
        if self.is_disposed() {
            self.metrics.on_reject();
            return false;
        }
        let mut free = self.free.lock();
        // 持锁复查，避免与 `dispose` 的清空交错后把实例留在已销毁的池里。
        if self.is_disposed() {
            drop(free);
            self.metrics.on_reject();
            return false;
        }
        free.push_back(item);
        drop(free);
        self.metrics.on_return();
        true
    }

    /// 尝试取出一个实例。
    pub fn try_dequeue(&self) -> Option<T> {
        if self.is_disposed() {
            return None;
        }
        let item = self.free.lock().pop_front();
        if item.is_some() {
            self.metrics.on_reuse();
        }
        item
    }

    /// 将池转入惰性状态并释放自由链表中的实例。
    ///
    /// 返回值表示本次调用是否真正完成了销毁；重复调用返回 `false`。
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let drained = core::mem::take(&mut *self.free.lock());
        tracing::trace!(released = drained.len(), "object pool disposed");
        true
    }

    /// 池是否已销毁。
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// 自由链表当前长度。
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 读取统计快照。
    pub fn stats(&self) -> PoolStats {
        let available = self.free.lock().len();
        self.metrics.snapshot(available)
    }

    pub(crate) fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }
}

impl<T> core::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("available", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
