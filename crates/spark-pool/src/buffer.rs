use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;

use crate::metrics::PoolStats;
use crate::object::ObjectPool;

/// `BufferPool` 复用长度固定为帧容量的字节缓冲。
///
/// # 模块角色（Why）
/// - 发送与接收路径每处理一帧都需要一块帧容量大小的缓冲，池化后稳态下不再触发堆分配；
/// - `dequeue` 永不失败：自由链表为空时直接新建，调用点无需处理“池空”分支。
///
/// # 核心机制（How）
/// - 底层复用 [`ObjectPool<BytesMut>`]，新建分配计入 `PoolStats::allocations`，供容量规划测试观察；
/// - 归还时把缓冲规整回恰好 `frame_capacity` 个零字节；容量不足的缓冲直接丢弃，防止污染池；
/// - [`BufferLease`] 在 `Drop` 中自动归还，保证发送、接收的每条退出路径都不会泄漏缓冲。
///
/// # 契约说明（What）
/// - 任一缓冲在任一时刻只归属于池、一次发送或一次接收之一，所有权经 `dequeue`/`enqueue` 显式转移；
/// - 池销毁后 `dequeue` 仍返回新缓冲（保证可用），`enqueue` 则丢弃并返回 `false`。
#[derive(Clone, Debug)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

#[derive(Debug)]
struct BufferPoolInner {
    frame_capacity: usize,
    free: ObjectPool<BytesMut>,
}

impl BufferPool {
    /// 以给定帧容量创建空池。
    pub fn new(frame_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                frame_capacity,
                free: ObjectPool::new(),
            }),
        }
    }

    /// 创建并预热 `count` 块缓冲。
    pub fn with_prefill(frame_capacity: usize, count: usize) -> Self {
        let pool = Self::new(frame_capacity);
        for _ in 0..count {
            let buffer = pool.allocate();
            pool.enqueue(buffer);
        }
        pool
    }

    /// 每块缓冲的固定长度。
    pub fn frame_capacity(&self) -> usize {
        self.inner.frame_capacity
    }

    /// 取出一块缓冲，池空时新建。
    pub fn dequeue(&self) -> BytesMut {
        match self.inner.free.try_dequeue() {
            Some(buffer) => buffer,
            None => self.allocate(),
        }
    }

    /// 归还缓冲。
    pub fn enqueue(&self, mut buffer: BytesMut) -> bool {
        let capacity = self.inner.frame_capacity;
        if buffer.capacity() < capacity {
            self.inner.free.metrics().on_reject();
            return false;
        }
        buffer.clear();
        buffer.resize(capacity, 0);
        self.inner.free.enqueue(buffer)
    }

    /// 以租约形式取出缓冲，租约释放时自动归还。
    pub fn lease(&self) -> BufferLease {
        BufferLease {
            buffer: Some(self.dequeue()),
            pool: self.clone(),
        }
    }

    /// 销毁池，幂等。
    pub fn dispose(&self) -> bool {
        self.inner.free.dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.free.is_disposed()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.free.stats()
    }

    fn allocate(&self) -> BytesMut {
        self.inner.free.metrics().on_allocation();
        tracing::trace!(capacity = self.inner.frame_capacity, "buffer pool grew");
        BytesMut::zeroed(self.inner.frame_capacity)
    }
}

/// 缓冲租约：持有一块池化缓冲，`Drop` 时归还。
///
/// 通过 `Deref<Target = [u8]>` 直接暴露整块帧容量的字节，调用方按实际填充长度切片使用。
#[derive(Debug)]
pub struct BufferLease {
    buffer: Option<BytesMut>,
    pool: BufferPool,
}

impl BufferLease {
    /// 放弃自动归还，取走底层缓冲。
    pub fn detach(mut self) -> BytesMut {
        self.buffer.take().unwrap_or_default()
    }
}

impl Deref for BufferLease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for BufferLease {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.enqueue(buffer);
        }
    }
}
