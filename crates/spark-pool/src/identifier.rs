use std::sync::Arc;

use parking_lot::Mutex;

use crate::metrics::PoolStats;
use crate::object::ObjectPool;

/// `IdentifierPool` 发放 32 位关联标识（UID），供请求 / 响应配对使用。
///
/// # 设计初衷（Why）
/// - 异步请求与最终响应之间只靠 UID 关联，必须保证同一时刻未完成的两次交换不会持有相同 UID；
/// - 回收已完成交换的 UID 可以让标识空间在长连接上保持紧凑。
///
/// # 核心机制（How）
/// - 优先复用自由链表中的标识；链表为空时在互斥锁内自增计数器并返回新值，
///   锁的临界区只有自增本身，不覆盖任何 IO；
/// - 首个新值为 `1`，`0` 永不发放（回绕时跳过），便于上层把 `0` 当作“未分配”哨兵。
///
/// # 契约说明（What）
/// - `dequeue` 永不失败；在无人归还的前提下，N 次并发调用返回两两不同且连续的 N 个值；
/// - `enqueue` 的调用方必须保证被归还的 UID 已不再被任何未完成交换使用，
///   推荐使用 [`UidLease`] 由 `Drop` 自动归还以避免重复归还。
#[derive(Clone, Debug)]
pub struct IdentifierPool {
    inner: Arc<IdentifierPoolInner>,
}

#[derive(Debug)]
struct IdentifierPoolInner {
    recycled: ObjectPool<u32>,
    counter: Mutex<u32>,
}

impl Default for IdentifierPool {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(IdentifierPoolInner {
                recycled: ObjectPool::new(),
                counter: Mutex::new(0),
            }),
        }
    }

    /// 取出一个 UID。
    pub fn dequeue(&self) -> u32 {
        if let Some(uid) = self.inner.recycled.try_dequeue() {
            return uid;
        }
        let uid = {
            let mut counter = self.inner.counter.lock();
            *counter = counter.wrapping_add(1);
            if *counter == 0 {
                *counter = 1;
            }
            *counter
        };
        self.inner.recycled.metrics().on_allocation();
        uid
    }

    /// 归还 UID，`0` 会被拒绝。
    pub fn enqueue(&self, uid: u32) -> bool {
        if uid == 0 {
            return false;
        }
        self.inner.recycled.enqueue(uid)
    }

    /// 以租约形式取出 UID，租约释放时自动归还。
    pub fn lease(&self) -> UidLease {
        UidLease {
            uid: self.dequeue(),
            pool: self.clone(),
            released: false,
        }
    }

    /// 最近一次发放的新值（不含复用值）。
    pub fn high_water_mark(&self) -> u32 {
        *self.inner.counter.lock()
    }

    pub fn dispose(&self) -> bool {
        self.inner.recycled.dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.recycled.is_disposed()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.recycled.stats()
    }
}

/// UID 租约。
#[derive(Debug)]
pub struct UidLease {
    uid: u32,
    pool: IdentifierPool,
    released: bool,
}

impl UidLease {
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// 放弃自动归还（例如对端可能仍会以该 UID 迟到响应时）。
    pub fn forget(mut self) -> u32 {
        self.released = true;
        self.uid
    }
}

impl Drop for UidLease {
    fn drop(&mut self) {
        if !self.released {
            self.pool.enqueue(self.uid);
        }
    }
}
