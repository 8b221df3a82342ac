use core::sync::atomic::{AtomicU64, Ordering};

/// 池统计快照。
///
/// # 契约说明（What）
/// - `allocations`：因自由链表为空而新建实例的次数（增长事件），容量规划测试据此判断池是否进入稳态；
/// - `reuses`：命中自由链表的出队次数；
/// - `returns`：成功归还进入自由链表的次数；
/// - `rejected`：池已销毁或实例不合规而被丢弃的归还次数；
/// - `available`：快照时刻自由链表中的实例数量。
///
/// # 注意事项（Trade-offs）
/// - 各计数使用 `Relaxed` 原子序，仅保证单调，不保证与 `available` 在同一时刻一致。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocations: u64,
    pub reuses: u64,
    pub returns: u64,
    pub rejected: u64,
    pub available: usize,
}

#[derive(Debug, Default)]
pub(crate) struct PoolMetrics {
    allocations: AtomicU64,
    reuses: AtomicU64,
    returns: AtomicU64,
    rejected: AtomicU64,
}

impl PoolMetrics {
    pub(crate) fn on_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_reuse(&self) {
        self.reuses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_return(&self) {
        self.returns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_reject(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// `available` 由调用方在持锁时读取自由链表长度后传入。
    pub(crate) fn snapshot(&self, available: usize) -> PoolStats {
        PoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            available,
        }
    }
}
