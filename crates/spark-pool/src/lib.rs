//! `spark-pool` 提供数据报传输层共享的三类池化资源。
//!
//! # 模块定位（Why）
//! - 高负载下按数据报分配缓冲与标识会把分配器推到热路径上，池化换取稳态零分配；
//! - 缓冲池与标识池是并发发送、接收之间唯一共享的状态，必须自带同步，调用方无需额外加锁。
//!
//! # 设计概要（How）
//! - [`ObjectPool`]：通用自由链表，`parking_lot::Mutex<VecDeque<T>>` + 销毁标记；
//! - [`BufferPool`]：定长字节缓冲池，`dequeue` 永不失败，[`BufferLease`] 在 `Drop` 时归还；
//! - [`IdentifierPool`]：单调递增的 32 位 UID 池，[`UidLease`] 在 `Drop` 时归还；
//! - [`PoolStats`]：增长、复用、归还、拒收次数的快照，用于容量规划与测试断言。
//!
//! # 契约说明（What）
//! - 所有池的错误在本地吸收：失败以 `bool` / `Option` 表达，从不 panic；
//! - 销毁后的池进入惰性状态，已取出的实例仍归调用方所有。

mod buffer;
mod identifier;
mod metrics;
mod object;

pub use buffer::{BufferLease, BufferPool};
pub use identifier::{IdentifierPool, UidLease};
pub use metrics::PoolStats;
pub use object::ObjectPool;
