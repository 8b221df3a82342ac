use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::SendError;

/// 发送闸门：有界并发的准入控制。
///
/// # 核心机制（How）
/// - 计数信号量，许可数即同时在途的发送数（默认 1）；
/// - `acquire` 以 `tokio::time::timeout` 包裹等待：超时只取消“等待”，取消后的等待者不会再取得许可；
/// - `close` 关闭信号量，所有正在等待与此后到来的调用立即得到 [`SendError::Disposed`]。
///
/// # 契约说明（What）
/// - 许可以 `OwnedSemaphorePermit` 形式交给写入任务，随任务结束自动释放，任何退出路径都不会泄漏；
/// - 超时（`Timeout`）与销毁（`Disposed`）是两种可区分的结果。
#[derive(Debug)]
pub struct SendGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// 持有期间占用一个发送许可。
pub type GatePermit = OwnedSemaphorePermit;

impl SendGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn acquire(&self, timeout: Duration) -> Result<GatePermit, SendError> {
        if self.semaphore.is_closed() {
            return Err(SendError::Disposed);
        }
        let waiting = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(timeout, waiting).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(SendError::Disposed),
            Err(_elapsed) => Err(SendError::Timeout(timeout)),
        }
    }

    /// 关闭闸门；重复调用返回 `false`。
    pub fn close(&self) -> bool {
        if self.semaphore.is_closed() {
            return false;
        }
        self.semaphore.close();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
