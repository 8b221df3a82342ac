use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 数据报传输配置。
///
/// # 契约说明（What）
/// - `frame_capacity`：单个池化缓冲（即单个数据报）的字节数；套接字自带容量时以套接字为准；
/// - `max_concurrent_sends`：发送闸门许可数，默认 1，即同一通道同时只有一个发送在途；
///   大于 1 时跨多个数据报的帧可能在线上交错，仅适用于单数据报帧；
/// - `send_timeout_ms`：[`send`](crate::DatagramTransport::send) 使用的默认闸门等待时长；
/// - `decode_timeout_ms`：接收循环等待多数据报帧剩余部分的上限，超时视为解码失败；
/// - `receive_enabled`：为 `false` 时 `start` 不启动接收循环（纯发送端）；
/// - `subscriber_capacity`：每个订阅者通道最多积压的通知数，积压满后新通知对该订阅者丢弃。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub frame_capacity: usize,
    pub max_concurrent_sends: usize,
    pub send_timeout_ms: u64,
    pub decode_timeout_ms: u64,
    pub receive_enabled: bool,
    pub subscriber_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            frame_capacity: 1400,
            max_concurrent_sends: 1,
            send_timeout_ms: 5_000,
            decode_timeout_ms: 2_000,
            receive_enabled: true,
            subscriber_capacity: 1024,
        }
    }
}

impl TransportConfig {
    pub fn with_frame_capacity(mut self, capacity: usize) -> Self {
        self.frame_capacity = capacity;
        self
    }

    pub fn with_max_concurrent_sends(mut self, permits: usize) -> Self {
        self.max_concurrent_sends = permits;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_decode_timeout(mut self, timeout: Duration) -> Self {
        self.decode_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_receive_enabled(mut self, enabled: bool) -> Self {
        self.receive_enabled = enabled;
        self
    }

    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_capacity == 0 {
            return Err(ConfigError::ZeroFrameCapacity);
        }
        if self.max_concurrent_sends == 0 {
            return Err(ConfigError::ZeroSendPermits);
        }
        if self.decode_timeout_ms == 0 {
            return Err(ConfigError::ZeroDecodeTimeout);
        }
        if self.subscriber_capacity == 0 {
            return Err(ConfigError::ZeroSubscriberCapacity);
        }
        Ok(())
    }
}
