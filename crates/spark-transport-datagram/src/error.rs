use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use spark_codec_mux::{CodecError, UidError};
use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.transport.datagram.bind_failed",
    message: "datagram bind",
};
pub(crate) const SEND: OperationKind = OperationKind {
    code: "spark.transport.datagram.send_failed",
    message: "datagram send",
};
pub(crate) const RECEIVE: OperationKind = OperationKind {
    code: "spark.transport.datagram.receive_failed",
    message: "datagram receive",
};
pub(crate) const DECODE: OperationKind = OperationKind {
    code: "spark.transport.datagram.decode_failed",
    message: "datagram decode",
};

/// 传输层错误码。
pub mod codes {
    pub const SEND_TIMEOUT: &str = "spark.transport.datagram.send_timeout";
    pub const DISPOSED: &str = "spark.transport.datagram.disposed";
    pub const ENCODE_FAILED: &str = "spark.transport.datagram.encode_failed";
    pub const EMPTY_PAYLOAD: &str = "spark.transport.datagram.empty_payload";
    pub const SEND_FAILED: &str = super::SEND.code;
    pub const RECEIVE_FAILED: &str = super::RECEIVE.code;
    pub const DECODE_FAILED: &str = super::DECODE.code;
    pub const BIND_FAILED: &str = super::BIND.code;
    pub const ABORTED: &str = "spark.transport.datagram.aborted";
    pub const NOT_IDENTITY: &str = "spark.transport.datagram.not_identity";
    pub const UID_REJECTED: &str = "spark.transport.datagram.uid_rejected";
    pub const REQUEST_TIMEOUT: &str = "spark.transport.datagram.request_timeout";
    pub const INVALID_CONFIG: &str = "spark.transport.datagram.invalid_config";
}

/// 发送路径的失败结果。
///
/// # 契约说明（What）
/// - `Timeout`：截止前未取得发送闸门，未写出任何字节，可重试；
/// - `Disposed`：传输已销毁，与超时严格区分；
/// - `Encode` / `EmptyPayload`：调用方或配置错误，闸门已释放、未写出字节；
/// - `Io`：套接字写失败，之前的分片可能已经送出，帧在对端不可恢复；
/// - `Aborted`：承载写入的任务被运行时取消（通常是运行时正在关闭）。
#[derive(Debug, Error)]
pub enum SendError {
    #[error("在 {0:?} 内未取得发送闸门")]
    Timeout(Duration),
    #[error("传输已销毁")]
    Disposed,
    #[error("编码失败: {0}")]
    Encode(#[from] CodecError),
    #[error("消息编码为空")]
    EmptyPayload,
    #[error("datagram send: {source}")]
    Io {
        #[source]
        source: io::Error,
    },
    #[error("发送任务被中止")]
    Aborted,
}

impl SendError {
    pub fn code(&self) -> &'static str {
        match self {
            SendError::Timeout(_) => codes::SEND_TIMEOUT,
            SendError::Disposed => codes::DISPOSED,
            SendError::Encode(_) => codes::ENCODE_FAILED,
            SendError::EmptyPayload => codes::EMPTY_PAYLOAD,
            SendError::Io { .. } => codes::SEND_FAILED,
            SendError::Aborted => codes::ABORTED,
        }
    }

    /// 超时与 IO 失败可由调用方择机重试；其余结果重试也不会改变。
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Timeout(_) | SendError::Io { .. })
    }
}

/// 请求/响应交换的失败结果。
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("消息 `{0}` 不携带 UID，无法关联响应")]
    NotIdentity(&'static str),
    #[error("UID 赋值失败: {0}")]
    Uid(#[from] UidError),
    #[error("UID {uid} 的响应在截止前未到达")]
    TimedOut { uid: u32 },
    #[error("传输已销毁")]
    Disposed,
}

impl RequestError {
    pub fn code(&self) -> &'static str {
        match self {
            RequestError::Send(err) => err.code(),
            RequestError::NotIdentity(_) => codes::NOT_IDENTITY,
            RequestError::Uid(_) => codes::UID_REJECTED,
            RequestError::TimedOut { .. } => codes::REQUEST_TIMEOUT,
            RequestError::Disposed => codes::DISPOSED,
        }
    }
}

/// 套接字建立失败。
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("datagram bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl SocketError {
    pub fn code(&self) -> &'static str {
        match self {
            SocketError::Bind { .. } => codes::BIND_FAILED,
        }
    }
}

/// 配置校验失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("frame_capacity 必须大于 0")]
    ZeroFrameCapacity,
    #[error("max_concurrent_sends 必须大于 0")]
    ZeroSendPermits,
    #[error("decode_timeout_ms 必须大于 0")]
    ZeroDecodeTimeout,
    #[error("subscriber_capacity 必须大于 0")]
    ZeroSubscriberCapacity,
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        codes::INVALID_CONFIG
    }
}
