use std::io;

use thiserror::Error;

/// 编解码错误码，遵循 `spark.<域>.<动作>` 的稳定命名，便于日志与指标聚合。
pub mod codes {
    pub const NO_CODER: &str = "spark.codec.no_coder";
    pub const UNKNOWN_CODER: &str = "spark.codec.unknown_coder";
    pub const UNKNOWN_TAG: &str = "spark.codec.unknown_tag";
    pub const TRUNCATED: &str = "spark.codec.truncated";
    pub const MALFORMED: &str = "spark.codec.malformed";
    pub const IO: &str = "spark.codec.io";
    pub const UID: &str = "spark.codec.uid";
}

/// UID 赋值错误。
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum UidError {
    /// UID 只允许在发送前由传输层赋值一次。
    #[error("UID 已被赋值为 {0}，不可重复赋值")]
    AlreadyAssigned(u32),
    /// `0` 保留为“未分配”哨兵。
    #[error("UID 0 为保留值")]
    Reserved,
}

/// 编解码统一错误类型。
///
/// # 契约说明（What）
/// - `NoCoder`：没有任何编解码器认领该消息类型，属于调用方或配置错误，立即上报、不重试；
/// - `UnknownCoder` / `UnknownTag`：帧头可读但索引或标签无法识别，调用方可据此选择重新同步或断开；
/// - `Truncated`：流在读满所需字节前结束；
/// - `Malformed`：帧可识别但负载不合法；
/// - `Io`：底层流读失败，保留 `ErrorKind` 与文案以便 `Clone` 后分发给多个订阅者。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("没有编解码器认领消息类型 `{type_name}`")]
    NoCoder { type_name: &'static str },
    #[error("编解码器索引 {index} 越界（共 {count} 个）")]
    UnknownCoder { index: u32, count: usize },
    #[error("未知消息标签 {0:#04x}")]
    UnknownTag(u8),
    #[error("流提前结束：还需要 {expected} 字节")]
    Truncated { expected: usize },
    #[error("负载格式非法: {0}")]
    Malformed(String),
    #[error("读取编码流失败 ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },
    #[error(transparent)]
    Uid(#[from] UidError),
}

impl CodecError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            CodecError::NoCoder { .. } => codes::NO_CODER,
            CodecError::UnknownCoder { .. } => codes::UNKNOWN_CODER,
            CodecError::UnknownTag(_) => codes::UNKNOWN_TAG,
            CodecError::Truncated { .. } => codes::TRUNCATED,
            CodecError::Malformed(_) => codes::MALFORMED,
            CodecError::Io { .. } => codes::IO,
            CodecError::Uid(_) => codes::UID,
        }
    }

    /// 帧头无法识别（索引或标签未知），区别于负载损坏与 IO 失败。
    pub fn is_unrecognized(&self) -> bool {
        matches!(
            self,
            CodecError::UnknownCoder { .. } | CodecError::UnknownTag(_)
        )
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        CodecError::Malformed(message.into())
    }

    /// 将读取期间的 IO 错误映射为编解码错误；`UnexpectedEof` 视为截断。
    pub fn from_read(error: io::Error, expected: usize) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof => CodecError::Truncated { expected },
            kind => CodecError::Io {
                kind,
                message: error.to_string(),
            },
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(error: io::Error) -> Self {
        CodecError::Io {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
