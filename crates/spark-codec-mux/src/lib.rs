//! # spark-codec-mux
//!
//! ## 教案意图（Why）
//! - 为数据报传输层提供“类型化消息 ⇄ 字节流”的可插拔编解码契约；
//! - 通过索引头让多个消息族共享同一通道，接收方无需试探即可定位负责的编解码器；
//! - 用拼接流在编码时挂接帧头、在解码时衔接已接收缓冲与活动套接字流，两条路径都不拷贝负载。
//!
//! ## 使用方式（How）
//! - 实现 [`ProtocolCoder`]（或为消息实现 [`WireMessage`] 后使用 [`MessageCoder`]）；
//! - 用 [`MultiProtocolCoder::builder`] 按注册顺序组合多个编解码器，后注册者优先；
//! - 身份消息以 [`identity_message!`] 宏接入 UID 关联约定。
//!
//! ## 契约说明（What）
//! - 线上帧：`[1..=4 字节小端编解码器索引][编解码器负载]`，头宽由 [`header_size_for`] 决定；
//! - 编码失败（无人认领或认领者报错）立即上报，不重试；
//! - 帧头无法识别（[`CodecError::is_unrecognized`]）与负载损坏、IO 失败相互区分。

mod coder;
mod common;
mod concat;
mod error;
mod message;
mod multi;
pub mod wire;

pub use coder::{DecodeSource, EncodedStream, ProtocolCoder};
pub use common::{
    ClockRequest, ClockResponse, CommonCoderConfig, CommonProtocolCoder, ErrorMessage,
    StatusResponse, TextRequest, TextResponse, tags,
};
pub use concat::{ConcatParts, ConcatStream, PrefixedStream};
pub use error::{CodecError, UidError, codes};
pub use message::{ExchangeRole, IdentityMessage, Message, Uid};
pub use multi::{MultiProtocolCoder, MultiProtocolCoderBuilder, header_size_for};
pub use wire::{MessageCoder, TextEncoding, WireMessage, WireOptions};
