//! 通用协议消息族与其单字节标签编解码器。
//!
//! 线上格式：`[u8 标签][负载]`，负载布局见各消息的 [`WireMessage`] 实现。

use core::any::TypeId;
use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::AsyncReadExt;

use crate::coder::{DecodeSource, EncodedStream, ProtocolCoder};
use crate::error::CodecError;
use crate::identity_message;
use crate::message::{ExchangeRole, Message, Uid};
use crate::wire::{self, WireMessage, WireOptions};

/// 通用编解码器配置。
pub type CommonCoderConfig = WireOptions;

/// 消息标签。
pub mod tags {
    pub const TEXT_REQUEST: u8 = 1;
    pub const TEXT_RESPONSE: u8 = 2;
    pub const CLOCK_REQUEST: u8 = 3;
    pub const CLOCK_RESPONSE: u8 = 4;
    pub const STATUS_RESPONSE: u8 = 5;
    pub const ERROR_MESSAGE: u8 = 255;
}

/// 携带文本的请求。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextRequest {
    pub uid: Uid,
    pub text: String,
}

impl TextRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            uid: Uid::unassigned(),
            text: text.into(),
        }
    }
}

/// 对 [`TextRequest`] 的文本应答。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextResponse {
    pub uid: Uid,
    pub text: String,
}

impl TextResponse {
    pub fn reply_to(uid: Option<u32>, text: impl Into<String>) -> Self {
        Self {
            uid: uid.map(Uid::assigned).unwrap_or_default(),
            text: text.into(),
        }
    }
}

/// 请求对端时钟。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClockRequest {
    pub uid: Uid,
}

/// 对端时钟应答，`timestamp` 为 Unix 纪元以来的毫秒数。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClockResponse {
    pub uid: Uid,
    pub timestamp: i64,
}

impl ClockResponse {
    pub fn now(uid: Option<u32>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default();
        Self {
            uid: uid.map(Uid::assigned).unwrap_or_default(),
            timestamp,
        }
    }
}

/// 布尔结果应答。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusResponse {
    pub uid: Uid,
    pub success: bool,
}

impl StatusResponse {
    pub fn reply_to(uid: Option<u32>, success: bool) -> Self {
        Self {
            uid: uid.map(Uid::assigned).unwrap_or_default(),
            success,
        }
    }
}

/// 对端处理失败时的错误应答。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorMessage {
    pub uid: Uid,
    pub text: String,
}

impl ErrorMessage {
    pub fn reply_to(uid: Option<u32>, text: impl Into<String>) -> Self {
        Self {
            uid: uid.map(Uid::assigned).unwrap_or_default(),
            text: text.into(),
        }
    }
}

identity_message!(TextRequest, ExchangeRole::Request);
identity_message!(TextResponse, ExchangeRole::Response);
identity_message!(ClockRequest, ExchangeRole::Request);
identity_message!(ClockResponse, ExchangeRole::Response);
identity_message!(StatusResponse, ExchangeRole::Response);
identity_message!(ErrorMessage, ExchangeRole::Response);

#[async_trait]
impl WireMessage for TextRequest {
    fn write_payload(&self, out: &mut BytesMut, options: &WireOptions) -> Result<(), CodecError> {
        wire::put_uid(out, self.uid);
        wire::put_text(out, &self.text, options)
    }

    async fn read_payload(
        source: &mut DecodeSource<'_>,
        options: &WireOptions,
    ) -> Result<Self, CodecError> {
        let uid = wire::read_uid(source).await?;
        let text = wire::read_text(source, options).await?;
        Ok(Self { uid, text })
    }
}

#[async_trait]
impl WireMessage for TextResponse {
    fn write_payload(&self, out: &mut BytesMut, options: &WireOptions) -> Result<(), CodecError> {
        wire::put_uid(out, self.uid);
        wire::put_text(out, &self.text, options)
    }

    async fn read_payload(
        source: &mut DecodeSource<'_>,
        options: &WireOptions,
    ) -> Result<Self, CodecError> {
        let uid = wire::read_uid(source).await?;
        let text = wire::read_text(source, options).await?;
        Ok(Self { uid, text })
    }
}

#[async_trait]
impl WireMessage for ClockRequest {
    fn write_payload(&self, out: &mut BytesMut, _options: &WireOptions) -> Result<(), CodecError> {
        wire::put_uid(out, self.uid);
        Ok(())
    }

    async fn read_payload(
        source: &mut DecodeSource<'_>,
        _options: &WireOptions,
    ) -> Result<Self, CodecError> {
        let uid = wire::read_uid(source).await?;
        Ok(Self { uid })
    }
}

#[async_trait]
impl WireMessage for ClockResponse {
    fn write_payload(&self, out: &mut BytesMut, _options: &WireOptions) -> Result<(), CodecError> {
        wire::put_uid(out, self.uid);
        out.put_i64_le(self.timestamp);
        Ok(())
    }

    async fn read_payload(
        source: &mut DecodeSource<'_>,
        _options: &WireOptions,
    ) -> Result<Self, CodecError> {
        let uid = wire::read_uid(source).await?;
        let timestamp = wire::read_i64(source).await?;
        Ok(Self { uid, timestamp })
    }
}

#[async_trait]
impl WireMessage for StatusResponse {
    fn write_payload(&self, out: &mut BytesMut, _options: &WireOptions) -> Result<(), CodecError> {
        wire::put_uid(out, self.uid);
        out.put_u8(u8::from(self.success));
        Ok(())
    }

    async fn read_payload(
        source: &mut DecodeSource<'_>,
        _options: &WireOptions,
    ) -> Result<Self, CodecError> {
        let uid = wire::read_uid(source).await?;
        let success = wire::read_bool(source).await?;
        Ok(Self { uid, success })
    }
}

#[async_trait]
impl WireMessage for ErrorMessage {
    fn write_payload(&self, out: &mut BytesMut, options: &WireOptions) -> Result<(), CodecError> {
        wire::put_uid(out, self.uid);
        wire::put_text(out, &self.text, options)
    }

    async fn read_payload(
        source: &mut DecodeSource<'_>,
        options: &WireOptions,
    ) -> Result<Self, CodecError> {
        let uid = wire::read_uid(source).await?;
        let text = wire::read_text(source, options).await?;
        Ok(Self { uid, text })
    }
}

/// 通用消息族的编解码器：一个单字节标签区分消息类型。
///
/// 可独立使用（通道上只有这一个消息族），也可作为 [`MultiProtocolCoder`](crate::MultiProtocolCoder) 的子编解码器。
#[derive(Clone, Debug, Default)]
pub struct CommonProtocolCoder {
    config: CommonCoderConfig,
}

impl CommonProtocolCoder {
    pub fn new(config: CommonCoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommonCoderConfig {
        &self.config
    }

    /// 写出标签与负载；不属于本消息族的类型返回 `None`。
    fn encode_tagged(&self, message: &dyn Message) -> Result<Option<BytesMut>, CodecError> {
        fn tagged<M: WireMessage>(
            tag: u8,
            message: &M,
            options: &WireOptions,
        ) -> Result<Option<BytesMut>, CodecError> {
            let mut out = BytesMut::with_capacity(16);
            out.put_u8(tag);
            message.write_payload(&mut out, options)?;
            Ok(Some(out))
        }

        let options = &self.config;
        if let Some(m) = message.downcast_ref::<TextRequest>() {
            tagged(tags::TEXT_REQUEST, m, options)
        } else if let Some(m) = message.downcast_ref::<TextResponse>() {
            tagged(tags::TEXT_RESPONSE, m, options)
        } else if let Some(m) = message.downcast_ref::<ClockRequest>() {
            tagged(tags::CLOCK_REQUEST, m, options)
        } else if let Some(m) = message.downcast_ref::<ClockResponse>() {
            tagged(tags::CLOCK_RESPONSE, m, options)
        } else if let Some(m) = message.downcast_ref::<StatusResponse>() {
            tagged(tags::STATUS_RESPONSE, m, options)
        } else if let Some(m) = message.downcast_ref::<ErrorMessage>() {
            tagged(tags::ERROR_MESSAGE, m, options)
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl ProtocolCoder for CommonProtocolCoder {
    fn name(&self) -> &str {
        "common"
    }

    fn message_types(&self) -> Vec<TypeId> {
        vec![
            TypeId::of::<TextRequest>(),
            TypeId::of::<TextResponse>(),
            TypeId::of::<ClockRequest>(),
            TypeId::of::<ClockResponse>(),
            TypeId::of::<StatusResponse>(),
            TypeId::of::<ErrorMessage>(),
        ]
    }

    fn encode(&self, message: &dyn Message) -> Result<Option<EncodedStream>, CodecError> {
        Ok(self
            .encode_tagged(message)?
            .map(|out| Box::new(Cursor::new(out.freeze())) as EncodedStream))
    }

    async fn decode(&self, source: &mut DecodeSource<'_>) -> Result<Box<dyn Message>, CodecError> {
        let tag = source
            .read_u8()
            .await
            .map_err(|err| CodecError::from_read(err, 1))?;
        let options = &self.config;
        let message: Box<dyn Message> = match tag {
            tags::TEXT_REQUEST => Box::new(TextRequest::read_payload(source, options).await?),
            tags::TEXT_RESPONSE => Box::new(TextResponse::read_payload(source, options).await?),
            tags::CLOCK_REQUEST => Box::new(ClockRequest::read_payload(source, options).await?),
            tags::CLOCK_RESPONSE => Box::new(ClockResponse::read_payload(source, options).await?),
            tags::STATUS_RESPONSE => {
                Box::new(StatusResponse::read_payload(source, options).await?)
            }
            tags::ERROR_MESSAGE => Box::new(ErrorMessage::read_payload(source, options).await?),
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::TextEncoding;

    fn encoded(coder: &CommonProtocolCoder, message: &dyn Message) -> Vec<u8> {
        coder
            .encode_tagged(message)
            .expect("encode")
            .expect("claimed")
            .to_vec()
    }

    #[test]
    fn text_request_layout_is_byte_exact() {
        let coder = CommonProtocolCoder::default();
        let mut request = TextRequest::new("hi");
        request.uid.assign(7).expect("assign");
        assert_eq!(
            encoded(&coder, &request),
            vec![1, 7, 0, 0, 0, 4, 0, 0, 0, b'h', 0, b'i', 0]
        );
    }

    #[test]
    fn utf8_mode_counts_bytes() {
        let coder = CommonProtocolCoder::new(
            CommonCoderConfig::default().with_text_encoding(TextEncoding::Utf8),
        );
        let message = ErrorMessage::reply_to(Some(2), "é");
        assert_eq!(
            encoded(&coder, &message),
            vec![255, 2, 0, 0, 0, 2, 0, 0, 0, 0xc3, 0xa9]
        );
    }

    #[test]
    fn status_and_clock_layouts() {
        let coder = CommonProtocolCoder::default();
        assert_eq!(
            encoded(&coder, &StatusResponse::reply_to(Some(3), true)),
            vec![5, 3, 0, 0, 0, 1]
        );
        let clock = ClockResponse {
            uid: Uid::assigned(1),
            timestamp: 0x0102,
        };
        assert_eq!(
            encoded(&coder, &clock),
            vec![4, 1, 0, 0, 0, 0x02, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn foreign_messages_are_declined() {
        #[derive(Debug)]
        struct Foreign;
        impl Message for Foreign {
            fn as_any(&self) -> &dyn core::any::Any {
                self
            }
        }

        let coder = CommonProtocolCoder::default();
        assert!(coder.encode(&Foreign).expect("encode").is_none());
    }

    #[test]
    fn roles_follow_exchange_direction() {
        assert_eq!(
            TextRequest::default().identity().map(|id| id.role()),
            Some(ExchangeRole::Request)
        );
        assert_eq!(
            ErrorMessage::default().identity().map(|id| id.role()),
            Some(ExchangeRole::Response)
        );
    }
}
