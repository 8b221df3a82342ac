use core::any::TypeId;
use core::marker::PhantomData;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::coder::{DecodeSource, EncodedStream, ProtocolCoder};
use crate::error::CodecError;
use crate::message::{Message, Uid};

/// 文本字段的线上编码。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    /// UTF-16 小端，无 BOM。
    #[default]
    Utf16Le,
    Utf8,
}

/// 负载读写所需的编码参数。
///
/// `max_text_bytes` 限制单个文本字段的声明长度，防止恶意对端用超长长度前缀诱导大块分配。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireOptions {
    pub text_encoding: TextEncoding,
    pub max_text_bytes: usize,
}

impl Default for WireOptions {
    fn default() -> Self {
        Self {
            text_encoding: TextEncoding::Utf16Le,
            max_text_bytes: 1024 * 1024,
        }
    }
}

impl WireOptions {
    pub fn with_text_encoding(mut self, encoding: TextEncoding) -> Self {
        self.text_encoding = encoding;
        self
    }

    pub fn with_max_text_bytes(mut self, max: usize) -> Self {
        self.max_text_bytes = max;
        self
    }
}

/// 拥有固定线上负载格式的消息。
///
/// # 契约说明（What）
/// - `write_payload`：把负载追加到 `out`，不包含任何外层帧头或标签；
/// - `read_payload`：从负载起点读取并构造消息，读取长度必须与 `write_payload` 写出的一致；
/// - 字段均为小端：UID 为 `i32`，文本为 `i32` 字节长度 + 文本字节，布尔为 1 字节，时间戳为 `i64`。
#[async_trait]
pub trait WireMessage: Message + Sized {
    fn write_payload(&self, out: &mut BytesMut, options: &WireOptions) -> Result<(), CodecError>;

    async fn read_payload(
        source: &mut DecodeSource<'_>,
        options: &WireOptions,
    ) -> Result<Self, CodecError>;
}

pub fn put_uid(out: &mut BytesMut, uid: Uid) {
    out.put_i32_le(uid.to_wire());
}

pub fn put_text(out: &mut BytesMut, text: &str, options: &WireOptions) -> Result<(), CodecError> {
    match options.text_encoding {
        TextEncoding::Utf8 => {
            put_len(out, text.len(), options)?;
            out.put_slice(text.as_bytes());
        }
        TextEncoding::Utf16Le => {
            let units: Vec<u16> = text.encode_utf16().collect();
            put_len(out, units.len() * 2, options)?;
            for unit in units {
                out.put_u16_le(unit);
            }
        }
    }
    Ok(())
}

fn put_len(out: &mut BytesMut, len: usize, options: &WireOptions) -> Result<(), CodecError> {
    if len > options.max_text_bytes || len > i32::MAX as usize {
        return Err(CodecError::malformed(format!(
            "text of {len} bytes exceeds limit {}",
            options.max_text_bytes
        )));
    }
    out.put_i32_le(len as i32);
    Ok(())
}

pub async fn read_uid(source: &mut DecodeSource<'_>) -> Result<Uid, CodecError> {
    let raw = source
        .read_i32_le()
        .await
        .map_err(|err| CodecError::from_read(err, 4))?;
    Ok(Uid::from_wire(raw))
}

pub async fn read_bool(source: &mut DecodeSource<'_>) -> Result<bool, CodecError> {
    let raw = source
        .read_u8()
        .await
        .map_err(|err| CodecError::from_read(err, 1))?;
    match raw {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CodecError::malformed(format!("invalid flag byte {other}"))),
    }
}

pub async fn read_i64(source: &mut DecodeSource<'_>) -> Result<i64, CodecError> {
    source
        .read_i64_le()
        .await
        .map_err(|err| CodecError::from_read(err, 8))
}

pub async fn read_text(
    source: &mut DecodeSource<'_>,
    options: &WireOptions,
) -> Result<String, CodecError> {
    let len = source
        .read_i32_le()
        .await
        .map_err(|err| CodecError::from_read(err, 4))?;
    if len < 0 {
        return Err(CodecError::malformed(format!("negative text length {len}")));
    }
    let len = len as usize;
    if len > options.max_text_bytes {
        return Err(CodecError::malformed(format!(
            "text length {len} exceeds limit {}",
            options.max_text_bytes
        )));
    }
    let mut raw = vec![0u8; len];
    source
        .read_exact(&mut raw)
        .await
        .map_err(|err| CodecError::from_read(err, len))?;
    match options.text_encoding {
        TextEncoding::Utf8 => String::from_utf8(raw)
            .map_err(|err| CodecError::malformed(format!("text is not valid UTF-8: {err}"))),
        TextEncoding::Utf16Le => {
            if len % 2 != 0 {
                return Err(CodecError::malformed("odd UTF-16 byte length"));
            }
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units)
                .map_err(|err| CodecError::malformed(format!("text is not valid UTF-16: {err}")))
        }
    }
}

/// 只负责单一消息类型的编解码器，负载即该消息的线上格式，不附加标签。
pub struct MessageCoder<M> {
    options: WireOptions,
    name: &'static str,
    _marker: PhantomData<fn() -> M>,
}

impl<M: WireMessage> MessageCoder<M> {
    pub fn new() -> Self {
        Self::with_options(WireOptions::default())
    }

    pub fn with_options(options: WireOptions) -> Self {
        Self {
            options,
            name: core::any::type_name::<M>(),
            _marker: PhantomData,
        }
    }
}

impl<M: WireMessage> Default for MessageCoder<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M: WireMessage> ProtocolCoder for MessageCoder<M> {
    fn name(&self) -> &str {
        self.name
    }

    fn message_types(&self) -> Vec<TypeId> {
        vec![TypeId::of::<M>()]
    }

    fn encode(&self, message: &dyn Message) -> Result<Option<EncodedStream>, CodecError> {
        let Some(message) = message.downcast_ref::<M>() else {
            return Ok(None);
        };
        let mut out = BytesMut::new();
        message.write_payload(&mut out, &self.options)?;
        Ok(Some(Box::new(Cursor::new(out.freeze()))))
    }

    async fn decode(&self, source: &mut DecodeSource<'_>) -> Result<Box<dyn Message>, CodecError> {
        let message = M::read_payload(source, &self.options).await?;
        Ok(Box::new(message))
    }
}
