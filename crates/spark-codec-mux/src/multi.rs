use core::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::coder::{DecodeSource, EncodedStream, ProtocolCoder};
use crate::concat::ConcatStream;
use crate::error::CodecError;
use crate::message::Message;

/// 索引 `coder_count` 个编解码器所需的最小头部宽度（1..=4 字节）。
///
/// 0 或 1..=256 个编解码器使用 1 字节；257..=65536 使用 2 字节；依此类推，最多 4 字节。
pub const fn header_size_for(coder_count: usize) -> usize {
    let count = coder_count as u64;
    if count <= 1 << 8 {
        1
    } else if count <= 1 << 16 {
        2
    } else if count <= 1 << 24 {
        3
    } else {
        4
    }
}

/// 在多个编解码器之上叠加小端索引头的多路复用编解码器。
///
/// # 设计初衷（Why）
/// - 同一通道需要承载多个消息族；索引头让接收方无需试探即可定位负责的编解码器；
/// - 头部宽度按编解码器数量取最小值，常见场景只占 1 字节。
///
/// # 核心机制（How）
/// - 构造期遍历子编解码器的 `message_types()` 建立 `TypeId → 索引` 查找表，后注册者覆盖先注册者；
/// - 编码：查表命中直接委派；未命中则按注册逆序试探编码，首个返回 `Some` 的结果被采用，
///   试探中的错误仅记录并继续尝试下一个；
/// - 编码结果以 [`ConcatStream`] 把索引头挂到负载流前面，不拷贝负载；
/// - 解码：`read_exact` 读满头部（容忍来自活动套接字流的部分读取），按小端解释为索引后委派。
///
/// # 契约说明（What）
/// - 查表命中的编解码器返回 `Err` 时直接上报，不再试探其他编解码器；
/// - 所有编解码器都不认领时返回 [`CodecError::NoCoder`]；
/// - 索引越界返回 [`CodecError::UnknownCoder`]，与负载损坏、IO 失败区分。
pub struct MultiProtocolCoder {
    coders: Vec<Arc<dyn ProtocolCoder>>,
    lookup: HashMap<TypeId, usize>,
    header_size: usize,
}

impl MultiProtocolCoder {
    pub fn new(coders: Vec<Arc<dyn ProtocolCoder>>) -> Self {
        let mut lookup = HashMap::new();
        for (index, coder) in coders.iter().enumerate() {
            for type_id in coder.message_types() {
                lookup.insert(type_id, index);
            }
        }
        let header_size = header_size_for(coders.len());
        Self {
            coders,
            lookup,
            header_size,
        }
    }

    pub fn builder() -> MultiProtocolCoderBuilder {
        MultiProtocolCoderBuilder::default()
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    pub fn coders(&self) -> &[Arc<dyn ProtocolCoder>] {
        &self.coders
    }

    /// 查找表中负责该类型的编解码器索引。
    pub fn coder_for(&self, type_id: TypeId) -> Option<usize> {
        self.lookup.get(&type_id).copied()
    }

    fn header_bytes(&self, index: usize) -> Vec<u8> {
        let bytes = (index as u32).to_le_bytes();
        bytes[..self.header_size].to_vec()
    }

    fn frame(&self, index: usize, payload: EncodedStream) -> EncodedStream {
        Box::new(ConcatStream::with_prefix(self.header_bytes(index), payload))
    }
}

impl core::fmt::Debug for MultiProtocolCoder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MultiProtocolCoder")
            .field(
                "coders",
                &self.coders.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("header_size", &self.header_size)
            .finish()
    }
}

#[async_trait]
impl ProtocolCoder for MultiProtocolCoder {
    fn name(&self) -> &str {
        "multi"
    }

    fn message_types(&self) -> Vec<TypeId> {
        self.lookup.keys().copied().collect()
    }

    fn encode(&self, message: &dyn Message) -> Result<Option<EncodedStream>, CodecError> {
        let type_id = message.as_any().type_id();
        if let Some(index) = self.coder_for(type_id) {
            if let Some(payload) = self.coders[index].encode(message)? {
                return Ok(Some(self.frame(index, payload)));
            }
        }

        for (index, coder) in self.coders.iter().enumerate().rev() {
            match coder.encode(message) {
                Ok(Some(payload)) => return Ok(Some(self.frame(index, payload))),
                Ok(None) => {
                    tracing::trace!(coder = coder.name(), index, "coder declined message");
                }
                Err(err) => {
                    tracing::trace!(
                        coder = coder.name(),
                        index,
                        code = err.code(),
                        error = %err,
                        "trial encode failed"
                    );
                }
            }
        }

        Err(CodecError::NoCoder {
            type_name: message.type_name(),
        })
    }

    async fn decode(&self, source: &mut DecodeSource<'_>) -> Result<Box<dyn Message>, CodecError> {
        let mut header = [0u8; 4];
        source
            .read_exact(&mut header[..self.header_size])
            .await
            .map_err(|err| CodecError::from_read(err, self.header_size))?;
        let index = u32::from_le_bytes(header);
        let coder = self
            .coders
            .get(index as usize)
            .ok_or(CodecError::UnknownCoder {
                index,
                count: self.coders.len(),
            })?;
        coder.decode(source).await
    }
}

/// 按注册顺序收集子编解码器。
#[derive(Default)]
pub struct MultiProtocolCoderBuilder {
    coders: Vec<Arc<dyn ProtocolCoder>>,
}

impl MultiProtocolCoderBuilder {
    pub fn register<C: ProtocolCoder>(mut self, coder: C) -> Self {
        self.coders.push(Arc::new(coder));
        self
    }

    pub fn register_shared(mut self, coder: Arc<dyn ProtocolCoder>) -> Self {
        self.coders.push(coder);
        self
    }

    pub fn build(self) -> MultiProtocolCoder {
        MultiProtocolCoder::new(self.coders)
    }
}
