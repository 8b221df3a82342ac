use core::any::TypeId;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::CodecError;
use crate::message::Message;

/// 编码结果：一条可异步读取的字节流。
pub type EncodedStream = Box<dyn AsyncRead + Send + Unpin>;

/// 解码输入：位于本编解码器负载起点的字节流（外层帧头已被剥离）。
pub type DecodeSource<'a> = dyn AsyncRead + Send + Unpin + 'a;

/// `ProtocolCoder` 描述一个消息族的编码 / 解码契约。
///
/// # 设计初衷（Why）
/// - 每个消息族由一个编解码器负责，多路复用编解码器在其上叠加索引头，使多个消息族共享同一通道；
/// - 编码返回流而非定长缓冲，便于在外层用 [`ConcatStream`](crate::ConcatStream) 零拷贝地叠加帧头。
///
/// # 契约说明（What）
/// - `encode`：`Ok(None)` 表示“本编解码器不处理该消息类型”，用于按序试探分派；
///   `Err` 表示认领了消息但编码失败；
/// - `decode`：假定流恰好从本编解码器的负载起点开始；负载可能跨越多块接收缓冲，
///   实现必须容忍部分读取（统一使用 `read_exact` 类接口）；
/// - `message_types`：声明固定处理的消息类型，供构造期建立查找表；
///   返回空表示“形态不固定”，只参与试探编码。
#[async_trait]
pub trait ProtocolCoder: Send + Sync + 'static {
    /// 名称，仅用于日志。
    fn name(&self) -> &str;

    fn message_types(&self) -> Vec<TypeId> {
        Vec::new()
    }

    fn encode(&self, message: &dyn Message) -> Result<Option<EncodedStream>, CodecError>;

    async fn decode(&self, source: &mut DecodeSource<'_>) -> Result<Box<dyn Message>, CodecError>;
}
