//! `frame_contract` 集成测试：从公开 API 验证帧格式、头宽与分派语义。
//!
//! # 测试目标（Why）
//! - 线上帧是两端唯一的约定，任何字节级偏差都会让对端解码失败；
//! - 多路复用编解码器的头宽、分派优先级与错误分类都是调用方可观察的契约。
//!
//! # 结构安排（How）
//! - 字节级场景：单类型子编解码器组合后对 UID=7 的请求逐字节比对；
//! - 头宽边界：256 / 257 个子编解码器；
//! - `proptest` 覆盖通用消息族的帧往返；
//! - 以逐字节、间歇挂起的读取源模拟活动套接字流上的部分读取。

use std::any::{Any, TypeId};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::executor::block_on;
use proptest::prelude::*;
use spark_codec_mux::{
    ClockRequest, ClockResponse, CodecError, CommonCoderConfig, CommonProtocolCoder,
    DecodeSource, EncodedStream, ErrorMessage, Message, MessageCoder, MultiProtocolCoder,
    ProtocolCoder, StatusResponse, TextEncoding, TextRequest, TextResponse, Uid, codes,
};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

fn encode_to_vec(coder: &dyn ProtocolCoder, message: &dyn Message) -> Vec<u8> {
    let mut stream = coder
        .encode(message)
        .expect("编码不应失败")
        .expect("应有编解码器认领");
    let mut out = Vec::new();
    block_on(stream.read_to_end(&mut out)).expect("读取编码流");
    out
}

fn decode_from(coder: &dyn ProtocolCoder, bytes: Vec<u8>) -> Result<Box<dyn Message>, CodecError> {
    let mut source = Cursor::new(bytes);
    block_on(coder.decode(&mut source))
}

fn request_response_mux() -> MultiProtocolCoder {
    MultiProtocolCoder::builder()
        .register(MessageCoder::<TextRequest>::new())
        .register(MessageCoder::<TextResponse>::new())
        .build()
}

/// 每次只交付 1 字节，并在每隔一次调用时返回 `Pending`，模拟数据陆续到达的套接字流。
struct Trickle {
    bytes: Vec<u8>,
    pos: usize,
    stall: bool,
}

impl Trickle {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            pos: 0,
            stall: true,
        }
    }
}

impl AsyncRead for Trickle {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.stall {
            self.stall = false;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.stall = true;
        if let Some(byte) = self.bytes.get(self.pos).copied() {
            buf.put_slice(&[byte]);
            self.pos += 1;
        }
        Poll::Ready(Ok(()))
    }
}

#[test]
fn request_with_uid_seven_has_byte_exact_frame() {
    let mux = request_response_mux();
    let mut request = TextRequest::new("ok");
    request.uid = Uid::assigned(7);

    let bytes = encode_to_vec(&mux, &request);
    assert_eq!(
        bytes,
        vec![0x00, 7, 0, 0, 0, 4, 0, 0, 0, b'o', 0, b'k', 0],
        "索引头 0x00 后紧跟负载，UID 以 07 00 00 00 开头"
    );

    let decoded = decode_from(&mux, bytes).expect("解码");
    let decoded = decoded.downcast_ref::<TextRequest>().expect("类型应为请求");
    assert_eq!(decoded.uid.get(), Some(7));
    assert_eq!(decoded, &request);
}

#[test]
fn response_uses_second_index() {
    let mux = request_response_mux();
    let response = TextResponse::reply_to(Some(7), "");
    let bytes = encode_to_vec(&mux, &response);
    assert_eq!(bytes, vec![0x01, 7, 0, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn header_width_boundary_at_256_and_257_coders() {
    let coders = |n: usize| -> Vec<Arc<dyn ProtocolCoder>> {
        (0..n)
            .map(|_| Arc::new(MessageCoder::<ClockRequest>::new()) as Arc<dyn ProtocolCoder>)
            .collect()
    };
    let request = ClockRequest {
        uid: Uid::assigned(1),
    };

    let narrow = MultiProtocolCoder::new(coders(256));
    assert_eq!(narrow.header_size(), 1);
    let bytes = encode_to_vec(&narrow, &request);
    assert_eq!(&bytes[..1], &[0xff], "后注册者优先，索引 255 仍可用 1 字节表示");

    let wide = MultiProtocolCoder::new(coders(257));
    assert_eq!(wide.header_size(), 2);
    let bytes = encode_to_vec(&wide, &request);
    assert_eq!(&bytes[..2], &[0x00, 0x01]);
    let decoded = decode_from(&wide, bytes).expect("解码");
    assert_eq!(decoded.downcast_ref::<ClockRequest>(), Some(&request));
}

#[test]
fn partial_reads_are_resumed_not_failed() {
    let mux = MultiProtocolCoder::new(
        std::iter::repeat_with(|| {
            Arc::new(CommonProtocolCoder::default()) as Arc<dyn ProtocolCoder>
        })
        .take(300)
        .collect(),
    );
    let message = ErrorMessage::reply_to(Some(11), "partial");
    let bytes = encode_to_vec(&mux, &message);
    assert_eq!(mux.header_size(), 2);

    let mut source = Trickle::new(bytes);
    let decoded = block_on(mux.decode(&mut source)).expect("部分读取应被续读");
    assert_eq!(decoded.downcast_ref::<ErrorMessage>(), Some(&message));
}

#[test]
fn unrecognized_framing_is_distinct_from_truncation() {
    let mux = MultiProtocolCoder::builder()
        .register(CommonProtocolCoder::default())
        .build();

    let unknown_index = decode_from(&mux, vec![0x05, 0x01]).expect_err("索引越界");
    assert_eq!(
        unknown_index,
        CodecError::UnknownCoder { index: 5, count: 1 }
    );
    assert!(unknown_index.is_unrecognized());

    let unknown_tag = decode_from(&mux, vec![0x00, 0x42]).expect_err("未知标签");
    assert_eq!(unknown_tag, CodecError::UnknownTag(0x42));
    assert_eq!(unknown_tag.code(), codes::UNKNOWN_TAG);
    assert!(unknown_tag.is_unrecognized());

    let truncated = decode_from(&mux, vec![0x00, 0x01, 7, 0]).expect_err("截断");
    assert!(matches!(truncated, CodecError::Truncated { .. }));
    assert!(!truncated.is_unrecognized());

    let empty = decode_from(&mux, Vec::new()).expect_err("空流");
    assert_eq!(empty, CodecError::Truncated { expected: 1 });
}

#[test]
fn oversized_and_negative_text_lengths_are_malformed() {
    let config = CommonCoderConfig::default().with_max_text_bytes(8);
    let coder = CommonProtocolCoder::new(config);

    let mut oversized = vec![1u8, 1, 0, 0, 0];
    oversized.extend_from_slice(&64i32.to_le_bytes());
    assert!(matches!(
        decode_from(&coder, oversized),
        Err(CodecError::Malformed(_))
    ));

    let mut negative = vec![1u8, 1, 0, 0, 0];
    negative.extend_from_slice(&(-1i32).to_le_bytes());
    assert!(matches!(
        decode_from(&coder, negative),
        Err(CodecError::Malformed(_))
    ));

    let too_long = TextRequest::new("far beyond eight bytes");
    assert!(matches!(
        coder.encode(&too_long),
        Err(CodecError::Malformed(_))
    ));
}

#[derive(Debug, PartialEq)]
struct Ping(u8);

impl Message for Ping {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 不声明固定类型、接受任何 `Ping` 的编解码器，只参与试探编码。
struct PingCoder;

#[async_trait]
impl ProtocolCoder for PingCoder {
    fn name(&self) -> &str {
        "ping"
    }

    fn encode(&self, message: &dyn Message) -> Result<Option<EncodedStream>, CodecError> {
        Ok(message
            .downcast_ref::<Ping>()
            .map(|ping| Box::new(Cursor::new(vec![ping.0])) as EncodedStream))
    }

    async fn decode(&self, source: &mut DecodeSource<'_>) -> Result<Box<dyn Message>, CodecError> {
        let value = source
            .read_u8()
            .await
            .map_err(|err| CodecError::from_read(err, 1))?;
        Ok(Box::new(Ping(value)))
    }
}

/// 认领 `Ping` 但总是失败的编解码器。
struct BrokenCoder;

#[async_trait]
impl ProtocolCoder for BrokenCoder {
    fn name(&self) -> &str {
        "broken"
    }

    fn encode(&self, _message: &dyn Message) -> Result<Option<EncodedStream>, CodecError> {
        Err(CodecError::malformed("always fails"))
    }

    async fn decode(&self, _source: &mut DecodeSource<'_>) -> Result<Box<dyn Message>, CodecError> {
        Err(CodecError::malformed("always fails"))
    }
}

#[test]
fn trial_encode_runs_last_registered_first() {
    let mux = MultiProtocolCoder::builder()
        .register(PingCoder)
        .register(CommonProtocolCoder::default())
        .register(PingCoder)
        .build();
    assert_eq!(mux.coder_for(TypeId::of::<Ping>()), None);
    assert_eq!(encode_to_vec(&mux, &Ping(9)), vec![2, 9]);
    assert_eq!(
        mux.coder_for(TypeId::of::<TextRequest>()),
        Some(1),
        "查找表命中的类型不走试探"
    );
}

#[test]
fn trial_errors_fall_through_to_earlier_coders() {
    let mux = MultiProtocolCoder::builder()
        .register(PingCoder)
        .register(BrokenCoder)
        .build();
    assert_eq!(encode_to_vec(&mux, &Ping(3)), vec![0, 3]);
}

#[test]
fn unclaimed_message_is_reported_immediately() {
    let mux = MultiProtocolCoder::builder()
        .register(CommonProtocolCoder::default())
        .build();
    match mux.encode(&Ping(1)) {
        Err(CodecError::NoCoder { type_name }) => assert!(type_name.ends_with("Ping")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("no coder should claim Ping"),
    }
}

fn uid_strategy() -> impl Strategy<Value = Uid> {
    prop_oneof![Just(Uid::unassigned()), (1u32..=i32::MAX as u32).prop_map(Uid::assigned)]
}

fn message_strategy() -> impl Strategy<Value = Box<dyn Message>> {
    let text = "\\PC{0,48}";
    prop_oneof![
        (uid_strategy(), text)
            .prop_map(|(uid, text)| Box::new(TextRequest { uid, text }) as Box<dyn Message>),
        (uid_strategy(), text)
            .prop_map(|(uid, text)| Box::new(TextResponse { uid, text }) as Box<dyn Message>),
        uid_strategy().prop_map(|uid| Box::new(ClockRequest { uid }) as Box<dyn Message>),
        (uid_strategy(), any::<i64>()).prop_map(|(uid, timestamp)| {
            Box::new(ClockResponse { uid, timestamp }) as Box<dyn Message>
        }),
        (uid_strategy(), any::<bool>())
            .prop_map(|(uid, success)| Box::new(StatusResponse { uid, success }) as Box<dyn Message>),
        (uid_strategy(), text)
            .prop_map(|(uid, text)| Box::new(ErrorMessage { uid, text }) as Box<dyn Message>),
    ]
}

/// 逐字段比较两条通用消息族消息。
fn same_message(left: &dyn Message, right: &dyn Message) -> bool {
    fn eq<M: Message + PartialEq>(left: &dyn Message, right: &dyn Message) -> Option<bool> {
        Some(left.downcast_ref::<M>()? == right.downcast_ref::<M>()?)
    }
    eq::<TextRequest>(left, right)
        .or_else(|| eq::<TextResponse>(left, right))
        .or_else(|| eq::<ClockRequest>(left, right))
        .or_else(|| eq::<ClockResponse>(left, right))
        .or_else(|| eq::<StatusResponse>(left, right))
        .or_else(|| eq::<ErrorMessage>(left, right))
        .unwrap_or(false)
}

proptest! {
    #[test]
    fn common_family_round_trips_through_mux(
        message in message_strategy(),
        utf8 in any::<bool>(),
    ) {
        let encoding = if utf8 { TextEncoding::Utf8 } else { TextEncoding::Utf16Le };
        let config = CommonCoderConfig::default().with_text_encoding(encoding);
        let mux = MultiProtocolCoder::builder()
            .register(CommonProtocolCoder::new(config))
            .build();

        let bytes = encode_to_vec(&mux, message.as_ref());
        prop_assert_eq!(bytes[0], 0);
        let decoded = decode_from(&mux, bytes).expect("往返解码");
        prop_assert!(same_message(message.as_ref(), decoded.as_ref()), "{:?} != {:?}", message, decoded);
    }
}
