//! 发送路径契约：闸门互斥、超时公平、销毁与超时可区分、编码失败不写出字节。
//!
//! # 结构安排（How）
//! - 借助 `support::MemorySocket` 记录每个数据报的进入/完成时刻与内容；
//! - 需要占住闸门的场景通过 `block_sends` 让首个发送一直停在写入阶段。

mod support;

use std::any::Any;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use spark_codec_mux::{
    CodecError, DecodeSource, EncodedStream, Message, ProtocolCoder, TextRequest,
};
use spark_transport_datagram::{DatagramTransport, SendError, TransportConfig, codes};
use support::{MemorySocket, SentDatagram, addr, init_tracing, utf8_coder};

const LONG: Duration = Duration::from_secs(5);

fn transport(socket: &MemorySocket, frame_capacity: usize) -> DatagramTransport<MemorySocket> {
    DatagramTransport::new(
        socket.clone(),
        utf8_coder(),
        TransportConfig::default().with_frame_capacity(frame_capacity),
    )
    .expect("合法配置")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "条件未在 2 秒内满足");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn owner(datagram: &SentDatagram) -> u8 {
    if datagram.bytes.contains(&b'x') {
        b'x'
    } else if datagram.bytes.contains(&b'y') {
        b'y'
    } else {
        panic!("unexpected datagram {:?}", datagram.bytes)
    }
}

/// 两个并发发送、许可数为 1：每帧跨 5 个数据报，线上不得交错，帧的在途区间不得重叠。
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_never_overlap_in_flight() {
    init_tracing();
    let socket = MemorySocket::new(addr(9000));
    let transport = transport(&socket, 16);
    let target = addr(9001);

    let spawn_send = |fill: char| {
        let transport = transport.clone();
        tokio::spawn(async move {
            let message = TextRequest::new(fill.to_string().repeat(60));
            transport.send_to(target, &message, LONG).await
        })
    };
    let (x, y) = tokio::join!(spawn_send('x'), spawn_send('y'));
    assert_eq!(x.expect("任务").expect("发送 x"), 69);
    assert_eq!(y.expect("任务").expect("发送 y"), 69);

    let sent = socket.sent();
    assert_eq!(sent.len(), 10, "69 字节的帧按 16 字节分成 5 个数据报");
    assert!(sent.iter().all(|d| d.target == target));

    let mut frames: Vec<(u8, Instant, Instant)> = Vec::new();
    for datagram in &sent {
        let who = owner(datagram);
        match frames.last_mut() {
            Some((last, _, exited)) if *last == who => *exited = datagram.exited,
            _ => frames.push((who, datagram.entered, datagram.exited)),
        }
    }
    assert_eq!(frames.len(), 2, "每帧的数据报必须连续出现在线上");
    assert!(
        frames[0].2 <= frames[1].1,
        "第一帧完成前第二帧不得进入在途状态"
    );
}

/// 闸门被占用时，超时为 T 的发送在 T + ε 内报告超时，并且事后也不会偷偷写出。
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_send_times_out_and_never_writes_late() {
    init_tracing();
    let socket = MemorySocket::new(addr(9010));
    let transport = transport(&socket, 64);
    let target = addr(9011);

    socket.block_sends();
    let holder = {
        let transport = transport.clone();
        tokio::spawn(async move {
            transport
                .send_to(target, &TextRequest::new("held"), LONG)
                .await
        })
    };
    wait_until(|| transport.gate().available_permits() == 0).await;

    let timeout = Duration::from_millis(100);
    let started = Instant::now();
    let err = transport
        .send_to(target, &TextRequest::new("late"), timeout)
        .await
        .expect_err("闸门被占用时应超时");
    let elapsed = started.elapsed();
    assert!(matches!(err, SendError::Timeout(t) if t == timeout));
    assert_eq!(err.code(), codes::SEND_TIMEOUT);
    assert!(err.is_retryable());
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_millis(500), "超时报告过迟: {elapsed:?}");

    socket.release_sends();
    holder.await.expect("任务").expect("在途发送应完成");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = socket.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].bytes.ends_with(b"held"));
    assert_eq!(transport.gate().available_permits(), 1);
}

/// 销毁唤醒等待者并返回 `Disposed`（而非超时）；已在途的写入照常完成；重复销毁为空操作。
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispose_is_distinct_from_timeout_and_idempotent() {
    init_tracing();
    let socket = MemorySocket::new(addr(9020));
    let transport = transport(&socket, 64);
    let target = addr(9021);

    socket.block_sends();
    let holder = {
        let transport = transport.clone();
        tokio::spawn(async move {
            transport
                .send_to(target, &TextRequest::new("in flight"), LONG)
                .await
        })
    };
    wait_until(|| transport.gate().available_permits() == 0).await;

    let waiter = {
        let transport = transport.clone();
        tokio::spawn(async move {
            transport
                .send_to(target, &TextRequest::new("waiting"), Duration::from_secs(30))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    assert!(transport.dispose());
    assert!(!transport.dispose(), "重复销毁为空操作");
    let outcome = waiter.await.expect("任务");
    assert!(matches!(outcome, Err(SendError::Disposed)));
    assert!(started.elapsed() < Duration::from_secs(1));

    socket.release_sends();
    holder.await.expect("任务").expect("在途写入不受销毁影响");
    assert_eq!(socket.sent().len(), 1);

    let after = transport
        .send_to(target, &TextRequest::new("after"), LONG)
        .await;
    assert!(matches!(after, Err(SendError::Disposed)));
    assert!(transport.is_disposed());
    assert!(transport.buffer_pool().is_disposed());
    assert!(transport.uid_pool().is_disposed());
}

/// 把任何消息编码为空流的编解码器。
struct EmptyCoder;

#[async_trait]
impl ProtocolCoder for EmptyCoder {
    fn name(&self) -> &str {
        "empty"
    }

    fn encode(&self, _message: &dyn Message) -> Result<Option<EncodedStream>, CodecError> {
        Ok(Some(Box::new(Cursor::new(Vec::<u8>::new()))))
    }

    async fn decode(&self, _source: &mut DecodeSource<'_>) -> Result<Box<dyn Message>, CodecError> {
        Err(CodecError::Malformed("decode unsupported".into()))
    }
}

#[tokio::test]
async fn empty_encoding_fails_without_writing_and_returns_resources() {
    let socket = MemorySocket::new(addr(9030));
    let transport = DatagramTransport::new(
        socket.clone(),
        Arc::new(EmptyCoder),
        TransportConfig::default(),
    )
    .expect("合法配置");

    let err = transport
        .send_to(addr(9031), &TextRequest::new("anything"), LONG)
        .await
        .expect_err("空编码应失败");
    assert!(matches!(err, SendError::EmptyPayload));
    assert_eq!(err.code(), codes::EMPTY_PAYLOAD);
    assert!(socket.sent().is_empty());
    assert_eq!(transport.gate().available_permits(), 1, "闸门已释放");

    let stats = transport.buffer_pool().stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.returns, 1, "缓冲已归还");
    assert_eq!(stats.available, 1);
}

#[derive(Debug)]
struct Unclaimed;

impl Message for Unclaimed {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[tokio::test]
async fn unclaimed_message_is_an_encode_failure() {
    let socket = MemorySocket::new(addr(9040));
    let transport = transport(&socket, 64);

    let err = transport
        .send_to(addr(9041), &Unclaimed, LONG)
        .await
        .expect_err("没有编解码器认领");
    match &err {
        SendError::Encode(CodecError::NoCoder { type_name }) => {
            assert!(type_name.ends_with("Unclaimed"))
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!err.is_retryable());
    assert!(socket.sent().is_empty());
    assert_eq!(transport.gate().available_permits(), 1);
}

#[tokio::test]
async fn socket_failure_surfaces_as_io_error() {
    let socket = MemorySocket::new(addr(9050));
    let transport = transport(&socket, 64);
    socket.fail_sends();

    let err = transport
        .send_to(addr(9051), &TextRequest::new("x"), LONG)
        .await
        .expect_err("套接字失败应上报");
    assert!(matches!(err, SendError::Io { .. }));
    assert_eq!(err.code(), codes::SEND_FAILED);
    assert_eq!(transport.gate().available_permits(), 1);
}

#[test]
fn socket_buffer_size_overrides_configuration() {
    let socket = MemorySocket::new(addr(9060)).with_buffer_size(32);
    let transport = transport(&socket, 1400);
    assert_eq!(transport.frame_capacity(), 32);
    assert_eq!(transport.local_addr(), Some(addr(9060)));
}
