//! 集成测试共享设施：内存完成式套接字与日志初始化。
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use parking_lot::Mutex;
use spark_codec_mux::{CommonCoderConfig, CommonProtocolCoder, ProtocolCoder, TextEncoding};
use spark_transport_datagram::CompletionSocket;
use tokio::io::ReadBuf;
use tracing_subscriber::EnvFilter;

/// 安装一次性的测试日志订阅器，`RUST_LOG` 控制输出级别。
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// UTF-8 文本的通用编解码器，便于按字符数推算帧长。
pub fn utf8_coder() -> Arc<dyn ProtocolCoder> {
    Arc::new(CommonProtocolCoder::new(
        CommonCoderConfig::default().with_text_encoding(TextEncoding::Utf8),
    ))
}

/// 套接字记录的一次发送：内容、目标与进入/完成时刻。
#[derive(Clone, Debug)]
pub struct SentDatagram {
    pub bytes: Vec<u8>,
    pub target: SocketAddr,
    pub entered: Instant,
    pub exited: Instant,
}

#[derive(Default)]
struct State {
    inbound: VecDeque<(Vec<u8>, SocketAddr)>,
    recv_waker: Option<Waker>,
    sent: Vec<SentDatagram>,
    pending_send: Option<Instant>,
    blocked: bool,
    send_wakers: Vec<Waker>,
    fail_sends: bool,
    fail_next_recv: bool,
}

/// 内存中的完成式套接字。
///
/// - 每次发送先返回一次 `Pending` 再完成，迫使调度器在“在途”期间切换任务，并记录进入/完成时刻；
/// - `block_sends` 可让发送一直挂起，用于占住闸门；
/// - 入站数据报由测试通过 `push_inbound` 注入；`fail_next_recv` 让下一次接收以 IO 错误完成。
#[derive(Clone)]
pub struct MemorySocket {
    local: SocketAddr,
    buffer_size: Option<usize>,
    state: Arc<Mutex<State>>,
}

impl MemorySocket {
    pub fn new(local: SocketAddr) -> Self {
        Self {
            local,
            buffer_size: None,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn push_inbound(&self, bytes: impl Into<Vec<u8>>, from: SocketAddr) {
        let waker = {
            let mut state = self.state.lock();
            state.inbound.push_back((bytes.into(), from));
            state.recv_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.state.lock().sent.clone()
    }

    /// 所有发送数据报按顺序拼接后的字节。
    pub fn wire(&self) -> Vec<u8> {
        self.state
            .lock()
            .sent
            .iter()
            .flat_map(|d| d.bytes.iter().copied())
            .collect()
    }

    pub fn block_sends(&self) {
        self.state.lock().blocked = true;
    }

    pub fn release_sends(&self) {
        let wakers = {
            let mut state = self.state.lock();
            state.blocked = false;
            std::mem::take(&mut state.send_wakers)
        };
        wakers.into_iter().for_each(Waker::wake);
    }

    pub fn fail_sends(&self) {
        self.state.lock().fail_sends = true;
    }

    /// 下一次接收以 `ConnectionReset` 失败（一次性），正在挂起的接收会被唤醒。
    pub fn fail_next_recv(&self) {
        let waker = {
            let mut state = self.state.lock();
            state.fail_next_recv = true;
            state.recv_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// 是否有接收操作正挂起在空的入站队列上。
    pub fn recv_pending(&self) -> bool {
        let state = self.state.lock();
        state.recv_waker.is_some() && state.inbound.is_empty()
    }
}

impl CompletionSocket for MemorySocket {
    fn buffer_size(&self) -> Option<usize> {
        self.buffer_size
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn poll_send_to(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock();
        if state.fail_sends {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "memory socket configured to fail",
            )));
        }
        if state.blocked {
            state.send_wakers.push(cx.waker().clone());
            return Poll::Pending;
        }
        match state.pending_send.take() {
            None => {
                state.pending_send = Some(Instant::now());
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            Some(entered) => {
                state.sent.push(SentDatagram {
                    bytes: buf.to_vec(),
                    target,
                    entered,
                    exited: Instant::now(),
                });
                Poll::Ready(Ok(buf.len()))
            }
        }
    }

    fn poll_recv_from(
        &self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<SocketAddr>> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_recv) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "memory socket receive failure",
            )));
        }
        match state.inbound.pop_front() {
            Some((bytes, from)) => {
                let n = bytes.len().min(buf.remaining());
                buf.put_slice(&bytes[..n]);
                Poll::Ready(Ok(from))
            }
            None => {
                state.recv_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
