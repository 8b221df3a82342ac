use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use spark_pool::{BufferLease, BufferPool};
use tokio::io::{AsyncRead, ReadBuf};

use crate::socket::{CompletionSocket, Datagram};

/// 套接字的“剩余流”：把同一对端后续到达的数据报依次作为字节流交付。
///
/// # 模块角色（Why）
/// - 接收路径把已收到的首个数据报与本流用 `ConcatStream` 拼接后交给解码器，
///   编码形式超过单块缓冲的消息由解码器按需从活动套接字继续读取；
/// - 只有解码器确实需要更多字节时才会向套接字提交接收，单数据报消息不会触碰本流。
///
/// # 核心机制（How）
/// - 复用一块池化缓冲承接续包，读完再提交下一次接收；
/// - 续读期间来自其他对端的数据报不属于当前帧，按到达顺序暂存，解码结束后由接收循环优先处理；
///   暂存数达到上限后新到的外来数据报被丢弃并记录告警；
/// - 收到零字节数据报视为通道关闭：状态被锁存，此后的读取一律返回 EOF，不再提交接收；
/// - 套接字接收失败同样被锁存，读取方得到同类错误，原始错误经 [`finish`](Self::finish) 交还接收循环。
pub struct SocketStream<S: ?Sized> {
    socket: Arc<S>,
    pool: BufferPool,
    peer: SocketAddr,
    current: Option<BufferLease>,
    filled: usize,
    pos: usize,
    deferred: VecDeque<Datagram>,
    deferred_limit: usize,
    continuations: usize,
    closed: bool,
    socket_error: Option<io::Error>,
}

/// 续读结束后交还给接收循环的状态。
#[derive(Debug, Default)]
pub struct Continuation {
    /// 续读期间暂存的其他对端数据报，按到达顺序排列。
    pub deferred: VecDeque<Datagram>,
    /// 续读时收到了当前对端的零字节数据报。
    pub closed: bool,
    /// 续读时套接字接收失败。
    pub socket_error: Option<io::Error>,
}

impl Continuation {
    /// 接收通道是否已不可继续使用。
    pub fn ends_receive(&self) -> bool {
        self.closed || self.socket_error.is_some()
    }
}

impl<S: CompletionSocket + ?Sized> SocketStream<S> {
    pub fn new(socket: Arc<S>, pool: BufferPool, peer: SocketAddr, deferred_limit: usize) -> Self {
        Self {
            socket,
            pool,
            peer,
            current: None,
            filled: 0,
            pos: 0,
            deferred: VecDeque::new(),
            deferred_limit,
            continuations: 0,
            closed: false,
            socket_error: None,
        }
    }

    /// 当前帧所属的对端。
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// 已读入的续包数量。
    pub fn continuations(&self) -> usize {
        self.continuations
    }

    /// 结束续读，交出暂存数据报与锁存的通道状态。
    pub fn finish(self) -> Continuation {
        Continuation {
            deferred: self.deferred,
            closed: self.closed,
            socket_error: self.socket_error,
        }
    }
}

impl<S: CompletionSocket + ?Sized> AsyncRead for SocketStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pos < this.filled
                && let Some(lease) = this.current.as_ref()
            {
                let n = (this.filled - this.pos).min(buf.remaining());
                buf.put_slice(&lease[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }
            if this.closed {
                return Poll::Ready(Ok(()));
            }
            if let Some(err) = &this.socket_error {
                return Poll::Ready(Err(io::Error::new(err.kind(), err.to_string())));
            }

            let pool = &this.pool;
            let lease = this.current.get_or_insert_with(|| pool.lease());
            let mut read = ReadBuf::new(&mut lease[..]);
            let from = match ready!(this.socket.poll_recv_from(cx, &mut read)) {
                Ok(from) => from,
                Err(err) => {
                    let surfaced = io::Error::new(err.kind(), err.to_string());
                    this.socket_error = Some(err);
                    return Poll::Ready(Err(surfaced));
                }
            };
            let len = read.filled().len();

            if from != this.peer {
                if let Some(lease) = this.current.take() {
                    if this.deferred.len() < this.deferred_limit {
                        tracing::trace!(remote = %from, bytes = len, "datagram from another peer deferred");
                        this.deferred.push_back(Datagram {
                            lease,
                            len,
                            peer: from,
                        });
                    } else {
                        tracing::warn!(
                            remote = %from,
                            bytes = len,
                            limit = this.deferred_limit,
                            "deferred datagram queue full, dropping datagram"
                        );
                    }
                }
                continue;
            }

            this.filled = len;
            this.pos = 0;
            if len == 0 {
                tracing::trace!(remote = %from, "zero-length continuation, channel closed");
                this.closed = true;
                return Poll::Ready(Ok(()));
            }
            this.continuations += 1;
            tracing::trace!(remote = %from, bytes = len, "continuation datagram received");
        }
    }
}

impl<S: ?Sized> core::fmt::Debug for SocketStream<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SocketStream")
            .field("peer", &self.peer)
            .field("filled", &self.filled)
            .field("pos", &self.pos)
            .field("deferred", &self.deferred.len())
            .field("continuations", &self.continuations)
            .field("closed", &self.closed)
            .field("socket_error", &self.socket_error)
            .finish()
    }
}
