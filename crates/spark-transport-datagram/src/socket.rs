use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};

use spark_pool::{BufferLease, BufferPool};
use tokio::io::ReadBuf;

/// 完成式套接字契约：提交一次收发操作，操作完成时唤醒调用方并报告传输字节数。
///
/// # 设计初衷（Why）
/// - 传输层只关心“交出一块缓冲、得知完成时的字节数与对端地址”，不关心底层是 epoll、IOCP 还是内存模拟；
/// - 以 `poll_*` 形态表达“操作 + 完成回调”：`Poll::Ready` 即同步完成，调用方就地处理结果；
///   `Poll::Pending` 表示操作已挂起，完成时通过 `Waker` 回调。
///
/// # 契约说明（What）
/// - `buffer_size`：套接字规定的单次操作缓冲容量；返回 `None` 时由传输配置决定；
/// - `poll_send_to`：把 `buf` 作为单个数据报发往 `target`，返回写出的字节数；
/// - `poll_recv_from`：把一个完整数据报写入 `buf`，返回对端地址；已写入字节数由 `buf.filled()` 体现；
/// - 实现必须允许并发调用（`&self`），但传输层保证同一时刻至多一个接收操作在途。
pub trait CompletionSocket: Send + Sync + 'static {
    fn buffer_size(&self) -> Option<usize> {
        None
    }

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn poll_send_to(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>>;

    fn poll_recv_from(
        &self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<SocketAddr>>;
}

/// 一次接收完成的结果：持有池化缓冲、有效长度与对端地址。
#[derive(Debug)]
pub struct Datagram {
    pub(crate) lease: BufferLease,
    pub(crate) len: usize,
    pub(crate) peer: SocketAddr,
}

impl Datagram {
    pub fn payload(&self) -> &[u8] {
        &self.lease[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

pub(crate) async fn send_datagram<S>(socket: &S, buf: &[u8], target: SocketAddr) -> io::Result<usize>
where
    S: CompletionSocket + ?Sized,
{
    poll_fn(|cx| socket.poll_send_to(cx, buf, target)).await
}

/// 从池中租用一块缓冲并提交一次接收。
pub(crate) async fn recv_datagram<S>(socket: &S, pool: &BufferPool) -> io::Result<Datagram>
where
    S: CompletionSocket + ?Sized,
{
    let mut lease = pool.lease();
    let (len, peer) = poll_recv_into(socket, &mut lease).await?;
    Ok(Datagram { lease, len, peer })
}

pub(crate) async fn poll_recv_into<S>(socket: &S, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>
where
    S: CompletionSocket + ?Sized,
{
    poll_fn(|cx| {
        let mut read = ReadBuf::new(&mut buf[..]);
        match socket.poll_recv_from(cx, &mut read) {
            Poll::Ready(Ok(peer)) => Poll::Ready(Ok((read.filled().len(), peer))),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    })
    .await
}
