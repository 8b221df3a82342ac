use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};

use tokio::io::ReadBuf;
use tokio::net::UdpSocket;

use crate::error::SocketError;
use crate::socket::CompletionSocket;

/// 基于 Tokio `UdpSocket` 的完成式套接字。
///
/// # 契约说明（What）
/// - 收发直接委托给 `UdpSocket::poll_send_to` / `poll_recv_from`，就绪即同步完成，否则登记唤醒；
/// - `buffer_size` 默认不规定，由传输配置的 `frame_capacity` 决定；
/// - 调用方必须运行在 Tokio 运行时中，否则 `bind` 会失败。
#[derive(Debug)]
pub struct UdpCompletionSocket {
    sock: UdpSocket,
    buffer_size: Option<usize>,
}

impl UdpCompletionSocket {
    /// 绑定到指定地址；端口为 `0` 时由系统分配。
    pub async fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let sock = UdpSocket::bind(addr)
            .await
            .map_err(|source| SocketError::Bind { addr, source })?;
        Ok(Self::from_tokio(sock))
    }

    pub fn from_tokio(sock: UdpSocket) -> Self {
        Self {
            sock,
            buffer_size: None,
        }
    }

    /// 固定单个数据报的缓冲容量，覆盖传输配置。
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn get_ref(&self) -> &UdpSocket {
        &self.sock
    }
}

impl CompletionSocket for UdpCompletionSocket {
    fn buffer_size(&self) -> Option<usize> {
        self.buffer_size
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sock.local_addr()
    }

    fn poll_send_to(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>> {
        self.sock.poll_send_to(cx, buf, target)
    }

    fn poll_recv_from(
        &self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<SocketAddr>> {
        self.sock.poll_recv_from(cx, buf)
    }
}
