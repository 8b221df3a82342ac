use std::io::{self, Cursor, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

/// `ConcatStream` 把一个“头部”（字节前缀或上游流）与一个“尾部”流拼接成单一只读流。
///
/// # 模块角色（Why）
/// - 编码路径：把几字节的编解码器索引头挂到负载流前面，避免每次发送都把“头 + 负载”拷贝进新缓冲；
/// - 解码路径：把套接字已接收、部分已被解析的缓冲与仍在到达的套接字流拼起来，
///   超过单块缓冲的消息可以从活动套接字透明地继续读取。
///
/// # 核心机制（How）
/// - 读取时先消费头部；头部在同一次调用中耗尽后，剩余请求由尾部继续满足，之后的调用只读尾部；
/// - 头部长度已知（字节前缀）时可在同一次读取内完成头尾衔接；流式头部在首次读到 EOF 时记录长度；
/// - 定位仅支持 `SeekFrom::Start`：目标位于头部内则重新武装头部并把尾部倒回 0，
///   否则跳过头部并把尾部定位到 `目标 - 头部长度`；流式头部长度未知时先 `SeekFrom::End(0)` 测量。
///
/// # 契约说明（What）
/// - 单趟、只读、非并发安全；不提供写入实现；
/// - [`close`](Self::close) 之后的读取与定位、以及非 `Start` 的定位，均返回 `ErrorKind::Unsupported`；
/// - `leave_open == true` 时 `close` 交还头尾两段流，否则直接释放；
/// - 尾部错误若与头部字节出现在同一次调用中，先交付字节，错误在下一次读取时返回。
#[derive(Debug)]
pub struct ConcatStream<H, T> {
    head: Option<H>,
    tail: Option<T>,
    head_len: Option<u64>,
    head_pos: u64,
    head_exhausted: bool,
    position: u64,
    leave_open: bool,
    seek: SeekState,
    /// 尾部在头部已交付字节的同一次调用中失败时暂存的错误，下一次读取交付。
    pending_error: Option<io::Error>,
}

/// `close` 在 `leave_open` 模式下交还的两段流。
#[derive(Debug)]
pub struct ConcatParts<H, T> {
    pub head: H,
    pub tail: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeekState {
    Idle,
    Measuring { target: u64 },
    Head { target: u64 },
    Tail { logical: u64 },
}

/// 以字节前缀作为头部的拼接流。
pub type PrefixedStream<B, T> = ConcatStream<Cursor<B>, T>;

impl<B, T> ConcatStream<Cursor<B>, T>
where
    B: AsRef<[u8]> + Unpin,
{
    /// 以字节前缀构造。
    pub fn with_prefix(prefix: B, tail: T) -> Self {
        let len = prefix.as_ref().len() as u64;
        Self::build(Cursor::new(prefix), Some(len), tail)
    }
}

impl<T> ConcatStream<Cursor<Bytes>, T> {
    /// 以 `(缓冲, 偏移, 长度)` 三元组构造，越界时返回 `InvalidInput`。
    pub fn from_buffer(buffer: Bytes, offset: usize, len: usize, tail: T) -> io::Result<Self> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= buffer.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "range {offset}+{len} exceeds buffer of {} bytes",
                        buffer.len()
                    ),
                )
            })?;
        Ok(Self::build(
            Cursor::new(buffer.slice(offset..end)),
            Some(len as u64),
            tail,
        ))
    }
}

impl<H, T> ConcatStream<H, T> {
    /// 以上游流作为头部构造，头部长度在读到 EOF 或首次定位时得知。
    pub fn chain(head: H, tail: T) -> Self {
        Self::build(head, None, tail)
    }

    fn build(head: H, head_len: Option<u64>, tail: T) -> Self {
        Self {
            head: Some(head),
            tail: Some(tail),
            head_len,
            head_pos: 0,
            head_exhausted: head_len == Some(0),
            position: 0,
            leave_open: false,
            seek: SeekState::Idle,
            pending_error: None,
        }
    }

    /// 设置 `close` 时是否交还底层流。
    pub fn leave_open(mut self, leave_open: bool) -> Self {
        self.leave_open = leave_open;
        self
    }

    /// 拼接视图中的当前逻辑位置。
    pub fn position(&self) -> u64 {
        self.position
    }

    /// 已知的头部长度。
    pub fn head_len(&self) -> Option<u64> {
        self.head_len
    }

    pub fn is_closed(&self) -> bool {
        self.head.is_none()
    }

    /// 释放拼接流；`leave_open` 模式下交还头尾两段，重复调用返回 `None`。
    pub fn close(&mut self) -> Option<ConcatParts<H, T>> {
        let head = self.head.take();
        let tail = self.tail.take();
        self.seek = SeekState::Idle;
        self.pending_error = None;
        match (head, tail) {
            (Some(head), Some(tail)) if self.leave_open => Some(ConcatParts { head, tail }),
            _ => None,
        }
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("concat stream: {what}"))
}

impl<H, T> ConcatStream<H, T>
where
    H: AsyncSeek + Unpin,
    T: AsyncSeek + Unpin,
{
    /// 头部长度已知时，按目标位置发起头部或尾部定位。
    fn plan_seek(&mut self, target: u64, head_len: u64) -> io::Result<()> {
        if target < head_len {
            let head = self.head.as_mut().ok_or_else(|| unsupported("closed"))?;
            Pin::new(head).start_seek(SeekFrom::Start(target))?;
            self.seek = SeekState::Head { target };
        } else {
            let tail = self.tail.as_mut().ok_or_else(|| unsupported("closed"))?;
            Pin::new(tail).start_seek(SeekFrom::Start(target - head_len))?;
            self.head_exhausted = true;
            self.head_pos = head_len;
            self.seek = SeekState::Tail { logical: target };
        }
        Ok(())
    }
}

impl<H, T> AsyncRead for ConcatStream<H, T>
where
    H: AsyncRead + Unpin,
    T: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.head.is_none() {
            return Poll::Ready(Err(unsupported("read after close")));
        }
        if this.seek != SeekState::Idle {
            return Poll::Ready(Err(io::Error::other("concat stream: seek in progress")));
        }
        if let Some(err) = this.pending_error.take() {
            return Poll::Ready(Err(err));
        }
        let start = buf.filled().len();

        if !this.head_exhausted
            && let Some(head) = this.head.as_mut()
        {
            let before = buf.filled().len();
            ready!(Pin::new(head).poll_read(cx, buf))?;
            let read = (buf.filled().len() - before) as u64;
            this.head_pos += read;
            this.position += read;
            let reached_end = match this.head_len {
                Some(len) => this.head_pos >= len,
                None => read == 0 && buf.remaining() > 0,
            };
            if reached_end {
                this.head_exhausted = true;
                this.head_len.get_or_insert(this.head_pos);
            }
            if buf.remaining() == 0 || !this.head_exhausted {
                return Poll::Ready(Ok(()));
            }
        }

        let Some(tail) = this.tail.as_mut() else {
            return Poll::Ready(Err(unsupported("read after close")));
        };
        let before = buf.filled().len();
        match Pin::new(tail).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.position += (buf.filled().len() - before) as u64;
                Poll::Ready(Ok(()))
            }
            // 头部已在本次调用中交付了字节，先返回已读部分。
            Poll::Pending if buf.filled().len() > start => Poll::Ready(Ok(())),
            Poll::Ready(Err(err)) if buf.filled().len() > start => {
                tracing::trace!(error = %err, "tail read failed after head bytes were delivered");
                this.pending_error = Some(err);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<H, T> AsyncSeek for ConcatStream<H, T>
where
    H: AsyncSeek + Unpin,
    T: AsyncSeek + Unpin,
{
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        if this.head.is_none() {
            return Err(unsupported("seek after close"));
        }
        if this.seek != SeekState::Idle {
            return Err(io::Error::other("concat stream: seek already in progress"));
        }
        let SeekFrom::Start(target) = position else {
            return Err(unsupported("only SeekFrom::Start is supported"));
        };
        match this.head_len {
            Some(head_len) => this.plan_seek(target, head_len),
            None => {
                let head = this.head.as_mut().ok_or_else(|| unsupported("closed"))?;
                Pin::new(head).start_seek(SeekFrom::End(0))?;
                this.seek = SeekState::Measuring { target };
                Ok(())
            }
        }
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        let this = self.get_mut();
        loop {
            match this.seek {
                SeekState::Idle => return Poll::Ready(Ok(this.position)),
                SeekState::Measuring { target } => {
                    let Some(head) = this.head.as_mut() else {
                        return Poll::Ready(Err(unsupported("closed")));
                    };
                    let measured = ready!(Pin::new(head).poll_complete(cx));
                    let head_len = match measured {
                        Ok(len) => len,
                        Err(err) => {
                            this.seek = SeekState::Idle;
                            return Poll::Ready(Err(err));
                        }
                    };
                    this.head_len = Some(head_len);
                    this.head_pos = head_len;
                    if let Err(err) = this.plan_seek(target, head_len) {
                        this.seek = SeekState::Idle;
                        return Poll::Ready(Err(err));
                    }
                }
                SeekState::Head { target } => {
                    let Some(head) = this.head.as_mut() else {
                        return Poll::Ready(Err(unsupported("closed")));
                    };
                    if let Err(err) = ready!(Pin::new(head).poll_complete(cx)) {
                        this.seek = SeekState::Idle;
                        return Poll::Ready(Err(err));
                    }
                    this.head_pos = target;
                    this.head_exhausted = false;
                    let Some(tail) = this.tail.as_mut() else {
                        return Poll::Ready(Err(unsupported("closed")));
                    };
                    if let Err(err) = Pin::new(tail).start_seek(SeekFrom::Start(0)) {
                        this.seek = SeekState::Idle;
                        return Poll::Ready(Err(err));
                    }
                    this.seek = SeekState::Tail { logical: target };
                }
                SeekState::Tail { logical } => {
                    let Some(tail) = this.tail.as_mut() else {
                        return Poll::Ready(Err(unsupported("closed")));
                    };
                    let done = ready!(Pin::new(tail).poll_complete(cx));
                    this.seek = SeekState::Idle;
                    done?;
                    this.position = logical;
                    return Poll::Ready(Ok(logical));
                }
            }
        }
    }
}
