use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spark_codec_mux::{CodecError, ConcatStream, EncodedStream, ExchangeRole, Message, ProtocolCoder};
use spark_pool::{BufferPool, IdentifierPool};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::config::TransportConfig;
use crate::correlation::PendingExchanges;
use crate::error::{ConfigError, DECODE, RECEIVE, RequestError, SEND, SendError};
use crate::gate::{GatePermit, SendGate};
use crate::socket::{CompletionSocket, Datagram, recv_datagram, send_datagram};
use crate::stream::{Continuation, SocketStream};

/// 续读期间最多暂存的其他对端数据报数量。
const DEFERRED_LIMIT: usize = 64;

/// 一条入站消息通知。
///
/// `message` 为 `Err` 表示帧已到达但无法解析（索引/标签未知、负载损坏、续包超时等），
/// 接收循环不会因此停止。
#[derive(Clone, Debug)]
pub struct Received {
    pub remote: SocketAddr,
    pub message: Result<Arc<dyn Message>, CodecError>,
}

impl Received {
    /// 解码成功时的消息。
    pub fn message(&self) -> Option<&Arc<dyn Message>> {
        self.message.as_ref().ok()
    }

    pub fn error(&self) -> Option<&CodecError> {
        self.message.as_ref().err()
    }
}

/// 池化的异步数据报传输。
///
/// # 模块角色（Why）
/// - 把完成式套接字变成类型化消息的可靠搬运工：发送侧“池化缓冲 → 编码 → 分片 → 套接字”，
///   接收侧“套接字完成 → 拼接缓冲与剩余流 → 解码 → 分发”，稳态下每个数据报都不触发堆分配；
/// - 发送闸门提供背压：超出许可的并发发送在截止时间内等待，而不是被丢弃或无界排队。
///
/// # 核心机制（How）
/// - 发送：在超时内取得闸门许可 → 编码；编码失败或为空直接返回、闸门随许可释放；
///   否则把编码流逐块填入池化缓冲并逐个交给套接字，直到流耗尽；
///   实际写入在独立任务中完成并持有许可，调用方放弃等待也不会截断正在写出的帧；
/// - 接收：独立任务循环提交接收；每个完成的数据报与 [`SocketStream`] 拼接后交给解码器，
///   解码受 `decode_timeout` 约束；结果先尝试完成挂起交换，否则推送给订阅者，随后立即重新提交接收；
/// - 订阅者通过容量为 `subscriber_capacity` 的有界通道接收通知；分发从不等待订阅者，
///   通道已满时丢弃该订阅者的这条通知并告警，订阅者关闭接收端后被移除。
///
/// # 契约说明（What）
/// - `dispose` 幂等：关闭闸门（等待者得到 `Disposed`）、中止接收任务、恰好一次地释放套接字引用、
///   放弃挂起交换并销毁两个池；
/// - 接收失败或收到零字节数据报时接收循环结束，不再重新提交；
/// - 调用方不得绕过闸门直接使用底层套接字，传输取得套接字所有权后不再对外暴露它。
pub struct DatagramTransport<S: CompletionSocket> {
    inner: Arc<Inner<S>>,
}

impl<S: CompletionSocket> Clone for DatagramTransport<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S> {
    socket: Mutex<Option<Arc<S>>>,
    local_addr: Option<SocketAddr>,
    coder: Arc<dyn ProtocolCoder>,
    config: TransportConfig,
    gate: SendGate,
    buffers: BufferPool,
    uids: IdentifierPool,
    dispatcher: Arc<Dispatcher>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    disposed: AtomicBool,
}

/// 接收侧共享状态：订阅者与挂起交换。接收任务只持有它，不持有传输本身。
#[derive(Debug)]
struct Dispatcher {
    subscribers: Mutex<Vec<mpsc::Sender<Received>>>,
    pending: Arc<PendingExchanges>,
}

impl<S: CompletionSocket> DatagramTransport<S> {
    pub fn new(
        socket: S,
        coder: Arc<dyn ProtocolCoder>,
        config: TransportConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let frame_capacity = socket.buffer_size().unwrap_or(config.frame_capacity);
        if frame_capacity == 0 {
            return Err(ConfigError::ZeroFrameCapacity);
        }
        let local_addr = socket.local_addr().ok();
        let inner = Inner {
            socket: Mutex::new(Some(Arc::new(socket))),
            local_addr,
            coder,
            gate: SendGate::new(config.max_concurrent_sends),
            buffers: BufferPool::new(frame_capacity),
            uids: IdentifierPool::new(),
            dispatcher: Arc::new(Dispatcher {
                subscribers: Mutex::new(Vec::new()),
                pending: PendingExchanges::new(),
            }),
            receive_task: Mutex::new(None),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// 启动接收循环，只有首次调用生效；必须在 Tokio 运行时中调用。
    ///
    /// 返回本次调用是否真正启动了循环。
    pub fn start(&self) -> bool {
        let inner = &self.inner;
        if !inner.config.receive_enabled || inner.disposed.load(Ordering::Acquire) {
            return false;
        }
        if inner.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(socket) = inner.socket() else {
            return false;
        };
        let receiver = Receiver {
            socket,
            coder: Arc::clone(&inner.coder),
            buffers: inner.buffers.clone(),
            dispatcher: Arc::clone(&inner.dispatcher),
            decode_timeout: inner.config.decode_timeout(),
        };
        let task = tokio::spawn(receiver.run());
        *inner.receive_task.lock() = Some(task);
        true
    }

    /// 订阅入站消息；传输销毁后通道关闭。
    ///
    /// 销毁标志在订阅者锁内检查，与 `dispose` 的清理互斥，销毁后取得的接收端立即观察到关闭。
    pub fn subscribe(&self) -> mpsc::Receiver<Received> {
        let (tx, rx) = mpsc::channel(self.inner.config.subscriber_capacity);
        let mut subscribers = self.inner.dispatcher.subscribers.lock();
        if !self.is_disposed() {
            subscribers.push(tx);
        }
        rx
    }

    /// 以配置的默认超时发送。
    pub async fn send(&self, target: SocketAddr, message: &dyn Message) -> Result<usize, SendError> {
        self.send_to(target, message, self.inner.config.send_timeout())
            .await
    }

    /// 发送一条消息，返回写出的总字节数。
    ///
    /// # 契约说明（What）
    /// - `timeout` 只约束等待闸门；取得许可后的写入不受其影响，会一直进行到完成或 IO 失败；
    /// - 超时返回 [`SendError::Timeout`] 且未写出任何字节；销毁后返回 [`SendError::Disposed`]；
    /// - 编码失败与空编码都在写出前返回，闸门随之释放。
    pub async fn send_to(
        &self,
        target: SocketAddr,
        message: &dyn Message,
        timeout: Duration,
    ) -> Result<usize, SendError> {
        let permit = self.inner.gate.acquire(timeout).await?;
        tracing::debug!(remote = %target, kind = message.type_name(), "send gate acquired");

        let Some(socket) = self.inner.socket() else {
            return Err(SendError::Disposed);
        };
        let encoded = match self.inner.coder.encode(message) {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                return Err(SendError::Encode(CodecError::NoCoder {
                    type_name: message.type_name(),
                }));
            }
            Err(err) => return Err(SendError::Encode(err)),
        };

        let buffers = self.inner.buffers.clone();
        let writer = tokio::spawn(write_frame(socket, buffers, encoded, target, permit));
        match writer.await {
            Ok(outcome) => outcome,
            Err(join) => {
                tracing::warn!(remote = %target, error = %join, "frame writer did not complete");
                Err(SendError::Aborted)
            }
        }
    }

    /// 发送请求并等待来自 `target`、UID 匹配的响应。
    ///
    /// # 使用方式（How）
    /// - 从标识池租用 UID 并赋给 `message`（UID 只能赋值一次，重发请使用新消息）；
    /// - 先登记挂起交换再发送，避免响应先于登记到达；
    /// - `timeout` 覆盖闸门等待与响应等待的总时长。
    ///
    /// # 契约说明（What）
    /// - 正常结束后 UID 归还标识池；超时的 UID 不再归还，迟到的响应不会命中之后复用该值的请求。
    pub async fn request(
        &self,
        target: SocketAddr,
        message: &mut dyn Message,
        timeout: Duration,
    ) -> Result<Arc<dyn Message>, RequestError> {
        let started = Instant::now();
        let type_name = message.type_name();
        let identity = message
            .identity_mut()
            .ok_or(RequestError::NotIdentity(type_name))?;
        let lease = self.inner.uids.lease();
        let uid = lease.uid();
        identity.assign_uid(uid)?;

        let waiter = self.inner.dispatcher.pending.register(uid, target);
        self.send_to(target, message, timeout).await?;

        let remaining = timeout.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, waiter).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                lease.forget();
                tracing::debug!(uid, remote = %target, "request timed out, uid retired");
                Err(RequestError::TimedOut { uid })
            }
        }
    }

    /// 销毁传输；只有首次调用返回 `true`。
    pub fn dispose(&self) -> bool {
        self.inner.shutdown()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn frame_capacity(&self) -> usize {
        self.inner.buffers.frame_capacity()
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.inner.buffers
    }

    pub fn uid_pool(&self) -> &IdentifierPool {
        &self.inner.uids
    }

    pub fn pending_exchanges(&self) -> &PendingExchanges {
        &self.inner.dispatcher.pending
    }

    pub fn gate(&self) -> &SendGate {
        &self.inner.gate
    }
}

impl<S: CompletionSocket> core::fmt::Debug for DatagramTransport<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DatagramTransport")
            .field("local_addr", &self.inner.local_addr)
            .field("coder", &self.inner.coder.name())
            .field("frame_capacity", &self.inner.buffers.frame_capacity())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<S> Inner<S> {
    fn socket(&self) -> Option<Arc<S>> {
        self.socket.lock().clone()
    }

    fn shutdown(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.gate.close();
        if let Some(task) = self.receive_task.lock().take() {
            task.abort();
        }
        let released = self.socket.lock().take().is_some();
        let abandoned = self.dispatcher.pending.clear();
        self.dispatcher.subscribers.lock().clear();
        self.buffers.dispose();
        self.uids.dispose();
        tracing::info!(
            local = ?self.local_addr,
            socket_released = released,
            abandoned_exchanges = abandoned,
            "datagram transport disposed"
        );
        true
    }
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 在许可保护下把编码流分片写出。
async fn write_frame<S: CompletionSocket>(
    socket: Arc<S>,
    buffers: BufferPool,
    mut encoded: EncodedStream,
    target: SocketAddr,
    _permit: GatePermit,
) -> Result<usize, SendError> {
    let mut total = 0usize;
    let mut datagrams = 0usize;
    loop {
        let mut lease = buffers.lease();
        let filled = fill(&mut encoded, &mut lease).await?;
        if filled == 0 {
            if total == 0 {
                return Err(SendError::EmptyPayload);
            }
            break;
        }
        let sent = send_datagram(&*socket, &lease[..filled], target)
            .await
            .map_err(|source| {
                tracing::warn!(
                    code = SEND.code,
                    remote = %target,
                    error = %source,
                    "{}", SEND.message
                );
                SendError::Io { source }
            })?;
        total += sent;
        datagrams += 1;
        if filled < lease.len() {
            break;
        }
    }
    tracing::debug!(remote = %target, bytes = total, datagrams, "frame sent");
    Ok(total)
}

/// 把编码流读入缓冲，直到填满或流结束。
async fn fill(encoded: &mut EncodedStream, buf: &mut [u8]) -> Result<usize, SendError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = encoded
            .read(&mut buf[filled..])
            .await
            .map_err(|err| SendError::Encode(CodecError::from(err)))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// 接收循环持有的状态。
struct Receiver<S> {
    socket: Arc<S>,
    coder: Arc<dyn ProtocolCoder>,
    buffers: BufferPool,
    dispatcher: Arc<Dispatcher>,
    decode_timeout: Duration,
}

impl<S: CompletionSocket> Receiver<S> {
    async fn run(self) {
        let local = self.socket.local_addr().ok();
        tracing::info!(local = ?local, coder = self.coder.name(), "receive loop started");
        let mut deferred: VecDeque<Datagram> = VecDeque::new();
        loop {
            let datagram = match deferred.pop_front() {
                Some(datagram) => datagram,
                None => match recv_datagram(&*self.socket, &self.buffers).await {
                    Ok(datagram) => datagram,
                    Err(err) => {
                        tracing::warn!(
                            code = RECEIVE.code,
                            error = %err,
                            "{}", RECEIVE.message
                        );
                        break;
                    }
                },
            };
            if datagram.is_empty() {
                tracing::info!(remote = %datagram.peer(), "zero-length datagram, receive loop closing");
                break;
            }
            let peer = datagram.peer();
            let (decoded, continuation) = self.decode(&datagram).await;
            drop(datagram);
            let ends_receive = continuation.ends_receive();
            let Continuation {
                deferred: spilled,
                closed,
                socket_error,
            } = continuation;
            deferred.extend(spilled);

            if ends_receive {
                if decoded.is_ok() {
                    self.dispatcher.dispatch(peer, decoded);
                } else {
                    tracing::debug!(remote = %peer, "partial frame discarded, receive channel ended");
                }
                match socket_error {
                    Some(err) => tracing::warn!(
                        code = RECEIVE.code,
                        remote = %peer,
                        error = %err,
                        "{}", RECEIVE.message
                    ),
                    None if closed => tracing::info!(
                        remote = %peer,
                        "zero-length datagram during continuation, receive loop closing"
                    ),
                    None => {}
                }
                break;
            }

            if let Err(err) = &decoded {
                tracing::warn!(
                    code = DECODE.code,
                    remote = %peer,
                    coder = self.coder.name(),
                    codec_code = err.code(),
                    error = %err,
                    "{}", DECODE.message
                );
            }
            self.dispatcher.dispatch(peer, decoded);
        }
        tracing::info!(local = ?local, "receive loop stopped");
    }

    /// 拼接首个数据报与剩余套接字流并解码，返回解码结果与续读结束时的通道状态。
    async fn decode(
        &self,
        datagram: &Datagram,
    ) -> (Result<Box<dyn Message>, CodecError>, Continuation) {
        let peer = datagram.peer();
        let rest = SocketStream::new(
            Arc::clone(&self.socket),
            self.buffers.clone(),
            peer,
            DEFERRED_LIMIT,
        );
        let mut source = ConcatStream::with_prefix(datagram.payload(), rest).leave_open(true);
        let outcome = tokio::time::timeout(self.decode_timeout, self.coder.decode(&mut source))
            .await
            .unwrap_or_else(|_elapsed| {
                Err(CodecError::Io {
                    kind: io::ErrorKind::TimedOut,
                    message: format!("frame incomplete after {:?}", self.decode_timeout),
                })
            });
        let continuation = source
            .close()
            .map(|parts| parts.tail.finish())
            .unwrap_or_default();
        (outcome, continuation)
    }
}

impl Dispatcher {
    /// 响应角色的身份消息先尝试完成挂起交换，其余消息推送给全部订阅者。
    fn dispatch(&self, remote: SocketAddr, decoded: Result<Box<dyn Message>, CodecError>) {
        let message = decoded.map(Arc::<dyn Message>::from);
        if let Ok(message) = &message
            && let Some(identity) = message.identity()
            && identity.role() == ExchangeRole::Response
            && let Some(uid) = identity.uid()
        {
            if self.pending.resolve(uid, remote, Arc::clone(message)) {
                tracing::debug!(uid, remote = %remote, "response matched pending exchange");
                return;
            }
            tracing::debug!(uid, remote = %remote, "response without pending exchange");
        }
        let event = Received { remote, message };
        self.subscribers
            .lock()
            .retain(|subscriber| match subscriber.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        remote = %remote,
                        capacity = subscriber.max_capacity(),
                        "subscriber lagging, notification dropped"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
    }
}
