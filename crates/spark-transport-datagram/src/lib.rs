#![doc = r#"
# spark-transport-datagram

## 模块使命（Why）
- **池化传输**：把完成式套接字原语变成类型化消息的搬运工，发送与接收都从共享缓冲池取用缓冲，稳态零分配；
- **有界背压**：发送闸门限制同一通道的在途发送数，超出的调用在截止时间内等待，超时与销毁结果可区分；
- **请求关联**：身份消息的 UID 由标识池分配，响应按 UID 回到发起方的挂起交换。

## 核心契约（What）
- [`CompletionSocket`]：`poll_send_to` / `poll_recv_from` 形态的完成式套接字；[`UdpCompletionSocket`] 为 Tokio UDP 实现；
- [`DatagramTransport`]：`send_to`、`request`、`subscribe`、`start`、`dispose`；
- [`Received`]：入站通知，解码失败以 `Err` 携带，不会终止接收循环；
- 约束：调用方必须运行在 Tokio 运行时中；`max_concurrent_sends > 1` 时跨数据报的帧可能交错。

## 实现策略（How）
- 发送：闸门许可 → 编码 → 逐块填充池化缓冲 → 逐个数据报写出，写入任务持有许可直到帧写完；
- 接收：首个数据报与 [`SocketStream`] 经 `ConcatStream` 拼接后交给解码器，超出单块缓冲的帧从活动套接字续读；
  续读中遇到零字节数据报或套接字失败时接收循环结束，不会把它们当作解码失败发布；
- 关联：[`PendingExchanges`] 以 UID 为键保存一次性槽位，等待方放弃时自动清理。
"#]

mod config;
mod correlation;
mod error;
mod gate;
mod socket;
mod stream;
mod transport;
mod udp;

pub use config::TransportConfig;
pub use correlation::{PendingExchanges, PendingResponse};
pub use error::{ConfigError, RequestError, SendError, SocketError, codes};
pub use gate::{GatePermit, SendGate};
pub use socket::{CompletionSocket, Datagram};
pub use stream::{Continuation, SocketStream};
pub use transport::{DatagramTransport, Received};
pub use udp::UdpCompletionSocket;
