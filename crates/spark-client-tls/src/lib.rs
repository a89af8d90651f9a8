#![deny(unsafe_code)]
#![doc = r#"
# spark-client-tls

## 设计动机（Why）
- **单写者纪律**：在异步 TCP 连接之上叠加 TLS 握手与记录层，同时保证任意时刻至多一次底层套接字写在途；
- **背压即重试**：安全通道以 would-block 拒绝的明文逐字节保留，直到重试成功或超时；
- **恰好一次结算**：每个写入项以 `ok`/`error`/`timeout` 之一结算一次，致命错误统一转化为重连。

## 核心契约（What）
- [`TlsTransport`]：与运行时无关的状态机，所有操作由单条事件流顺序驱动；
- [`SecureSession`]：状态机所需的最小会话接口，生产实现为 [`RustlsSession`]；
- [`HotReloadingClientConfig`]：基于 `ArcSwap` 的客户端配置热更新，会话重置时读取最新快照；
- `TlsClient` / `TransportHandle`（`runtime-tokio` 特性）：一条连接一个 Tokio 任务的驱动与线程安全的提交句柄。

## 实现策略（How）
- `rustls::ClientConnection` 只与内存暂存区交互，套接字读写由驱动完成；
- 共享队列沿用 `spark-client-transport` 的数据模型，锁只在队列拼接期间持有；
- 错误按 [`FailureClass`] 归类并携带 `spark.client.tls.*` 错误码写入 `tracing` 日志。

## 风险与考量（Trade-offs）
- 对端正常关闭（close_notify）与致命错误同样触发重连，本层不支持半关闭；
- 出站背压以密文暂存区阈值模拟，阈值过小会增加重试次数，过大会放大单次写入的延迟。
"#]

mod error;
mod hot_reload;
mod retry;
mod rustls_session;
mod session;
mod timer;
mod transport;

#[cfg(feature = "runtime-tokio")]
mod runtime;

pub use error::{FailureClass, OperationKind, SessionError, TlsTransportError};
pub use hot_reload::{HotReloadingClientConfig, TlsSettings, build_client_config};
pub use retry::RetryState;
pub use rustls_session::RustlsSession;
pub use session::{EncryptOutcome, ReadOutcome, SecureSession};
pub use timer::SweepTimer;
pub use transport::{TLS_ERROR_REASON, TlsTransport};

#[cfg(feature = "runtime-tokio")]
pub use runtime::{TlsClient, TransportHandle};
